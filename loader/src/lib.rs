//! ELF32 Executable Loader
//!
//! Loads 32-bit little-endian ELF executables into a process address space.
//! The input image is treated as untrusted: every offset and size read from
//! it goes through checked arithmetic before it is used to index the buffer
//! or to compute a destination range.
//!
//! # Pipeline
//!
//! ```text
//!   bytes ──► header::validate ──► program::entries ──► segment_loader::load
//!              (FileHeader)        (ProgramHeaderEntry)   (AddressSpaceMapper)
//! ```
//!
//! [`image::load_image`] runs the three stages in order and hands back the
//! entry point once every LOAD segment has been materialized.
//!
//! # Supported Format
//!
//! - ELF32 file header (52 bytes) and program headers (32 bytes)
//! - PT_LOAD segments, including zero-filled tails (`memsz > filesz`)
//! - Other segment types are surfaced by the walker and skipped
//!
//! Section headers, relocations and dynamic linking are not handled.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod format;
pub mod header;
pub mod image;
pub mod program;
pub mod segment_loader;
pub mod space;

#[cfg(test)]
mod tests;

pub use config::{LoaderConfig, WxPolicy};
pub use error::{IoError, LoadError, MapError, Result, SegmentFault};
pub use format::{SegmentFlags, SegmentType};
pub use header::{validate, validate_with, FileHeader};
pub use image::{load_from_source, load_image, load_image_locked, load_image_with, ByteSource, LoadedImage, LoadedSegment};
pub use program::{entries, ProgramHeaderEntry, ProgramHeaders};
pub use segment_loader::{load, AddressSpaceMapper, LoadRequest};
pub use space::PagedAddressSpace;
