//! ELF32 Loader Fuzzing Target
//!
//! Run with: cargo fuzz run --fuzz-dir fuzz --features libfuzzer elf_load_fuzz

#![no_main]

use libfuzzer_sys::fuzz_target;

use kpio_loader_fuzz::elf::Elf32LoadTarget;
use kpio_loader_fuzz::{FuzzTarget, FuzzerConfig};

fuzz_target!(|data: &[u8]| {
    let mut target = Elf32LoadTarget::new(&FuzzerConfig::default());

    // Rejections are fine; broken guarantees are not
    if let kpio_loader_fuzz::FuzzResult::Violation(violation) = target.fuzz(data) {
        panic!(
            "{:?} at {:?}: {}",
            violation.kind, violation.address, violation.detail
        );
    }
});
