//! KPIO Loader Fuzzing Infrastructure
//!
//! Provides fuzzing harnesses for the ELF32 loader.

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod elf;
pub mod harness;

use alloc::string::String;
use alloc::vec::Vec;

use kpio_loader::LoadError;

/// Fuzzing target trait
pub trait FuzzTarget {
    /// Name of the fuzz target
    fn name(&self) -> &str;

    /// Run fuzzing iteration with input
    fn fuzz(&mut self, input: &[u8]) -> FuzzResult;

    /// Reset state between iterations
    fn reset(&mut self);
}

/// Result of a fuzz iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzResult {
    /// Image loaded and every invariant held
    Loaded,
    /// Image rejected with a typed error (expected for malformed input)
    Rejected(LoadError),
    /// The loader broke one of its guarantees
    Violation(Violation),
}

impl FuzzResult {
    /// Check if this is a violation
    pub fn is_violation(&self) -> bool {
        matches!(self, FuzzResult::Violation(_))
    }

    /// Check if this input got past validation
    pub fn is_interesting(&self) -> bool {
        matches!(
            self,
            FuzzResult::Loaded
                | FuzzResult::Rejected(LoadError::MalformedSegment(_))
                | FuzzResult::Rejected(LoadError::MappingFailed(_))
                | FuzzResult::Violation(_)
        )
    }
}

/// Guarantee the loader failed to uphold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Kind of violation
    pub kind: ViolationKind,
    /// Address involved, if any
    pub address: Option<u32>,
    /// Human-readable detail
    pub detail: String,
}

/// Violation categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// Loaded bytes differ from the image
    ContentMismatch,
    /// BSS tail not zero after loading
    DirtyZeroFill,
    /// Segment left writable against its flags
    PermissionLeak,
    /// Walking the table twice gave different results
    NonDeterministicWalk,
    /// Rejected image still touched the address space
    MappedOnRejection,
}

/// Fuzzer configuration
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// Maximum input size
    pub max_input_size: usize,
    /// Maximum iterations
    pub max_iterations: u64,
    /// Page budget for each target address space
    pub max_pages: usize,
    /// Mutator seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            max_input_size: 64 * 1024, // 64KB
            max_iterations: u64::MAX,
            max_pages: 256,
            seed: 12345,
        }
    }
}

/// Fuzzing statistics
#[derive(Debug, Clone, Default)]
pub struct FuzzStats {
    /// Total iterations
    pub iterations: u64,
    /// Images that loaded
    pub loaded: u64,
    /// Images rejected
    pub rejected: u64,
    /// Violations found
    pub violations: u64,
    /// Unique violations
    pub unique_violations: u64,
    /// Corpus size
    pub corpus_size: usize,
}

/// Mutator for input generation
pub struct Mutator {
    /// Current seed
    seed: u64,
    /// Dictionary of interesting values
    dictionary: Vec<Vec<u8>>,
}

impl Mutator {
    /// Create a new mutator
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            dictionary: Vec::new(),
        }
    }

    /// Add dictionary entry
    pub fn add_dictionary(&mut self, entry: Vec<u8>) {
        self.dictionary.push(entry);
    }

    /// Next pseudo-random value
    pub fn random(&mut self) -> u64 {
        self.seed = self.seed.wrapping_mul(1103515245).wrapping_add(12345);
        self.seed >> 16
    }

    /// Mutate input
    pub fn mutate(&mut self, input: &mut Vec<u8>) {
        let strategy = self.random() % 8;

        match strategy {
            0 => self.bit_flip(input),
            1 => self.byte_replace(input),
            2 => self.interesting_word(input),
            3 => self.dictionary_insert(input),
            4 => self.truncate(input),
            5 => self.random_bytes(input),
            _ => self.havoc(input),
        }
    }

    fn bit_flip(&mut self, input: &mut Vec<u8>) {
        if input.is_empty() {
            return;
        }
        let pos = (self.random() as usize) % input.len();
        let bit = (self.random() % 8) as u8;
        input[pos] ^= 1 << bit;
    }

    fn byte_replace(&mut self, input: &mut Vec<u8>) {
        if input.is_empty() {
            return;
        }
        let pos = (self.random() as usize) % input.len();
        input[pos] = (self.random() & 0xFF) as u8;
    }

    /// Overwrite an aligned word with a boundary value.
    fn interesting_word(&mut self, input: &mut Vec<u8>) {
        const INTERESTING: &[u32] = &[0, 1, 0x7F, 0x80, 0xFF, 0x1000, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_F000, u32::MAX];
        if input.len() < 4 {
            return;
        }
        let words = input.len() / 4;
        let pos = ((self.random() as usize) % words) * 4;
        let value = INTERESTING[(self.random() as usize) % INTERESTING.len()];
        input[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn dictionary_insert(&mut self, input: &mut Vec<u8>) {
        if self.dictionary.is_empty() {
            return;
        }
        let dict_idx = (self.random() as usize) % self.dictionary.len();
        let entry: Vec<u8> = self.dictionary[dict_idx].clone();
        let pos = if input.is_empty() {
            0
        } else {
            (self.random() as usize) % input.len()
        };
        for (i, &byte) in entry.iter().enumerate() {
            if pos + i < input.len() {
                input[pos + i] = byte;
            } else {
                input.push(byte);
            }
        }
    }

    fn truncate(&mut self, input: &mut Vec<u8>) {
        if input.is_empty() {
            return;
        }
        let len = (self.random() as usize) % input.len();
        input.truncate(len);
    }

    fn random_bytes(&mut self, input: &mut Vec<u8>) {
        let count = ((self.random() % 8) + 1) as usize;
        for _ in 0..count {
            let byte = (self.random() & 0xFF) as u8;
            input.push(byte);
        }
    }

    fn havoc(&mut self, input: &mut Vec<u8>) {
        let iterations = (self.random() % 8) + 1;
        for _ in 0..iterations {
            match self.random() % 4 {
                0 => self.bit_flip(input),
                1 => self.byte_replace(input),
                2 => self.interesting_word(input),
                _ => {}
            }
        }
    }
}

/// Corpus manager
pub struct Corpus {
    /// Input entries
    entries: Vec<Vec<u8>>,
    /// Maximum size
    max_size: usize,
}

impl Corpus {
    /// Create new corpus
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
        }
    }

    /// Add entry, dropping the oldest one when full
    pub fn add(&mut self, data: Vec<u8>) {
        if self.max_size == 0 {
            return;
        }
        if self.entries.len() >= self.max_size {
            self.entries.remove(0);
        }
        self.entries.push(data);
    }

    /// Pick an entry
    pub fn pick(&self, seed: u64) -> Option<&Vec<u8>> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = (seed as usize) % self.entries.len();
        Some(&self.entries[idx])
    }

    /// Get corpus size
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
