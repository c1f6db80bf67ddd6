//! Fuzzing Harness
//!
//! Main fuzzing loop, violation bookkeeping and input minimization.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashSet;

use crate::{Corpus, FuzzResult, FuzzStats, FuzzTarget, FuzzerConfig, Mutator, Violation, ViolationKind};

/// Main fuzzer harness
pub struct FuzzHarness {
    /// Configuration
    config: FuzzerConfig,
    /// Fuzz targets
    targets: Vec<Box<dyn FuzzTarget>>,
    /// Mutator
    mutator: Mutator,
    /// Corpus
    corpus: Corpus,
    /// Statistics
    stats: FuzzStats,
    /// Found violations
    violations: Vec<ViolationEntry>,
    /// Hashes of violations already reported
    seen: HashSet<u64>,
}

/// A violation entry
#[derive(Debug, Clone)]
pub struct ViolationEntry {
    /// Input that triggered it
    pub input: Vec<u8>,
    /// What went wrong
    pub violation: Violation,
    /// Target name
    pub target: String,
}

impl FuzzHarness {
    /// Create new harness
    pub fn new(config: FuzzerConfig) -> Self {
        let seed = config.seed;

        Self {
            config,
            targets: Vec::new(),
            mutator: Mutator::new(seed),
            corpus: Corpus::new(1024),
            stats: FuzzStats::default(),
            violations: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Add fuzz target
    pub fn add_target(&mut self, target: Box<dyn FuzzTarget>) {
        self.targets.push(target);
    }

    /// Add corpus entry
    pub fn add_corpus(&mut self, data: Vec<u8>) {
        self.corpus.add(data);
        self.stats.corpus_size = self.corpus.len();
    }

    /// Add dictionary entries
    pub fn add_dictionary(&mut self, entries: Vec<Vec<u8>>) {
        for entry in entries {
            self.mutator.add_dictionary(entry);
        }
    }

    /// Run fuzzing loop
    pub fn run(&mut self, iterations: u64) -> FuzzReport {
        let iterations = iterations.min(self.config.max_iterations);
        for _ in 0..iterations {
            self.fuzz_iteration();
        }

        FuzzReport {
            stats: self.stats.clone(),
            violations: self.violations.clone(),
        }
    }

    /// Run single fuzzing iteration
    fn fuzz_iteration(&mut self) {
        self.stats.iterations += 1;

        let pick = self.mutator.random();
        let mut input = self.corpus.pick(pick).cloned().unwrap_or_default();
        self.mutator.mutate(&mut input);
        input.truncate(self.config.max_input_size);

        let mut found: Vec<(Violation, String)> = Vec::new();
        let mut interesting = false;

        for target in &mut self.targets {
            let result = target.fuzz(&input);

            match &result {
                FuzzResult::Loaded => self.stats.loaded += 1,
                FuzzResult::Rejected(_) => self.stats.rejected += 1,
                FuzzResult::Violation(v) => found.push((v.clone(), String::from(target.name()))),
            }
            interesting |= result.is_interesting();

            target.reset();
        }

        for (violation, name) in found {
            self.record_violation(&input, violation, name);
        }

        if interesting {
            self.corpus.add(input);
            self.stats.corpus_size = self.corpus.len();
        }
    }

    fn record_violation(&mut self, input: &[u8], violation: Violation, target: String) {
        self.stats.violations += 1;

        let hash = hash_violation(&violation);
        if self.seen.insert(hash) {
            log::warn!(
                "[FUZZ] {} violation {:?} at {:?}: {}",
                target,
                violation.kind,
                violation.address,
                violation.detail
            );
            self.stats.unique_violations += 1;
            self.violations.push(ViolationEntry {
                input: input.to_vec(),
                violation,
                target,
            });
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> &FuzzStats {
        &self.stats
    }

    /// Get found violations
    pub fn violations(&self) -> &[ViolationEntry] {
        &self.violations
    }

    /// Get corpus size
    pub fn corpus_size(&self) -> usize {
        self.corpus.len()
    }
}

fn hash_violation(violation: &Violation) -> u64 {
    let kind = match violation.kind {
        ViolationKind::ContentMismatch => 1,
        ViolationKind::DirtyZeroFill => 2,
        ViolationKind::PermissionLeak => 3,
        ViolationKind::NonDeterministicWalk => 4,
        ViolationKind::MappedOnRejection => 5,
    };
    let page = violation.address.map_or(0, |addr| (addr >> 12) as u64 + 1);
    kind ^ page.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Fuzzing report
#[derive(Debug, Clone)]
pub struct FuzzReport {
    /// Statistics
    pub stats: FuzzStats,
    /// Violations found
    pub violations: Vec<ViolationEntry>,
}

impl FuzzReport {
    /// Format as text
    pub fn format(&self) -> String {
        let mut output = String::new();

        output.push_str("=== Fuzzing Report ===\n\n");

        output.push_str("Statistics:\n");
        output.push_str(&format!("  Iterations: {}\n", self.stats.iterations));
        output.push_str(&format!("  Loaded: {}\n", self.stats.loaded));
        output.push_str(&format!("  Rejected: {}\n", self.stats.rejected));
        output.push_str(&format!(
            "  Violations: {} ({} unique)\n",
            self.stats.violations, self.stats.unique_violations
        ));
        output.push_str(&format!("  Corpus: {}\n", self.stats.corpus_size));

        if !self.violations.is_empty() {
            output.push_str("\nViolations:\n");
            for entry in &self.violations {
                output.push_str(&format!(
                    "  - {:?} in {}: {:?} {}\n",
                    entry.violation.kind, entry.target, entry.violation.address, entry.violation.detail
                ));
            }
        }

        output
    }
}

/// Shrinks an input while it keeps triggering a violation
pub struct InputMinimizer<'a> {
    /// Target to reproduce the violation
    target: &'a mut dyn FuzzTarget,
}

impl<'a> InputMinimizer<'a> {
    /// Create new minimizer
    pub fn new(target: &'a mut dyn FuzzTarget) -> Self {
        Self { target }
    }

    /// Minimize input
    pub fn minimize(&mut self, input: Vec<u8>) -> Vec<u8> {
        let mut current = input;
        let mut improved = true;

        while improved {
            improved = false;

            for chunk_size in [32, 16, 8, 4, 2, 1] {
                let result = self.try_remove_chunks(&current, chunk_size);
                if result.len() < current.len() {
                    current = result;
                    improved = true;
                    break;
                }
            }
        }

        current
    }

    fn try_remove_chunks(&mut self, input: &[u8], chunk_size: usize) -> Vec<u8> {
        for start in (0..input.len()).step_by(chunk_size) {
            let end = (start + chunk_size).min(input.len());

            let mut candidate = Vec::with_capacity(input.len());
            candidate.extend_from_slice(&input[..start]);
            candidate.extend_from_slice(&input[end..]);

            if self.still_fails(&candidate) {
                return candidate;
            }
        }

        input.to_vec()
    }

    fn still_fails(&mut self, input: &[u8]) -> bool {
        self.target.reset();
        self.target.fuzz(input).is_violation()
    }
}

/// Run a quick fuzz test, returning whether any violation turned up
pub fn quick_fuzz<T: FuzzTarget>(mut target: T, corpus: Vec<Vec<u8>>, iterations: u64) -> bool {
    let mut mutator = Mutator::new(42);
    let mut current_corpus = corpus;

    for _ in 0..iterations {
        let mut input = if current_corpus.is_empty() {
            Vec::new()
        } else {
            let idx = (mutator.random() as usize) % current_corpus.len();
            current_corpus[idx].clone()
        };

        mutator.mutate(&mut input);

        let result = target.fuzz(&input);
        target.reset();

        if result.is_violation() {
            return true;
        }
        if result.is_interesting() && current_corpus.len() < 1024 {
            current_corpus.push(input);
        }
    }

    false
}
