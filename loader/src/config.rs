//! Loader configuration.
//!
//! Compile-time limits plus the runtime [`LoaderConfig`] that carries the
//! policy knobs an embedding kernel may want to tighten or relax.

/// Page size (4 KB).
pub const PAGE_SIZE: u32 = 4096;

/// Default ceiling on the program-header count.
///
/// Keeps `phoff + phnum * phentsize` far away from `u32::MAX` and bounds the
/// work done per load attempt.
pub const DEFAULT_MAX_PHNUM: u16 = 256;

/// End of the user half of the 32-bit address space.
/// Everything from here up belongs to the kernel.
pub const USER_SPACE_END: u32 = 0x8000_0000;

/// Default page budget of a heap-backed address space (16 MB).
pub const DEFAULT_PAGE_BUDGET: usize = 4096;

/// What to do with a segment that asks to be both writable and executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WxPolicy {
    /// Pass the requested flags through unchanged.
    Allow,
    /// Strip the write bit and keep the segment executable.
    DropWrite,
    /// Refuse to load the image.
    Reject,
}

/// Runtime loader configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Largest accepted `phnum`.
    pub max_phnum: u16,
    /// Exclusive upper bound for segment end addresses, `None` to allow the
    /// whole 32-bit space.
    pub user_limit: Option<u32>,
    /// Handling of W+X segments.
    pub wx_policy: WxPolicy,
}

impl LoaderConfig {
    /// Configuration with the default limits.
    pub const fn new() -> Self {
        Self {
            max_phnum: DEFAULT_MAX_PHNUM,
            user_limit: Some(USER_SPACE_END),
            wx_policy: WxPolicy::Allow,
        }
    }

    /// Set the program-header count ceiling.
    pub const fn with_max_phnum(mut self, max_phnum: u16) -> Self {
        self.max_phnum = max_phnum;
        self
    }

    /// Set (or clear) the user address limit.
    pub const fn with_user_limit(mut self, limit: Option<u32>) -> Self {
        self.user_limit = limit;
        self
    }

    /// Set the W^X policy.
    pub const fn with_wx_policy(mut self, policy: WxPolicy) -> Self {
        self.wx_policy = policy;
        self
    }

    /// Check whether `[start, end)` lies inside the permitted user range.
    pub fn permits_range(&self, start: u32, end: u32) -> bool {
        match self.user_limit {
            Some(limit) => start < limit && end <= limit,
            None => true,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}
