use serde::{Deserialize, Serialize};

/// Counters for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Candidate files found by the scanner
    pub files_scanned: usize,

    /// Files extracted during this run
    pub files_loaded: usize,

    /// Files skipped because their content hash was already processed
    pub files_unchanged: usize,

    /// Files that produced no functions because extraction failed
    pub files_failed: usize,

    /// Functions known after Load (fresh and resumed)
    pub functions: usize,

    pub clusters: usize,

    pub multi_member_clusters: usize,

    /// Wall time in milliseconds
    pub time_ms: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files that went through Load without error, including unchanged ones
    #[must_use]
    pub const fn files_ok(&self) -> usize {
        self.files_loaded + self.files_unchanged
    }
}
