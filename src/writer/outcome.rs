//! The result record returned by every successful write.

use std::path::PathBuf;

/// What a completed write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Where the finished file landed. For remote destinations this is the
    /// remote URI after a successful upload.
    pub path: PathBuf,
    /// Rows written to the output file.
    pub rows_written: u64,
    /// Name of the strategy that performed the write.
    pub strategy: &'static str,
}

impl std::fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows -> {} ({} strategy)",
            self.rows_written,
            self.path.display(),
            self.strategy
        )
    }
}
