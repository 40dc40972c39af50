//! Error taxonomy for the write engine.
//!
//! Configuration problems fail before any I/O. Everything raised inside a
//! strategy's write body routes through the atomic-write wrapper, which
//! deletes the temp file and re-raises with the strategy name and phase
//! attached, so the destination path is guaranteed absent after a failure.
//! Upload failures are the one exception: the staged local file is kept and
//! its path is reported so the caller can retry the upload without
//! rewriting the data.

use std::path::PathBuf;

use crate::engine::EngineError;

/// The phase of the write pipeline in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// Metadata preparation (aggregate queries, version policy).
    Prepare,
    /// Bulk export through the query engine.
    Export,
    /// Batch streaming through an open writer.
    Stream,
    /// Row-group rewrite of a staged file.
    Rewrite,
    /// Closing and renaming the output file.
    Finalize,
    /// Handoff to the remote storage collaborator.
    Upload,
}

impl std::fmt::Display for WritePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WritePhase::Prepare => "prepare",
            WritePhase::Export => "export",
            WritePhase::Stream => "stream",
            WritePhase::Rewrite => "rewrite",
            WritePhase::Finalize => "finalize",
            WritePhase::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while writing GeoParquet output.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Invalid option combination, detected before any I/O. No cleanup is
    /// needed; nothing has been touched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An aggregate metadata query failed, e.g. on malformed geometry.
    #[error("metadata computation failed: {0}")]
    MetadataComputation(String),

    /// The query engine ran out of memory or disk mid-write.
    #[error("resource exhaustion in {strategy} strategy during {phase}: {source}")]
    ResourceExhaustion {
        /// Strategy that was executing.
        strategy: &'static str,
        /// Pipeline phase in which the engine gave up.
        phase: WritePhase,
        /// The engine's own report.
        #[source]
        source: EngineError,
    },

    /// A strategy's write body failed after temp-file creation. The temp
    /// file has been deleted; the destination path does not exist.
    #[error("write failed in {strategy} strategy during {phase}: {source}")]
    PartialWrite {
        /// Strategy that was executing.
        strategy: &'static str,
        /// Pipeline phase in which the body failed.
        phase: WritePhase,
        /// The underlying failure.
        #[source]
        source: Box<WriteError>,
    },

    /// Remote handoff failed after a successful local write. The local file
    /// is preserved at `local_path` so the upload can be retried without
    /// rerunning the data write.
    #[error("upload to {uri} failed ({reason}); local file preserved at {local_path}")]
    Upload {
        /// The remote destination URI.
        uri: String,
        /// Where the finished local file was kept.
        local_path: PathBuf,
        /// Why the upload failed.
        reason: String,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the Arrow library during array operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from the Parquet library during file writing.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Error reported by the spatial query engine.
    #[error("query engine error: {0}")]
    Engine(#[from] EngineError),

    /// JSON serialization error for the footer document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WriteError {
    /// Attach strategy and phase context to an error raised inside a write
    /// body. Engine resource exhaustion keeps its own variant; errors that
    /// already carry context pass through unchanged.
    pub(crate) fn in_phase(self, strategy: &'static str, phase: WritePhase) -> WriteError {
        match self {
            WriteError::Engine(source) if source.is_resource_exhaustion() => {
                WriteError::ResourceExhaustion {
                    strategy,
                    phase,
                    source,
                }
            }
            WriteError::Configuration(_)
            | WriteError::MetadataComputation(_)
            | WriteError::ResourceExhaustion { .. }
            | WriteError::PartialWrite { .. }
            | WriteError::Upload { .. } => self,
            other => WriteError::PartialWrite {
                strategy,
                phase,
                source: Box::new(other),
            },
        }
    }
}
