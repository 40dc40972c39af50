//! The per-write decision record.
//!
//! A [`WriteContext`] gathers every fact the strategy selector needs into
//! one immutable snapshot: size estimates, destination kind, target version,
//! whether a metadata rewrite is required, and how much memory is available.
//! It is built once per write call, consumed by the selector, and discarded.

use std::fs;
use std::path::{Path, PathBuf};

use crate::metadata::GeoParquetVersion;
use crate::remote::RemoteTarget;

/// Immutable facts about one write call, consumed by the strategy selector.
#[derive(Debug, Clone)]
pub struct WriteContext {
    /// Estimated row count of the result set, if known.
    pub estimated_rows: Option<u64>,
    /// Estimated size of the materialized result in bytes, if known.
    pub estimated_bytes: Option<u64>,
    /// The final destination path (local form; remote URIs keep the URI).
    pub output_path: PathBuf,
    /// Whether the destination is a remote URI.
    pub is_remote: bool,
    /// Target GeoParquet version.
    pub target_spec_version: GeoParquetVersion,
    /// Whether the result set has a geometry column at all.
    pub has_geometry_column: bool,
    /// Whether geo metadata must be attached after (or during) the data
    /// write. `false` only in native-geometry, no-sidecar mode.
    pub needs_metadata_rewrite: bool,
    /// Available system memory in bytes, if it could be determined.
    pub available_memory_bytes: Option<u64>,
}

impl WriteContext {
    /// Start building a context for the given destination. Remote detection
    /// and memory detection run here; everything else defaults to unknown.
    pub fn builder(output: &str) -> WriteContextBuilder {
        WriteContextBuilder {
            output: output.to_string(),
            estimated_rows: None,
            estimated_bytes: None,
            target_spec_version: GeoParquetVersion::default(),
            has_geometry_column: true,
            needs_metadata_rewrite: true,
            available_memory_bytes: detect_available_memory(),
        }
    }
}

/// Builder for [`WriteContext`].
#[derive(Debug, Clone)]
pub struct WriteContextBuilder {
    output: String,
    estimated_rows: Option<u64>,
    estimated_bytes: Option<u64>,
    target_spec_version: GeoParquetVersion,
    has_geometry_column: bool,
    needs_metadata_rewrite: bool,
    available_memory_bytes: Option<u64>,
}

impl WriteContextBuilder {
    /// Set the estimated row count.
    pub fn estimated_rows(mut self, rows: u64) -> Self {
        self.estimated_rows = Some(rows);
        self
    }

    /// Set the estimated materialized size in bytes.
    pub fn estimated_bytes(mut self, bytes: u64) -> Self {
        self.estimated_bytes = Some(bytes);
        self
    }

    /// Set the target GeoParquet version.
    pub fn target_spec_version(mut self, version: GeoParquetVersion) -> Self {
        self.target_spec_version = version;
        self
    }

    /// Record whether the result set has a geometry column.
    pub fn has_geometry_column(mut self, has: bool) -> Self {
        self.has_geometry_column = has;
        self
    }

    /// Record whether geo metadata must be attached to the output.
    pub fn needs_metadata_rewrite(mut self, needs: bool) -> Self {
        self.needs_metadata_rewrite = needs;
        self
    }

    /// Override the detected available memory (mainly for tests and for
    /// callers running under external memory limits).
    pub fn available_memory_bytes(mut self, bytes: Option<u64>) -> Self {
        self.available_memory_bytes = bytes;
        self
    }

    /// Finalize the context.
    pub fn build(self) -> WriteContext {
        let is_remote = RemoteTarget::parse(&self.output).is_some();
        WriteContext {
            estimated_rows: self.estimated_rows,
            estimated_bytes: self.estimated_bytes,
            output_path: PathBuf::from(&self.output),
            is_remote,
            target_spec_version: self.target_spec_version,
            has_geometry_column: self.has_geometry_column,
            needs_metadata_rewrite: self.needs_metadata_rewrite,
            available_memory_bytes: self.available_memory_bytes,
        }
    }
}

/// Best-effort available-memory probe.
///
/// Reads `MemAvailable` from `/proc/meminfo` on Linux. Returns `None` on
/// other platforms or when the probe fails; the selector then falls back to
/// the conservative in-memory default.
pub fn detect_available_memory() -> Option<u64> {
    parse_meminfo(Path::new("/proc/meminfo"))
}

fn parse_meminfo(path: &Path) -> Option<u64> {
    let contents = fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kib * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_builder_defaults() {
        let ctx = WriteContext::builder("/tmp/out.parquet")
            .available_memory_bytes(None)
            .build();
        assert!(!ctx.is_remote);
        assert!(ctx.needs_metadata_rewrite);
        assert!(ctx.estimated_bytes.is_none());
        assert_eq!(ctx.output_path, PathBuf::from("/tmp/out.parquet"));
    }

    #[test]
    fn test_remote_uri_detected() {
        let ctx = WriteContext::builder("s3://bucket/out.parquet").build();
        assert!(ctx.is_remote);
        let local = WriteContext::builder("./out.parquet").build();
        assert!(!local.is_remote);
    }

    #[test]
    fn test_parse_meminfo() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "MemTotal:       16384000 kB").unwrap();
        writeln!(file, "MemFree:         1024000 kB").unwrap();
        writeln!(file, "MemAvailable:    8192000 kB").unwrap();
        assert_eq!(parse_meminfo(file.path()), Some(8_192_000 * 1024));
    }

    #[test]
    fn test_parse_meminfo_missing_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "MemTotal:       16384000 kB").unwrap();
        assert_eq!(parse_meminfo(file.path()), None);
    }
}
