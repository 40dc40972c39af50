//! The strategy seam and the deterministic selector.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::context::WriteContext;
use crate::engine::{SpatialEngine, Table};
use crate::error::WriteError;
use crate::metadata::GeoMetadata;

use super::config::WriterOptions;
use super::disk_rewrite::DiskRewriteStrategy;
use super::in_memory::InMemoryStrategy;
use super::native::NativeStreamingStrategy;
use super::outcome::WriteOutcome;
use super::streaming::StreamingStrategy;

/// One way of moving query results into a GeoParquet file.
///
/// Contract: on success the output path holds a single valid Parquet file
/// with the geo metadata embedded under its reserved footer key, readable by
/// any Parquet reader. On failure the output path does not exist; every
/// strategy writes through [`atomic_write`](super::atomic::atomic_write).
pub trait WriteStrategy {
    /// The strategy name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Write the result of `source` (a query or registered table name) to
    /// `output` with `metadata` embedded. Returns rows written.
    fn write_from_query(
        &self,
        engine: &dyn SpatialEngine,
        source: &str,
        output: &Path,
        metadata: &GeoMetadata,
        options: &WriterOptions,
    ) -> Result<WriteOutcome, WriteError>;

    /// Write an in-memory table to `output` with `metadata` embedded.
    fn write_from_table(
        &self,
        engine: &dyn SpatialEngine,
        table: &Table,
        output: &Path,
        metadata: &GeoMetadata,
        options: &WriterOptions,
    ) -> Result<WriteOutcome, WriteError> {
        let name = register_ephemeral(engine, table)?;
        self.write_from_query(engine, &name, output, metadata, options)
    }

    /// Whether this strategy can run under the given context.
    fn can_handle(&self, context: &WriteContext) -> bool;
}

static TABLE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Register `table` with the engine under a fresh generated name so the
/// query path can be reused for table writes.
pub(super) fn register_ephemeral(
    engine: &dyn SpatialEngine,
    table: &Table,
) -> Result<String, WriteError> {
    let name = format!("__geopq_table_{}", TABLE_SEQ.fetch_add(1, Ordering::Relaxed));
    engine.register_table(&name, table.clone())?;
    Ok(name)
}

/// The footer key/value pairs for `metadata`, empty in no-sidecar mode.
pub(super) fn footer_kv(metadata: &GeoMetadata) -> Result<Vec<(String, String)>, WriteError> {
    Ok(metadata.footer_entry()?.into_iter().collect())
}

/// The selectable strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Materialize everything, write once.
    InMemory,
    /// Stream fixed-size batches through one open writer.
    Streaming,
    /// Delegate to the engine's native export with embedded metadata.
    NativeStreamingWithMetadata,
    /// Bulk export to a temp file, then rewrite row group by row group.
    DiskRewrite,
}

impl StrategyKind {
    /// The strategy name used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::InMemory => "in_memory",
            StrategyKind::Streaming => "streaming",
            StrategyKind::NativeStreamingWithMetadata => "native_streaming",
            StrategyKind::DiskRewrite => "disk_rewrite",
        }
    }

    /// Parse a strategy name as accepted from explicit requests.
    pub fn parse(name: &str) -> Result<Self, WriteError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "in_memory" | "in-memory" => Ok(StrategyKind::InMemory),
            "streaming" => Ok(StrategyKind::Streaming),
            "native_streaming" | "native" => Ok(StrategyKind::NativeStreamingWithMetadata),
            "disk_rewrite" | "disk-rewrite" => Ok(StrategyKind::DiskRewrite),
            other => Err(WriteError::Configuration(format!(
                "unknown strategy: {other}"
            ))),
        }
    }

    /// Instantiate the strategy, sizing engine limits from the context.
    pub fn instantiate(self, context: &WriteContext, tuning: &SelectorTuning) -> Box<dyn WriteStrategy> {
        match self {
            StrategyKind::InMemory => Box::new(InMemoryStrategy::new()),
            StrategyKind::Streaming => Box::new(StreamingStrategy::new()),
            StrategyKind::NativeStreamingWithMetadata => Box::new(NativeStreamingStrategy::new(
                context
                    .available_memory_bytes
                    .map(|avail| tuning.engine_memory_cap(avail)),
            )),
            StrategyKind::DiskRewrite => Box::new(DiskRewriteStrategy::new()),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory headroom reserved for the host process before sizing the engine,
/// 512 MiB. An unvalidated default carried over from operational experience,
/// not a measured invariant; override via [`SelectorTuning`].
pub const DEFAULT_RESERVED_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// Fraction of post-reservation memory the materialized result may occupy
/// before the selector switches to native streaming. Same caveat as
/// [`DEFAULT_RESERVED_MEMORY_BYTES`].
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.5;

/// Overridable knobs for the automatic strategy selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectorTuning {
    /// Bytes reserved from available memory before thresholding.
    pub reserved_memory_bytes: u64,
    /// Fraction of the remaining memory the result may occupy in memory.
    pub memory_fraction: f64,
}

impl Default for SelectorTuning {
    fn default() -> Self {
        Self {
            reserved_memory_bytes: DEFAULT_RESERVED_MEMORY_BYTES,
            memory_fraction: DEFAULT_MEMORY_FRACTION,
        }
    }
}

impl SelectorTuning {
    /// The in-memory size threshold for `available` bytes of memory.
    pub fn memory_threshold(&self, available: u64) -> u64 {
        let headroom = available.saturating_sub(self.reserved_memory_bytes);
        (headroom as f64 * self.memory_fraction) as u64
    }

    /// The memory cap handed to the engine for native streaming.
    pub fn engine_memory_cap(&self, available: u64) -> u64 {
        self.memory_threshold(available).max(1)
    }
}

/// Deterministic automatic strategy selection.
///
/// 1. No metadata rewrite needed: in-memory, the cheapest single pass.
/// 2. Remote destination: in-memory, staged to a local temp file.
/// 3. Size and memory both known: native streaming when the estimate
///    exceeds the memory threshold, in-memory otherwise.
/// 4. No usable estimate: in-memory. Without a size there is no safe
///    streaming decision, a known limitation.
pub fn select_strategy(context: &WriteContext, tuning: &SelectorTuning) -> StrategyKind {
    let kind = if !context.needs_metadata_rewrite {
        StrategyKind::InMemory
    } else if context.is_remote {
        StrategyKind::InMemory
    } else if let (Some(estimated), Some(available)) =
        (context.estimated_bytes, context.available_memory_bytes)
    {
        if estimated > tuning.memory_threshold(available) {
            StrategyKind::NativeStreamingWithMetadata
        } else {
            StrategyKind::InMemory
        }
    } else {
        StrategyKind::InMemory
    };
    debug!(
        "selected {kind} strategy (estimated_bytes={:?}, available={:?}, remote={}, rewrite={})",
        context.estimated_bytes,
        context.available_memory_bytes,
        context.is_remote,
        context.needs_metadata_rewrite
    );
    kind
}
