//! Engine-native export strategy.

use std::path::Path;

use log::debug;

use crate::context::WriteContext;
use crate::engine::{EngineLimits, NativeExportOptions, SpatialEngine};
use crate::error::{WriteError, WritePhase};
use crate::metadata::GeoMetadata;

use super::atomic::atomic_write;
use super::config::{WriterOptions, ESTIMATED_ROW_WIDTH_BYTES};
use super::outcome::WriteOutcome;
use super::strategy::{footer_kv, WriteStrategy};

/// Delegates data movement to the engine's bulk export.
///
/// The prepared metadata travels as an engine-native key/value map, so data
/// and footer land in one engine call and no rewrite pass exists. Before
/// exporting, the engine is capped to one thread and to the memory budget
/// the selector computed, which keeps the export's footprint near-constant
/// regardless of dataset size.
#[derive(Debug)]
pub struct NativeStreamingStrategy {
    memory_limit: Option<u64>,
}

impl NativeStreamingStrategy {
    /// A strategy that caps the engine at `memory_limit` bytes, or leaves
    /// the engine's own limit alone when `None`.
    pub fn new(memory_limit: Option<u64>) -> Self {
        Self { memory_limit }
    }
}

impl WriteStrategy for NativeStreamingStrategy {
    fn name(&self) -> &'static str {
        "native_streaming"
    }

    fn write_from_query(
        &self,
        engine: &dyn SpatialEngine,
        source: &str,
        output: &Path,
        metadata: &GeoMetadata,
        options: &WriterOptions,
    ) -> Result<WriteOutcome, WriteError> {
        engine
            .limit_resources(&EngineLimits {
                memory_limit_bytes: self.memory_limit,
                threads: Some(1),
            })
            .map_err(|e| WriteError::from(e).in_phase("native_streaming", WritePhase::Export))?;
        if let Some(limit) = self.memory_limit {
            debug!("native_streaming: engine memory capped at {limit} bytes");
        }

        let export = NativeExportOptions {
            compression: options.compression,
            row_group_rows: options.row_group.resolve_rows(ESTIMATED_ROW_WIDTH_BYTES),
            kv_metadata: footer_kv(metadata)?,
        };
        let rows = atomic_write(self.name(), WritePhase::Export, output, |temp| {
            Ok(engine.export_parquet(source, temp, &export)?)
        })?;
        debug!("native_streaming: wrote {rows} rows to {}", output.display());
        Ok(WriteOutcome {
            path: output.to_path_buf(),
            rows_written: rows,
            strategy: self.name(),
        })
    }

    fn can_handle(&self, context: &WriteContext) -> bool {
        !context.is_remote
    }
}
