//! Materialize-everything strategy.

use std::fs::File;
use std::path::Path;

use log::debug;
use parquet::arrow::ArrowWriter;

use crate::context::WriteContext;
use crate::engine::{SpatialEngine, Table};
use crate::error::{WriteError, WritePhase};
use crate::metadata::GeoMetadata;

use super::atomic::atomic_write;
use super::config::WriterOptions;
use super::outcome::WriteOutcome;
use super::strategy::{footer_kv, WriteStrategy};

/// Executes the query, holds the full result in memory, writes once.
///
/// Memory cost is the whole dataset, which makes it the simplest and
/// fastest choice for results that fit, the mandatory staging path for
/// remote destinations, and the fallback when no size estimate exists.
#[derive(Debug, Default)]
pub struct InMemoryStrategy;

impl InMemoryStrategy {
    /// A new instance; the strategy is stateless.
    pub fn new() -> Self {
        Self
    }

    fn write_batches(
        &self,
        table: &Table,
        output: &Path,
        metadata: &GeoMetadata,
        options: &WriterOptions,
    ) -> Result<WriteOutcome, WriteError> {
        let kv = footer_kv(metadata)?;
        let rows = atomic_write(self.name(), WritePhase::Stream, output, |temp| {
            let props = options.to_writer_properties(&kv)?;
            let file = File::create(temp)?;
            let mut writer = ArrowWriter::try_new(file, table.schema(), Some(props))?;
            for batch in table.batches() {
                writer.write(batch)?;
            }
            writer.close()?;
            Ok(table.num_rows())
        })?;
        debug!("in_memory: wrote {rows} rows to {}", output.display());
        Ok(WriteOutcome {
            path: output.to_path_buf(),
            rows_written: rows,
            strategy: self.name(),
        })
    }
}

impl WriteStrategy for InMemoryStrategy {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    fn write_from_query(
        &self,
        engine: &dyn SpatialEngine,
        source: &str,
        output: &Path,
        metadata: &GeoMetadata,
        options: &WriterOptions,
    ) -> Result<WriteOutcome, WriteError> {
        let tag = |e: WriteError| e.in_phase("in_memory", WritePhase::Export);
        let iter = engine
            .query_batches(source, options.batch_size)
            .map_err(|e| tag(e.into()))?;
        let schema = iter.schema();
        let batches = iter
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| tag(e.into()))?;
        let table = Table::try_new(schema, batches).map_err(|e| tag(e.into()))?;
        self.write_batches(&table, output, metadata, options)
    }

    fn write_from_table(
        &self,
        _engine: &dyn SpatialEngine,
        table: &Table,
        output: &Path,
        metadata: &GeoMetadata,
        options: &WriterOptions,
    ) -> Result<WriteOutcome, WriteError> {
        // Already materialized; no engine round trip needed.
        self.write_batches(table, output, metadata, options)
    }

    fn can_handle(&self, _context: &WriteContext) -> bool {
        true
    }
}
