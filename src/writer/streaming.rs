//! Batched streaming strategy.

use std::fs::File;
use std::path::Path;

use log::debug;
use parquet::arrow::ArrowWriter;

use crate::context::WriteContext;
use crate::engine::{EngineLimits, SpatialEngine};
use crate::error::{WriteError, WritePhase};
use crate::metadata::GeoMetadata;

use super::atomic::atomic_write;
use super::config::WriterOptions;
use super::outcome::WriteOutcome;
use super::strategy::{footer_kv, WriteStrategy};

/// Streams fixed-size batches through a single open writer.
///
/// The metadata handed in is final (the preparer already ran, which is the
/// second pass of the two-pass design when aggregates had to be
/// recomputed), so the writer opens once with the finished footer and never
/// reopens. Peak memory is one batch. Backpressure is pull-based: the next
/// batch is requested only after the previous one is written. The engine is
/// pinned to one execution thread so its memory use tracks batch size, not
/// engine parallelism.
#[derive(Debug, Default)]
pub struct StreamingStrategy;

impl StreamingStrategy {
    /// A new instance; the strategy is stateless.
    pub fn new() -> Self {
        Self
    }
}

impl WriteStrategy for StreamingStrategy {
    fn name(&self) -> &'static str {
        "streaming"
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
                memory_limit_bytes: None,
                threads: Some(1),
            })
            .map_err(|e| WriteError::from(e).in_phase("streaming", WritePhase::Stream))?;

        let kv = footer_kv(metadata)?;
        let rows = atomic_write(self.name(), WritePhase::Stream, output, |temp| {
            let mut iter = engine.query_batches(source, options.batch_size)?;
            let props = options.to_writer_properties(&kv)?;
            let file = File::create(temp)?;
            let mut writer = ArrowWriter::try_new(file, iter.schema(), Some(props))?;
            let mut rows = 0u64;
            for batch in iter.by_ref() {
                let batch = batch?;
                rows += batch.num_rows() as u64;
                writer.write(&batch)?;
            }
            writer.close()?;
            Ok(rows)
        })?;
        debug!("streaming: wrote {rows} rows to {}", output.display());
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
