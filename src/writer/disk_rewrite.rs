//! Two-phase export-then-rewrite strategy.

use std::fs::File;
use std::path::Path;

use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tempfile::Builder;

use crate::context::WriteContext;
use crate::engine::{NativeExportOptions, SpatialEngine};
use crate::error::{WriteError, WritePhase};
use crate::metadata::GeoMetadata;

use super::atomic::atomic_write;
use super::config::{CompressionSpec, WriterOptions, ESTIMATED_ROW_WIDTH_BYTES};
use super::outcome::WriteOutcome;
use super::strategy::{footer_kv, WriteStrategy};

/// Bulk export to a plain temp file, then rewrite it with metadata.
///
/// Phase A lets the engine export as fast as it can, with no geo metadata.
/// Phase B reopens that file one row group at a time and writes each group
/// through a fresh writer carrying the finished footer, so peak memory is
/// one row group. The most portable fallback when native export cannot
/// embed metadata; costs transient double disk space. Both temp files live
/// in the destination directory and are removed on any exit path.
#[derive(Debug, Default)]
pub struct DiskRewriteStrategy {
    phase_a_compression: Option<CompressionSpec>,
}

impl DiskRewriteStrategy {
    /// A strategy whose phase A reuses the target compression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different codec for the intermediate file, e.g. a cheap one
    /// when the target codec compresses slowly.
    pub fn with_phase_a_compression(mut self, compression: CompressionSpec) -> Self {
        self.phase_a_compression = Some(compression);
        self
    }
}

impl WriteStrategy for DiskRewriteStrategy {
    fn name(&self) -> &'static str {
        "disk_rewrite"
    }

    fn write_from_query(
        &self,
        engine: &dyn SpatialEngine,
        source: &str,
        output: &Path,
        metadata: &GeoMetadata,
        options: &WriterOptions,
    ) -> Result<WriteOutcome, WriteError> {
        let tag = |e: WriteError| e.in_phase("disk_rewrite", WritePhase::Export);

        // Phase A: raw export, no geo metadata. Deleted on drop.
        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staged = Builder::new()
            .suffix(".stage.parquet")
            .tempfile_in(dir)
            .map_err(|e| tag(e.into()))?;
        let export = NativeExportOptions {
            compression: self.phase_a_compression.unwrap_or(options.compression),
            row_group_rows: options.row_group.resolve_rows(ESTIMATED_ROW_WIDTH_BYTES),
            kv_metadata: Vec::new(),
        };
        let exported = engine
            .export_parquet(source, staged.path(), &export)
            .map_err(|e| tag(e.into()))?;
        debug!(
            "disk_rewrite: phase A exported {exported} rows to {}",
            staged.path().display()
        );

        // Phase B: rewrite row group by row group with the final footer.
        let kv = footer_kv(metadata)?;
        let rows = atomic_write(self.name(), WritePhase::Rewrite, output, |temp| {
            rewrite_row_groups(staged.path(), temp, &kv, options)
        })?;
        debug!("disk_rewrite: wrote {rows} rows to {}", output.display());
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

fn rewrite_row_groups(
    staged: &Path,
    dest: &Path,
    kv: &[(String, String)],
    options: &WriterOptions,
) -> Result<u64, WriteError> {
    let probe = ParquetRecordBatchReaderBuilder::try_new(File::open(staged)?)?;
    let schema = probe.schema().clone();
    let num_row_groups = probe.metadata().num_row_groups();
    drop(probe);

    let props = options.to_writer_properties(kv)?;
    let mut writer = ArrowWriter::try_new(File::create(dest)?, schema, Some(props))?;
    let mut rows = 0u64;
    for group in 0..num_row_groups {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(staged)?)?
            .with_row_groups(vec![group])
            .build()?;
        for batch in reader {
            let batch = batch?;
            rows += batch.num_rows() as u64;
            writer.write(&batch)?;
        }
    }
    writer.close()?;
    Ok(rows)
}
