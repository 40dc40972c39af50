//! # GeoParquet Write Engine
//!
//! The full pipeline: build a [`WriteContext`], prepare metadata, select a
//! strategy, run it through the atomic-write wrapper, and optionally hand
//! the finished file to a remote store. [`write_query`] and [`write_table`]
//! are the one-call entry points; the strategy types are public for callers
//! that want to drive a specific strategy directly.
//!
//! Each write call is synchronous and single-threaded from the caller's
//! view; the one-shot state machine is
//! `INIT -> CONTEXT_BUILT -> METADATA_PREPARED -> STRATEGY_SELECTED ->
//! WRITING -> SUCCESS (-> UPLOADING -> DONE)`, with any failure routing
//! through temp-file cleanup instead.

mod atomic;
mod config;
mod disk_rewrite;
mod in_memory;
mod native;
mod outcome;
mod strategy;
mod streaming;


pub use atomic::atomic_write;
pub use config::{
    Codec, CompressionSpec, RowGroupSpec, WriterOptions, DEFAULT_BATCH_SIZE,
    ESTIMATED_ROW_WIDTH_BYTES,
};
pub use disk_rewrite::DiskRewriteStrategy;
pub use in_memory::InMemoryStrategy;
pub use native::NativeStreamingStrategy;
pub use outcome::WriteOutcome;
pub use strategy::{
    select_strategy, SelectorTuning, StrategyKind, WriteStrategy, DEFAULT_MEMORY_FRACTION,
    DEFAULT_RESERVED_MEMORY_BYTES,
};
pub use streaming::StreamingStrategy;

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::context::WriteContext;
use crate::engine::{SpatialEngine, Table};
use crate::error::WriteError;
use crate::metadata::{prepare, PrepareOptions};
use crate::remote::{RemoteStore, RemoteTarget};

/// Options for a full pipeline write.
#[derive(Debug, Clone, Default)]
pub struct GeoWriteOptions {
    /// Metadata preparation options (version, geometry column, CRS,
    /// preserve flags).
    pub prepare: PrepareOptions,
    /// Writer-side options (compression, row groups, batch size).
    pub writer: WriterOptions,
    /// Explicitly requested strategy, bypassing automatic selection.
    pub strategy: Option<StrategyKind>,
    /// Selector tuning knobs.
    pub tuning: SelectorTuning,
    /// Estimated row count, when the caller knows it. Rows are converted
    /// to bytes with [`ESTIMATED_ROW_WIDTH_BYTES`] unless `estimated_bytes`
    /// is also given.
    pub estimated_rows: Option<u64>,
    /// Estimated materialized size in bytes, when the caller knows it.
    pub estimated_bytes: Option<u64>,
    /// Available memory override; `None` uses the detected value.
    pub available_memory_bytes: Option<u64>,
}

/// Write the result of `source` to `destination` as GeoParquet.
///
/// `destination` may be a local path or a remote URI; remote destinations
/// require `remote` to be supplied and are staged locally first.
pub fn write_query(
    engine: &dyn SpatialEngine,
    source: &str,
    destination: &str,
    options: &GeoWriteOptions,
    remote: Option<&dyn RemoteStore>,
) -> Result<WriteOutcome, WriteError> {
    run_pipeline(engine, Input::Query(source), destination, options, remote)
}

/// Write an in-memory table to `destination` as GeoParquet.
///
/// The table is registered with the engine so metadata aggregates can run
/// against it; the data write itself may or may not go through the engine
/// depending on the chosen strategy.
pub fn write_table(
    engine: &dyn SpatialEngine,
    table: &Table,
    destination: &str,
    options: &GeoWriteOptions,
    remote: Option<&dyn RemoteStore>,
) -> Result<WriteOutcome, WriteError> {
    run_pipeline(engine, Input::Table(table), destination, options, remote)
}

enum Input<'a> {
    Query(&'a str),
    Table(&'a Table),
}

fn run_pipeline(
    engine: &dyn SpatialEngine,
    input: Input<'_>,
    destination: &str,
    options: &GeoWriteOptions,
    remote: Option<&dyn RemoteStore>,
) -> Result<WriteOutcome, WriteError> {
    let target = RemoteTarget::parse(destination);
    if target.is_some() && remote.is_none() {
        return Err(WriteError::Configuration(format!(
            "remote destination {destination} requires a remote store"
        )));
    }

    // Table inputs get registered up front so metadata aggregates have a
    // source name to query.
    let source = match &input {
        Input::Query(q) => (*q).to_string(),
        Input::Table(table) => strategy::register_ephemeral(engine, table)?,
    };

    let metadata = prepare(engine, &source, &options.prepare)?;
    debug!("metadata prepared for {destination}");

    let estimated_rows = match (options.estimated_rows, &input) {
        (Some(rows), _) => Some(rows),
        (None, Input::Table(table)) => Some(table.num_rows()),
        (None, Input::Query(_)) => None,
    };
    let estimated_bytes = options
        .estimated_bytes
        .or(estimated_rows.map(|r| r.saturating_mul(ESTIMATED_ROW_WIDTH_BYTES)));

    let mut builder = WriteContext::builder(destination)
        .target_spec_version(options.prepare.version)
        .needs_metadata_rewrite(metadata.requires_sidecar());
    if let Some(rows) = estimated_rows {
        builder = builder.estimated_rows(rows);
    }
    if let Some(bytes) = estimated_bytes {
        builder = builder.estimated_bytes(bytes);
    }
    if options.available_memory_bytes.is_some() {
        builder = builder.available_memory_bytes(options.available_memory_bytes);
    }
    let context = builder.build();

    let kind = match options.strategy {
        Some(requested) => {
            debug!("using explicitly requested {requested} strategy");
            requested
        }
        None => select_strategy(&context, &options.tuning),
    };
    let strategy = kind.instantiate(&context, &options.tuning);
    // Only explicit requests can get here with an unsuitable strategy; the
    // selector never picks one.
    if !strategy.can_handle(&context) {
        return Err(WriteError::Configuration(format!(
            "{} strategy cannot handle this write (remote destinations stage through in_memory)",
            strategy.name()
        )));
    }

    let outcome = match target {
        None => run_strategy(
            engine,
            &input,
            &source,
            Path::new(destination),
            &metadata,
            options,
            strategy.as_ref(),
        )?,
        Some(target) => {
            let staging = tempfile::Builder::new().prefix("geopq-upload-").tempdir()?;
            let name = match target.file_name() {
                "" => "output.parquet",
                n => n,
            };
            let local = staging.path().join(name);
            let outcome = run_strategy(
                engine,
                &input,
                &source,
                &local,
                &metadata,
                options,
                strategy.as_ref(),
            )?;
            // remote presence was checked before any work started
            let store = remote.ok_or_else(|| {
                WriteError::Configuration("remote store disappeared mid-write".to_string())
            })?;
            info!("uploading {} to {}", local.display(), target.uri);
            if let Err(e) = store.upload(&local, &target) {
                // Keep the staged file so the upload can be retried.
                let kept = staging.into_path().join(name);
                return Err(WriteError::Upload {
                    uri: target.uri.clone(),
                    local_path: kept,
                    reason: e.to_string(),
                });
            }
            WriteOutcome {
                path: PathBuf::from(&target.uri),
                ..outcome
            }
        }
    };
    info!("{outcome}");
    Ok(outcome)
}

fn run_strategy(
    engine: &dyn SpatialEngine,
    input: &Input<'_>,
    source: &str,
    output: &Path,
    metadata: &crate::metadata::GeoMetadata,
    options: &GeoWriteOptions,
    strategy: &dyn WriteStrategy,
) -> Result<WriteOutcome, WriteError> {
    debug!("writing {} via {} strategy", output.display(), strategy.name());
    match input {
        Input::Table(table) => {
            strategy.write_from_table(engine, table, output, metadata, &options.writer)
        }
        Input::Query(_) => {
            strategy.write_from_query(engine, source, output, metadata, &options.writer)
        }
    }
}
