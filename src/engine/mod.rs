//! # Spatial Query Engine Interface
//!
//! The write engine never talks to a database directly; it goes through the
//! [`SpatialEngine`] trait. An engine executes queries returning geometry as
//! WKB, answers the two aggregate questions the metadata preparer asks
//! (coordinate extent, distinct geometry types), and optionally performs a
//! native bulk export that writes data and footer metadata in one atomic
//! engine call.
//!
//! Two implementations ship with the crate:
//!
//! - [`TableEngine`]: in-memory engine over registered Arrow tables. Always
//!   available; backs table-based writes and the test suite.
//! - [`duckdb::DuckDbEngine`]: DuckDB-backed engine behind the `duckdb`
//!   cargo feature, using the spatial extension for aggregates and
//!   `COPY ... (FORMAT PARQUET, KV_METADATA ...)` for native export.
//!
//! The engine handle is owned by the caller and injected into every call;
//! the write engine holds no process-wide connection state.

mod table;

#[cfg(feature = "duckdb")]
pub mod duckdb;

pub use table::TableEngine;

use std::path::Path;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::geo::Bbox;
use crate::writer::CompressionSpec;

/// Errors reported by a spatial query engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A query failed to parse or execute.
    #[error("query failed: {0}")]
    Query(String),

    /// The engine hit its memory cap mid-operation.
    #[error("engine out of memory: {0}")]
    OutOfMemory(String),

    /// The engine ran out of disk space mid-operation.
    #[error("engine out of disk space: {0}")]
    DiskFull(String),

    /// The named source (table or query) is not known to the engine.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// A geometry value could not be decoded.
    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),

    /// The engine does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// I/O error inside the engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error inside the engine.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error during native export.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl EngineError {
    /// True for errors the write engine classifies as resource exhaustion.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, EngineError::OutOfMemory(_) | EngineError::DiskFull(_))
    }
}

/// An immutable, schema-tagged collection of record batches.
///
/// This is the in-memory "table" form accepted by
/// [`WriteStrategy::write_from_table`](crate::writer::WriteStrategy::write_from_table)
/// and by [`SpatialEngine::register_table`].
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// Build a table, validating that every batch matches the schema.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self, EngineError> {
        for batch in &batches {
            if batch.schema() != schema {
                return Err(EngineError::Arrow(arrow::error::ArrowError::SchemaError(
                    "record batch schema does not match table schema".to_string(),
                )));
            }
        }
        Ok(Self { schema, batches })
    }

    /// Build a table from non-empty batches, taking the schema from the first.
    pub fn from_batches(batches: Vec<RecordBatch>) -> Result<Self, EngineError> {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| EngineError::Query("cannot infer schema from zero batches".to_string()))?;
        Self::try_new(schema, batches)
    }

    /// The table schema.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// The underlying record batches.
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total row count across all batches.
    pub fn num_rows(&self) -> u64 {
        self.batches.iter().map(|b| b.num_rows() as u64).sum()
    }
}

/// A pull-based stream of record batches with a known schema.
///
/// The writer consumes one batch at a time and blocks until it is written
/// before requesting the next, so peak memory is bounded by batch size.
pub struct BatchIter {
    schema: SchemaRef,
    inner: Box<dyn Iterator<Item = Result<RecordBatch, EngineError>> + Send>,
}

impl BatchIter {
    /// Wrap an iterator of batch results.
    pub fn new(
        schema: SchemaRef,
        inner: Box<dyn Iterator<Item = Result<RecordBatch, EngineError>> + Send>,
    ) -> Self {
        Self { schema, inner }
    }

    /// Schema of every batch the stream will yield.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}

impl Iterator for BatchIter {
    type Item = Result<RecordBatch, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl std::fmt::Debug for BatchIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchIter")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Options for a native engine-side Parquet export.
#[derive(Debug, Clone)]
pub struct NativeExportOptions {
    /// Compression codec and level for the exported file.
    pub compression: CompressionSpec,
    /// Explicit row-group row count, or `None` for the engine default.
    pub row_group_rows: Option<usize>,
    /// Footer key/value pairs written atomically with the data.
    pub kv_metadata: Vec<(String, String)>,
}

impl NativeExportOptions {
    /// Export options with the given compression and no footer metadata.
    pub fn new(compression: CompressionSpec) -> Self {
        Self {
            compression,
            row_group_rows: None,
            kv_metadata: Vec::new(),
        }
    }
}

/// Resource caps applied to an engine before a streaming or native write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineLimits {
    /// Memory cap in bytes, or `None` to leave the engine's limit alone.
    pub memory_limit_bytes: Option<u64>,
    /// Execution thread cap, or `None` to leave it alone. Streaming paths
    /// set this to 1 so memory stays proportional to batch size rather than
    /// to engine parallelism.
    pub threads: Option<usize>,
}

/// A spatial query engine collaborator.
///
/// `source` arguments name either a registered table or, for SQL-capable
/// engines, a full query; geometry columns are expected to hold WKB.
pub trait SpatialEngine {
    /// Schema of the result set, available before any row is produced.
    fn schema(&self, source: &str) -> Result<SchemaRef, EngineError>;

    /// Exact row count of the result set.
    fn count_rows(&self, source: &str) -> Result<u64, EngineError>;

    /// Execute the query and stream results in batches of at most
    /// `batch_size` rows.
    fn query_batches(&self, source: &str, batch_size: usize) -> Result<BatchIter, EngineError>;

    /// Aggregate coordinate extent (MIN/MAX per axis, including Z when
    /// `include_z`). Returns `None` for an empty result set.
    fn extent(
        &self,
        source: &str,
        geometry_column: &str,
        include_z: bool,
    ) -> Result<Option<Bbox>, EngineError>;

    /// Distinct geometry type names as the engine reports them (the
    /// metadata preparer canonicalizes them to GeoParquet names). Empty for a
    /// zero-row result.
    fn distinct_geometry_types(
        &self,
        source: &str,
        geometry_column: &str,
    ) -> Result<Vec<String>, EngineError>;

    /// Native bulk export: write the result set to `output` as Parquet in a
    /// single engine call, embedding `options.kv_metadata` in the footer.
    /// Returns the number of rows written.
    fn export_parquet(
        &self,
        source: &str,
        output: &Path,
        options: &NativeExportOptions,
    ) -> Result<u64, EngineError>;

    /// Register an in-memory table under a name so `source` strings can
    /// refer to it.
    fn register_table(&self, name: &str, table: Table) -> Result<(), EngineError>;

    /// Apply resource caps ahead of a memory-sensitive operation.
    fn limit_resources(&self, limits: &EngineLimits) -> Result<(), EngineError>;
}
