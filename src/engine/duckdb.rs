//! DuckDB-backed [`SpatialEngine`], behind the `duckdb` cargo feature.
//!
//! Aggregates run through the spatial extension (`ST_XMin`,
//! `ST_GeometryType`, ...) and native export uses
//! `COPY ... (FORMAT PARQUET, KV_METADATA {...})`, which writes data and
//! footer metadata in one engine call. The connection is owned by this
//! engine; callers construct one per task and drop it when done.

use std::path::Path;
use std::sync::{mpsc, Mutex};
use std::thread;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use log::debug;

use crate::geo::Bbox;
use crate::metadata::{extent_query, geometry_types_query};
use crate::writer::Codec;

use super::{BatchIter, EngineError, EngineLimits, NativeExportOptions, SpatialEngine, Table};

/// A [`SpatialEngine`] over a DuckDB connection.
pub struct DuckDbEngine {
    conn: Mutex<Connection>,
}

impl DuckDbEngine {
    /// Open an in-memory database and load the spatial extension.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(map_duckdb)?;
        Self::from_connection(conn)
    }

    /// Open (or create) a database file and load the spatial extension.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path).map_err(map_duckdb)?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection, loading the spatial extension on it.
    pub fn from_connection(conn: Connection) -> Result<Self, EngineError> {
        conn.execute_batch("INSTALL spatial; LOAD spatial;")
            .map_err(map_duckdb)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, duckdb::Error>,
    ) -> Result<T, EngineError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn).map_err(map_duckdb)
    }
}

/// Classify a DuckDB error, keeping resource failures distinguishable.
fn map_duckdb(err: duckdb::Error) -> EngineError {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("out of memory") || lower.contains("could not allocate") {
        EngineError::OutOfMemory(text)
    } else if lower.contains("no space left") || lower.contains("disk full") {
        EngineError::DiskFull(text)
    } else {
        EngineError::Query(text)
    }
}

/// `source` as a FROM-clause relation: bare table names pass through,
/// anything that reads like SQL (SELECT, WITH, VALUES, or an already
/// parenthesized expression) is parenthesized as a subquery.
fn relation(source: &str) -> String {
    let trimmed = source.trim();
    let has_prefix = |kw: &str| {
        trimmed
            .get(..kw.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(kw))
    };
    if trimmed.starts_with('(')
        || has_prefix("select ")
        || has_prefix("with ")
        || has_prefix("values ")
        || has_prefix("values(")
    {
        format!("({trimmed})")
    } else {
        format!("\"{trimmed}\"")
    }
}

/// Slice `batch` into zero-copy chunks of at most `max_rows` rows.
fn chunk_batch(batch: &RecordBatch, max_rows: usize) -> Vec<RecordBatch> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < batch.num_rows() {
        let len = max_rows.min(batch.num_rows() - offset);
        out.push(batch.slice(offset, len));
        offset += len;
    }
    out
}

fn sql_quote(value: &str) -> String {
    value.replace('\'', "''")
}

impl SpatialEngine for DuckDbEngine {
    fn schema(&self, source: &str) -> Result<SchemaRef, EngineError> {
        let sql = format!("SELECT * FROM {} LIMIT 0", relation(source));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let arrow = stmt.query_arrow([])?;
            Ok(arrow.get_schema())
        })
    }

    fn count_rows(&self, source: &str) -> Result<u64, EngineError> {
        let sql = format!("SELECT COUNT(*) FROM {}", relation(source));
        let count: i64 = self.with_conn(|conn| conn.query_row(&sql, [], |row| row.get(0)))?;
        Ok(count.max(0) as u64)
    }

    fn query_batches(&self, source: &str, batch_size: usize) -> Result<BatchIter, EngineError> {
        // The record batch stream cannot outlive the statement, so a cloned
        // connection moves to a producer thread that owns both. The channel
        // holds one batch: the producer blocks until the consumer takes the
        // previous one, keeping peak memory proportional to batch size.
        let sql = format!("SELECT * FROM {}", relation(source));
        let schema = self.schema(source)?;
        let conn = {
            let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            guard.try_clone().map_err(map_duckdb)?
        };
        let batch_size = batch_size.max(1);

        let (tx, rx) = mpsc::sync_channel::<Result<RecordBatch, EngineError>>(1);
        thread::spawn(move || {
            let produce = || -> Result<(), EngineError> {
                let mut stmt = conn.prepare(&sql).map_err(map_duckdb)?;
                let arrow = stmt.query_arrow([]).map_err(map_duckdb)?;
                for batch in arrow {
                    for chunk in chunk_batch(&batch, batch_size) {
                        if tx.send(Ok(chunk)).is_err() {
                            // Consumer dropped the iterator; stop producing.
                            return Ok(());
                        }
                    }
                }
                Ok(())
            };
            if let Err(e) = produce() {
                let _ = tx.send(Err(e));
            }
        });

        Ok(BatchIter::new(schema, Box::new(rx.into_iter())))
    }

    fn extent(
        &self,
        source: &str,
        geometry_column: &str,
        include_z: bool,
    ) -> Result<Option<Bbox>, EngineError> {
        let sql = extent_query(source, geometry_column, include_z);
        let bounds: Vec<Option<f64>> = self.with_conn(|conn| {
            conn.query_row(&sql, [], |row| {
                let n = if include_z { 6 } else { 4 };
                (0..n).map(|i| row.get(i)).collect()
            })
        })?;
        let values: Option<Vec<f64>> = bounds.into_iter().collect();
        Ok(values.and_then(|v| Bbox::from_slice(&v)))
    }

    fn distinct_geometry_types(
        &self,
        source: &str,
        geometry_column: &str,
    ) -> Result<Vec<String>, EngineError> {
        let sql = geometry_types_query(source, geometry_column);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    fn export_parquet(
        &self,
        source: &str,
        output: &Path,
        options: &NativeExportOptions,
    ) -> Result<u64, EngineError> {
        let codec = match options.compression.codec() {
            Codec::Lz4 => "lz4_raw".to_string(),
            other => other.name().to_lowercase(),
        };
        let mut copy_options = vec!["FORMAT PARQUET".to_string(), format!("COMPRESSION '{codec}'")];
        if let Some(level) = options.compression.level() {
            copy_options.push(format!("COMPRESSION_LEVEL {level}"));
        }
        if let Some(rows) = options.row_group_rows {
            copy_options.push(format!("ROW_GROUP_SIZE {rows}"));
        }
        if !options.kv_metadata.is_empty() {
            let pairs: Vec<String> = options
                .kv_metadata
                .iter()
                .map(|(k, v)| format!("{}: '{}'", sql_quote(k), sql_quote(v)))
                .collect();
            copy_options.push(format!("KV_METADATA {{{}}}", pairs.join(", ")));
        }

        let sql = format!(
            "COPY (SELECT * FROM {}) TO '{}' ({})",
            relation(source),
            sql_quote(&output.to_string_lossy()),
            copy_options.join(", ")
        );
        debug!("duckdb export: {sql}");
        let rows = self.with_conn(|conn| conn.execute(&sql, []))?;
        Ok(rows as u64)
    }

    fn register_table(&self, name: &str, table: Table) -> Result<(), EngineError> {
        let schema = table.schema();
        let columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|field| {
                let sql_type = arrow_type_to_duckdb(field.data_type());
                format!("\"{}\" {sql_type}", field.name())
            })
            .collect();
        let create = format!("CREATE OR REPLACE TABLE \"{name}\" ({})", columns.join(", "));

        self.with_conn(|conn| {
            conn.execute(&create, [])?;
            let mut appender = conn.appender(name)?;
            for batch in table.batches() {
                if batch.num_rows() > 0 {
                    appender.append_record_batch(batch.clone())?;
                }
            }
            Ok(())
        })
    }

    fn limit_resources(&self, limits: &EngineLimits) -> Result<(), EngineError> {
        self.with_conn(|conn| {
            if let Some(bytes) = limits.memory_limit_bytes {
                let mib = (bytes / (1024 * 1024)).max(1);
                conn.execute_batch(&format!("SET memory_limit='{mib}MiB';"))?;
            }
            if let Some(threads) = limits.threads {
                conn.execute_batch(&format!("SET threads TO {};", threads.max(1)))?;
            }
            Ok(())
        })
    }
}

fn arrow_type_to_duckdb(dt: &arrow::datatypes::DataType) -> &'static str {
    use arrow::datatypes::DataType;

    match dt {
        DataType::Boolean => "BOOLEAN",
        DataType::Int8 => "TINYINT",
        DataType::Int16 => "SMALLINT",
        DataType::Int32 => "INTEGER",
        DataType::Int64 => "BIGINT",
        DataType::UInt8 => "UTINYINT",
        DataType::UInt16 => "USMALLINT",
        DataType::UInt32 => "UINTEGER",
        DataType::UInt64 => "UBIGINT",
        DataType::Float32 => "FLOAT",
        DataType::Float64 => "DOUBLE",
        DataType::Utf8 | DataType::LargeUtf8 => "VARCHAR",
        DataType::Binary | DataType::LargeBinary => "BLOB",
        DataType::Timestamp(_, _) => "TIMESTAMP",
        DataType::Date32 | DataType::Date64 => "DATE",
        DataType::Time32(_) | DataType::Time64(_) => "TIME",
        _ => "VARCHAR",
    }
}
