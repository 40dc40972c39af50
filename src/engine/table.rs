//! In-memory query engine over registered Arrow tables.
//!
//! `TableEngine` is the always-available [`SpatialEngine`]: sources are
//! names of registered [`Table`]s, aggregates are computed by scanning WKB
//! directly, and native export is emulated with an `ArrowWriter` that embeds
//! the requested footer key/values. Table-based writes and the test suite
//! run against it without any external database.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use arrow::array::{Array, BinaryArray, LargeBinaryArray};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::geo::{geometry_type_name, scan_geometry, Bbox};

use super::{BatchIter, EngineError, EngineLimits, NativeExportOptions, SpatialEngine, Table};

/// In-memory [`SpatialEngine`] over registered tables.
#[derive(Debug, Default)]
pub struct TableEngine {
    tables: Mutex<HashMap<String, Table>>,
    limits: Mutex<EngineLimits>,
}

impl TableEngine {
    /// An engine with no registered tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor registering one table.
    pub fn with_table(name: &str, table: Table) -> Self {
        let engine = Self::new();
        engine
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), table);
        engine
    }

    /// The most recently applied resource limits. Used to verify that
    /// streaming paths constrain the engine as promised.
    pub fn applied_limits(&self) -> EngineLimits {
        *self.limits.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, source: &str) -> Result<Table, EngineError> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .get(source)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSource(source.to_string()))
    }

    /// Scan every WKB value in `geometry_column`, feeding the envelope and
    /// type-code accumulators.
    fn scan_column(
        table: &Table,
        geometry_column: &str,
    ) -> Result<(Bbox, BTreeSet<u32>), EngineError> {
        let index = table
            .schema()
            .index_of(geometry_column)
            .map_err(|_| EngineError::UnknownSource(format!("column {geometry_column}")))?;

        let mut bbox = Bbox::empty();
        let mut types = BTreeSet::new();
        for batch in table.batches() {
            scan_array(batch, index, &mut bbox, &mut types)?;
        }
        Ok((bbox, types))
    }
}

fn scan_array(
    batch: &RecordBatch,
    index: usize,
    bbox: &mut Bbox,
    types: &mut BTreeSet<u32>,
) -> Result<(), EngineError> {
    let column = batch.column(index);
    match column.data_type() {
        DataType::Binary => {
            let array: &BinaryArray = column
                .as_any()
                .downcast_ref()
                .ok_or_else(|| EngineError::Query("expected BinaryArray".to_string()))?;
            for value in array.iter().flatten() {
                scan_geometry(value, bbox, types)
                    .map_err(|e| EngineError::MalformedGeometry(e.to_string()))?;
            }
        }
        DataType::LargeBinary => {
            let array: &LargeBinaryArray = column
                .as_any()
                .downcast_ref()
                .ok_or_else(|| EngineError::Query("expected LargeBinaryArray".to_string()))?;
            for value in array.iter().flatten() {
                scan_geometry(value, bbox, types)
                    .map_err(|e| EngineError::MalformedGeometry(e.to_string()))?;
            }
        }
        other => {
            return Err(EngineError::Query(format!(
                "geometry column must be Binary WKB, found {other}"
            )))
        }
    }
    Ok(())
}

/// Re-chunk batches so none exceeds `batch_size` rows. Slices are zero-copy.
fn rechunk(batches: &[RecordBatch], batch_size: usize) -> Vec<RecordBatch> {
    let mut out = Vec::new();
    for batch in batches {
        let mut offset = 0;
        while offset < batch.num_rows() {
            let len = batch_size.min(batch.num_rows() - offset);
            out.push(batch.slice(offset, len));
            offset += len;
        }
    }
    out
}

impl SpatialEngine for TableEngine {
    fn schema(&self, source: &str) -> Result<SchemaRef, EngineError> {
        Ok(self.lookup(source)?.schema())
    }

    fn count_rows(&self, source: &str) -> Result<u64, EngineError> {
        Ok(self.lookup(source)?.num_rows())
    }

    fn query_batches(&self, source: &str, batch_size: usize) -> Result<BatchIter, EngineError> {
        let table = self.lookup(source)?;
        let schema = table.schema();
        let chunks = rechunk(table.batches(), batch_size.max(1));
        Ok(BatchIter::new(schema, Box::new(chunks.into_iter().map(Ok))))
    }

    fn extent(
        &self,
        source: &str,
        geometry_column: &str,
        _include_z: bool,
    ) -> Result<Option<Bbox>, EngineError> {
        let table = self.lookup(source)?;
        let (bbox, _) = Self::scan_column(&table, geometry_column)?;
        Ok((!bbox.is_empty()).then_some(bbox))
    }

    fn distinct_geometry_types(
        &self,
        source: &str,
        geometry_column: &str,
    ) -> Result<Vec<String>, EngineError> {
        let table = self.lookup(source)?;
        let (_, codes) = Self::scan_column(&table, geometry_column)?;
        codes
            .into_iter()
            .map(|code| {
                geometry_type_name(code)
                    .ok_or_else(|| EngineError::MalformedGeometry(format!("type code {code}")))
            })
            .collect()
    }

    fn export_parquet(
        &self,
        source: &str,
        output: &Path,
        options: &NativeExportOptions,
    ) -> Result<u64, EngineError> {
        let table = self.lookup(source)?;

        let mut builder = WriterProperties::builder().set_compression(
            options
                .compression
                .to_parquet()
                .map_err(|e| EngineError::Query(e.to_string()))?,
        );
        if let Some(rows) = options.row_group_rows {
            builder = builder.set_max_row_group_size(rows);
        }
        if !options.kv_metadata.is_empty() {
            let kv = options
                .kv_metadata
                .iter()
                .map(|(k, v)| KeyValue {
                    key: k.clone(),
                    value: Some(v.clone()),
                })
                .collect();
            builder = builder.set_key_value_metadata(Some(kv));
        }

        let file = File::create(output)?;
        let mut writer = ArrowWriter::try_new(file, table.schema(), Some(builder.build()))?;
        let mut rows = 0u64;
        for batch in table.batches() {
            rows += batch.num_rows() as u64;
            writer.write(batch)?;
        }
        writer.close()?;
        Ok(rows)
    }

    fn register_table(&self, name: &str, table: Table) -> Result<(), EngineError> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), table);
        Ok(())
    }

    fn limit_resources(&self, limits: &EngineLimits) -> Result<(), EngineError> {
        // In-process engine: nothing to cap, but remember the request so
        // callers can observe what was asked of the engine.
        *self.limits.lock().unwrap_or_else(|e| e.into_inner()) = *limits;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{BinaryBuilder, Int64Array};
    use arrow::datatypes::{Field, Schema};

    use super::*;

    fn wkb_point(x: f64, y: f64) -> Vec<u8> {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&x.to_le_bytes());
        buf.extend_from_slice(&y.to_le_bytes());
        buf
    }

    fn point_table(points: &[(f64, f64)]) -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("geometry", DataType::Binary, false),
        ]));
        let ids = Int64Array::from((0..points.len() as i64).collect::<Vec<_>>());
        let mut geoms = BinaryBuilder::new();
        for (x, y) in points {
            geoms.append_value(wkb_point(*x, *y));
        }
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(ids), Arc::new(geoms.finish())])
                .unwrap();
        Table::try_new(schema, vec![batch]).unwrap()
    }

    #[test]
    fn test_extent_and_types() {
        let engine =
            TableEngine::with_table("pts", point_table(&[(4.0, 50.0), (5.5, 52.0), (3.2, 51.0)]));

        let bbox = engine.extent("pts", "geometry", false).unwrap().unwrap();
        assert_eq!(bbox.to_vec(), vec![3.2, 50.0, 5.5, 52.0]);

        let types = engine.distinct_geometry_types("pts", "geometry").unwrap();
        assert_eq!(types, vec!["Point".to_string()]);
    }

    #[test]
    fn test_extent_of_empty_table() {
        let engine = TableEngine::with_table("pts", point_table(&[]));
        assert!(engine.extent("pts", "geometry", false).unwrap().is_none());
        assert!(engine
            .distinct_geometry_types("pts", "geometry")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_query_batches_rechunks() {
        let points: Vec<(f64, f64)> = (0..25).map(|i| (i as f64, i as f64)).collect();
        let engine = TableEngine::with_table("pts", point_table(&points));

        let iter = engine.query_batches("pts", 10).unwrap();
        let sizes: Vec<usize> = iter.map(|b| b.unwrap().num_rows()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_unknown_source() {
        let engine = TableEngine::new();
        assert!(matches!(
            engine.count_rows("missing"),
            Err(EngineError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_limits_are_recorded() {
        let engine = TableEngine::new();
        let limits = EngineLimits {
            memory_limit_bytes: Some(1 << 30),
            threads: Some(1),
        };
        engine.limit_resources(&limits).unwrap();
        assert_eq!(engine.applied_limits(), limits);
    }
}
