use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arrow::array::{BinaryBuilder, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::engine::{
    BatchIter, EngineError, EngineLimits, NativeExportOptions, SpatialEngine, Table, TableEngine,
};
use crate::error::WriteError;
use crate::geo::Bbox;

use super::prepare::canonicalize_geometry_type;
use super::*;

fn wkb_point(x: f64, y: f64) -> Vec<u8> {
    let mut buf = vec![1u8];
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&x.to_le_bytes());
    buf.extend_from_slice(&y.to_le_bytes());
    buf
}

fn point_engine(points: &[(f64, f64)]) -> TableEngine {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("geometry", DataType::Binary, false),
    ]));
    let ids = Int64Array::from((0..points.len() as i64).collect::<Vec<_>>());
    let mut geoms = BinaryBuilder::new();
    for (x, y) in points {
        geoms.append_value(wkb_point(*x, *y));
    }
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(ids), Arc::new(geoms.finish())])
        .unwrap();
    TableEngine::with_table("pts", Table::try_new(schema, vec![batch]).unwrap())
}

#[test]
fn test_prepare_point_table() {
    let engine = point_engine(&[(1.0, 2.0), (3.0, 4.0)]);
    let metadata = prepare(&engine, "pts", &PrepareOptions::default()).unwrap();

    assert_eq!(metadata.version, "1.1.0");
    assert_eq!(metadata.primary_column, "geometry");
    let col = metadata.primary().unwrap();
    assert_eq!(col.encoding, WKB_ENCODING);
    assert_eq!(col.geometry_types, vec!["Point".to_string()]);
    assert_eq!(col.bbox, Some(vec![1.0, 2.0, 3.0, 4.0]));
    assert!(col.crs.is_none());
}

#[test]
fn test_prepare_zero_rows_omits_bbox() {
    let engine = point_engine(&[]);
    let metadata = prepare(&engine, "pts", &PrepareOptions::default()).unwrap();

    let col = metadata.primary().unwrap();
    assert!(col.geometry_types.is_empty());
    assert!(col.bbox.is_none());
    assert!(metadata.requires_sidecar());
}

#[test]
fn test_prepare_is_deterministic() {
    let engine = point_engine(&[(1.0, 2.0), (3.0, 4.0)]);
    let a = prepare(&engine, "pts", &PrepareOptions::default()).unwrap();
    let b = prepare(&engine, "pts", &PrepareOptions::default()).unwrap();
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

#[test]
fn test_preserve_flags_skip_recompute() {
    // The engine only knows a filtered subset; preserved fields must win.
    let engine = point_engine(&[(1.0, 2.0)]);
    let mut original = GeoColumn::new_wkb();
    original.geometry_types = vec!["MultiPolygon".to_string(), "Polygon".to_string()];
    original.bbox = Some(vec![-10.0, -10.0, 10.0, 10.0]);

    let options = PrepareOptions {
        original: Some(original),
        preserve_bbox: true,
        preserve_geometry_types: true,
        ..Default::default()
    };
    let a = prepare(&engine, "pts", &options).unwrap();
    let col = a.primary().unwrap();
    assert_eq!(col.bbox, Some(vec![-10.0, -10.0, 10.0, 10.0]));
    assert_eq!(col.geometry_types[0], "MultiPolygon");

    // Preparing again from the same original is byte-identical.
    let b = prepare(&engine, "pts", &options).unwrap();
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

#[test]
fn test_unpreserved_bbox_tightens_to_result() {
    let engine = point_engine(&[(1.0, 2.0), (3.0, 4.0)]);
    let mut original = GeoColumn::new_wkb();
    original.bbox = Some(vec![-180.0, -90.0, 180.0, 90.0]);

    let options = PrepareOptions {
        original: Some(original),
        preserve_bbox: false,
        ..Default::default()
    };
    let metadata = prepare(&engine, "pts", &options).unwrap();
    assert_eq!(
        metadata.primary().unwrap().bbox,
        Some(vec![1.0, 2.0, 3.0, 4.0])
    );
}

/// Engine stub reporting a fixed type list and recording the Z flag the
/// extent pass is issued with.
struct ZmExtentEngine {
    saw_include_z: AtomicBool,
}

impl SpatialEngine for ZmExtentEngine {
    fn schema(&self, _: &str) -> Result<SchemaRef, EngineError> {
        Err(EngineError::Unsupported("schema".to_string()))
    }

    fn count_rows(&self, _: &str) -> Result<u64, EngineError> {
        Err(EngineError::Unsupported("count_rows".to_string()))
    }

    fn query_batches(&self, _: &str, _: usize) -> Result<BatchIter, EngineError> {
        Err(EngineError::Unsupported("query_batches".to_string()))
    }

    fn extent(
        &self,
        _: &str,
        _: &str,
        include_z: bool,
    ) -> Result<Option<Bbox>, EngineError> {
        self.saw_include_z.store(include_z, Ordering::SeqCst);
        let mut bbox = Bbox::empty();
        bbox.update(1.0, 2.0, include_z.then_some(3.0));
        bbox.update(4.0, 5.0, include_z.then_some(6.0));
        Ok(Some(bbox))
    }

    fn distinct_geometry_types(&self, _: &str, _: &str) -> Result<Vec<String>, EngineError> {
        Ok(vec!["POINT ZM".to_string()])
    }

    fn export_parquet(
        &self,
        _: &str,
        _: &Path,
        _: &NativeExportOptions,
    ) -> Result<u64, EngineError> {
        Err(EngineError::Unsupported("export_parquet".to_string()))
    }

    fn register_table(&self, _: &str, _: Table) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("register_table".to_string()))
    }

    fn limit_resources(&self, _: &EngineLimits) -> Result<(), EngineError> {
        Ok(())
    }
}

#[test]
fn test_zm_types_include_z_in_extent() {
    // ZM geometries carry a Z dimension; the extent pass must ask for
    // Z bounds even when no plain " Z" type is present.
    let engine = ZmExtentEngine {
        saw_include_z: AtomicBool::new(false),
    };
    let metadata = prepare(&engine, "t", &PrepareOptions::default()).unwrap();

    assert!(engine.saw_include_z.load(Ordering::SeqCst));
    let col = metadata.primary().unwrap();
    assert_eq!(col.geometry_types, vec!["Point ZM".to_string()]);
    assert_eq!(col.bbox, Some(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
}

#[test]
fn test_v2_omits_bbox() {
    let engine = point_engine(&[(1.0, 2.0)]);
    let options = PrepareOptions {
        version: GeoParquetVersion::V2_0,
        ..Default::default()
    };
    let metadata = prepare(&engine, "pts", &options).unwrap();
    assert!(metadata.primary().unwrap().bbox.is_none());
}

#[test]
fn test_v2_default_crs_needs_no_sidecar() {
    let engine = point_engine(&[(1.0, 2.0)]);
    let options = PrepareOptions {
        version: GeoParquetVersion::V2_0,
        ..Default::default()
    };
    let metadata = prepare(&engine, "pts", &options).unwrap();
    assert!(!metadata.requires_sidecar());
    assert!(metadata.footer_entry().unwrap().is_none());
}

#[test]
fn test_v2_custom_crs_keeps_sidecar() {
    let engine = point_engine(&[(1.0, 2.0)]);
    let options = PrepareOptions {
        version: GeoParquetVersion::V2_0,
        crs: Some(serde_json::json!({"type": "GeographicCRS", "name": "RD New"})),
        ..Default::default()
    };
    let metadata = prepare(&engine, "pts", &options).unwrap();
    assert!(metadata.requires_sidecar());
    let (key, value) = metadata.footer_entry().unwrap().unwrap();
    assert_eq!(key, GEO_METADATA_KEY);
    assert!(value.contains("RD New"));
}

#[test]
fn test_footer_json_round_trip() {
    let engine = point_engine(&[(1.0, 2.0), (3.0, 4.0)]);
    let metadata = prepare(&engine, "pts", &PrepareOptions::default()).unwrap();
    let json = metadata.to_json().unwrap();
    assert_eq!(GeoMetadata::from_json(&json).unwrap(), metadata);
}

#[test]
fn test_version_parse() {
    assert_eq!(GeoParquetVersion::parse("1.0"), Some(GeoParquetVersion::V1_0));
    assert_eq!(
        GeoParquetVersion::parse("1.1.0"),
        Some(GeoParquetVersion::V1_1)
    );
    assert_eq!(GeoParquetVersion::parse("2.0"), Some(GeoParquetVersion::V2_0));
    assert_eq!(GeoParquetVersion::parse("3.0"), None);
    // Unknown versions fall back to the 1.1 policy.
    assert_eq!(
        GeoParquetVersion::parse_lenient("0.4.0"),
        GeoParquetVersion::V1_1
    );
}

#[test]
fn test_canonicalize_geometry_types() {
    assert_eq!(canonicalize_geometry_type("POINT").unwrap(), "Point");
    assert_eq!(
        canonicalize_geometry_type("MULTIPOLYGON").unwrap(),
        "MultiPolygon"
    );
    assert_eq!(
        canonicalize_geometry_type("LineString Z").unwrap(),
        "LineString Z"
    );
    assert_eq!(canonicalize_geometry_type("point zm").unwrap(), "Point ZM");
    assert!(matches!(
        canonicalize_geometry_type("CIRCLE"),
        Err(WriteError::MetadataComputation(_))
    ));
}

#[test]
fn test_sql_helpers_mention_aggregates() {
    let q = extent_query("SELECT * FROM t", "geom", true);
    assert!(q.contains("ST_ZMin"));
    assert!(q.contains("ST_XMax"));
    let q2 = extent_query("SELECT * FROM t", "geom", false);
    assert!(!q2.contains("ST_ZMin"));
    assert!(geometry_types_query("t", "geom").contains("ST_GeometryType"));
}
