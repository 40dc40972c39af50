//! End-to-end tests for the write pipeline against the in-memory engine.
//!
//! Exercises the public surface the way a caller would: build tables,
//! register them, run the one-call entry points, and read the produced
//! files back with a plain Parquet reader.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{BinaryBuilder, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::file::reader::{FileReader, SerializedFileReader};

use geopq::prelude::*;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wkb_point(x: f64, y: f64) -> Vec<u8> {
    let mut buf = vec![1u8];
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&x.to_le_bytes());
    buf.extend_from_slice(&y.to_le_bytes());
    buf
}

/// A table of points on a spiral with a value column, in several batches.
fn observations(rows: usize, batch_rows: usize) -> Table {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("value", DataType::Float64, false),
        Field::new("geometry", DataType::Binary, false),
    ]));

    let mut batches = Vec::new();
    let mut start = 0usize;
    while start < rows || (rows == 0 && batches.is_empty()) {
        let end = (start + batch_rows).min(rows);
        let ids = Int64Array::from((start as i64..end as i64).collect::<Vec<_>>());
        let values = Float64Array::from(
            (start..end).map(|i| i as f64 * 0.5).collect::<Vec<_>>(),
        );
        let mut geoms = BinaryBuilder::new();
        for i in start..end {
            let angle = i as f64 / 50.0;
            geoms.append_value(wkb_point(angle.cos() * (1.0 + angle), angle.sin() * (1.0 + angle)));
        }
        batches.push(
            RecordBatch::try_new(
                schema.clone(),
                vec![Arc::new(ids), Arc::new(values), Arc::new(geoms.finish())],
            )
            .unwrap(),
        );
        if end == start {
            break;
        }
        start = end;
    }
    Table::try_new(schema, batches).unwrap()
}

fn read_back(path: &Path) -> (u64, Option<GeoMetadata>) {
    let reader = SerializedFileReader::new(File::open(path).unwrap()).unwrap();
    let meta = reader.metadata().file_metadata();
    let geo = meta.key_value_metadata().and_then(|kv| {
        kv.iter()
            .find(|e| e.key == GEO_METADATA_KEY)
            .and_then(|e| e.value.as_deref())
            .map(|v| GeoMetadata::from_json(v).unwrap())
    });
    (meta.num_rows() as u64, geo)
}

#[test]
fn test_full_pipeline_from_registered_table() {
    init_logs();
    let engine = TableEngine::with_table("obs", observations(1_234, 200));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("obs.parquet");

    let outcome = write_query(
        &engine,
        "obs",
        dest.to_str().unwrap(),
        &GeoWriteOptions::default(),
        None,
    )
    .unwrap();
    assert_eq!(outcome.rows_written, 1_234);

    let (rows, geo) = read_back(&dest);
    assert_eq!(rows, 1_234);
    let geo = geo.unwrap();
    assert_eq!(geo.version, "1.1.0");
    let col = geo.primary().unwrap();
    assert_eq!(col.encoding, "WKB");
    assert_eq!(col.geometry_types, vec!["Point".to_string()]);
    assert!(col.bbox.is_some());
}

#[test]
fn test_every_strategy_produces_identical_metadata() {
    init_logs();
    let engine = TableEngine::with_table("obs", observations(600, 128));
    let dir = tempfile::tempdir().unwrap();

    let mut footers = Vec::new();
    for kind in [
        StrategyKind::InMemory,
        StrategyKind::Streaming,
        StrategyKind::NativeStreamingWithMetadata,
        StrategyKind::DiskRewrite,
    ] {
        let dest = dir.path().join(format!("{kind}.parquet"));
        let options = GeoWriteOptions {
            strategy: Some(kind),
            ..Default::default()
        };
        let outcome =
            write_query(&engine, "obs", dest.to_str().unwrap(), &options, None).unwrap();
        assert_eq!(outcome.rows_written, 600, "{kind}");
        assert_eq!(outcome.strategy, kind.name());

        let (rows, geo) = read_back(&dest);
        assert_eq!(rows, 600, "{kind}");
        footers.push(geo.unwrap());
    }

    let reference = footers[0].to_json().unwrap();
    for other in &footers[1..] {
        assert_eq!(other.to_json().unwrap(), reference);
    }
}

#[test]
fn test_explicit_row_group_sizing() {
    let engine = TableEngine::with_table("obs", observations(1_000, 1_000));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("grouped.parquet");

    let mut options = GeoWriteOptions::default();
    options.writer.row_group = RowGroupSpec::from_options(Some(250), None).unwrap();
    write_query(&engine, "obs", dest.to_str().unwrap(), &options, None).unwrap();

    let reader = SerializedFileReader::new(File::open(&dest).unwrap()).unwrap();
    assert_eq!(reader.metadata().num_row_groups(), 4);
}

#[test]
fn test_compression_variants_round_trip() {
    let engine = TableEngine::with_table("obs", observations(100, 100));
    let dir = tempfile::tempdir().unwrap();

    for (name, level) in [
        ("ZSTD", Some(5)),
        ("GZIP", Some(6)),
        ("SNAPPY", None),
        ("LZ4", None),
        ("UNCOMPRESSED", None),
    ] {
        let dest = dir.path().join(format!("{name}.parquet"));
        let mut options = GeoWriteOptions::default();
        options.writer.compression = CompressionSpec::parse(name, level).unwrap();
        write_query(&engine, "obs", dest.to_str().unwrap(), &options, None).unwrap();
        let (rows, _) = read_back(&dest);
        assert_eq!(rows, 100, "{name}");
    }
}

#[test]
fn test_zero_row_table_through_pipeline() {
    let engine = TableEngine::with_table("empty", observations(0, 100));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("empty.parquet");

    let outcome = write_query(
        &engine,
        "empty",
        dest.to_str().unwrap(),
        &GeoWriteOptions::default(),
        None,
    )
    .unwrap();
    assert_eq!(outcome.rows_written, 0);

    let (rows, geo) = read_back(&dest);
    assert_eq!(rows, 0);
    let geo = geo.unwrap();
    assert!(geo.primary().unwrap().geometry_types.is_empty());
}

#[test]
fn test_invalid_options_fail_before_any_output() {
    let engine = TableEngine::with_table("obs", observations(10, 10));
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("never.parquet");

    // Both row-group forms at once.
    let err = RowGroupSpec::from_options(Some(100), Some(64)).unwrap_err();
    assert!(matches!(err, WriteError::Configuration(_)));

    // GZIP level outside 1-9.
    let err = CompressionSpec::parse("GZIP", Some(30)).unwrap_err();
    assert!(matches!(err, WriteError::Configuration(_)));

    assert!(!dest.exists());
    drop(engine);
}

#[test]
fn test_table_write_without_prior_registration() {
    let engine = TableEngine::new();
    let table = observations(77, 25);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("direct.parquet");

    let outcome = write_table(
        &engine,
        &table,
        dest.to_str().unwrap(),
        &GeoWriteOptions::default(),
        None,
    )
    .unwrap();
    assert_eq!(outcome.rows_written, 77);

    let (rows, geo) = read_back(&dest);
    assert_eq!(rows, 77);
    assert!(geo.is_some());
}

#[test]
fn test_bbox_matches_hand_computed_extent() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "geometry",
        DataType::Binary,
        false,
    )]));
    let mut geoms = BinaryBuilder::new();
    for (x, y) in [(-10.0, 3.0), (2.5, -7.5), (8.0, 12.0)] {
        geoms.append_value(wkb_point(x, y));
    }
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(geoms.finish())]).unwrap();
    let table = Table::try_new(schema, vec![batch]).unwrap();

    let engine = TableEngine::new();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("extent.parquet");
    write_table(&engine, &table, dest.to_str().unwrap(), &GeoWriteOptions::default(), None)
        .unwrap();

    let (_, geo) = read_back(&dest);
    assert_eq!(
        geo.unwrap().primary().unwrap().bbox,
        Some(vec![-10.0, -7.5, 8.0, 12.0])
    );
}
