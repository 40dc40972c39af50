//! # geopq - A GeoParquet Write Engine
//!
//! `geopq` turns spatial query results into GeoParquet files: standard
//! Parquet with geometry as well-known binary and a `geo` footer key
//! holding the column metadata (version, geometry types, bounding box,
//! CRS).
//!
//! ## Key Features
//!
//! - **Automatic strategy selection**: in-memory, batched streaming,
//!   engine-native export, or two-phase disk rewrite, chosen from size
//!   estimates and available memory, or requested explicitly.
//!
//! - **Atomic outputs**: every local write goes through a temp file in the
//!   destination directory and is renamed into place, so the destination is
//!   never a partial file.
//!
//! - **Metadata first**: bounding box and geometry types are computed as
//!   aggregate queries before the data write, then embedded exactly once.
//!
//! - **Pluggable engines**: any [`engine::SpatialEngine`] implementation can
//!   back a write; an in-memory Arrow table engine ships by default and a
//!   DuckDB engine is available behind the `duckdb` feature.
//!
//! - **Remote handoff**: `s3://`, `gs://`, `az://`, and `https://`
//!   destinations stage locally and hand the finished file to a
//!   caller-supplied uploader; a failed upload keeps the local file for
//!   retry.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geopq::engine::TableEngine;
//! use geopq::writer::{write_query, GeoWriteOptions};
//!
//! let engine = TableEngine::new();
//! // ... register tables or use a SQL-capable engine ...
//! let outcome = write_query(
//!     &engine,
//!     "observations",
//!     "out/observations.parquet",
//!     &GeoWriteOptions::default(),
//!     None,
//! )?;
//! println!("{outcome}");
//! # Ok::<(), geopq::error::WriteError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`context`]: the per-write decision record consumed by the selector
//! - [`metadata`]: the `geo` footer document model and its preparer
//! - [`writer`]: strategies, selector, atomic wrapper, and the pipeline
//! - [`engine`]: the query engine seam and bundled implementations
//! - [`geo`]: WKB scanning, bounding boxes, geometry type names
//! - [`remote`]: remote URI parsing and the uploader seam
//!
//! ## Footer Metadata
//!
//! The Parquet footer carries one custom key, `geo`, holding a JSON
//! document:
//!
//! ```json
//! {"version": "1.1.0", "primary_column": "geometry",
//!  "columns": {"geometry": {"encoding": "WKB",
//!    "geometry_types": ["Point"], "bbox": [3.2, 50.0, 5.5, 52.0]}}}
//! ```
//!
//! GeoParquet 2.0 output with a default CRS skips the key entirely and
//! relies on native Parquet geometry types.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod context;
pub mod engine;
pub mod error;
pub mod geo;
pub mod metadata;
pub mod remote;
pub mod writer;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::context::{detect_available_memory, WriteContext, WriteContextBuilder};
    pub use crate::engine::{
        BatchIter, EngineError, EngineLimits, NativeExportOptions, SpatialEngine, Table,
        TableEngine,
    };
    pub use crate::error::{WriteError, WritePhase};
    pub use crate::geo::Bbox;
    pub use crate::metadata::{
        prepare, GeoColumn, GeoMetadata, GeoParquetVersion, PrepareOptions, GEO_METADATA_KEY,
    };
    pub use crate::remote::{RemoteError, RemoteScheme, RemoteStore, RemoteTarget};
    pub use crate::writer::{
        select_strategy, write_query, write_table, Codec, CompressionSpec, DiskRewriteStrategy,
        GeoWriteOptions, InMemoryStrategy, NativeStreamingStrategy, RowGroupSpec, SelectorTuning,
        StrategyKind, StreamingStrategy, WriteOutcome, WriteStrategy, WriterOptions,
    };

    #[cfg(feature = "duckdb")]
    pub use crate::engine::duckdb::DuckDbEngine;
}
