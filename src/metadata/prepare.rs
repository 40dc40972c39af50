//! Metadata preparation: aggregate queries plus the version policy.
//!
//! Runs before any output file is opened. Two aggregate passes over the
//! source (coordinate extent, distinct geometry types) produce a finished
//! [`GeoMetadata`] document; preparation failures surface as
//! [`WriteError::MetadataComputation`] and nothing is written.

use log::debug;

use crate::engine::SpatialEngine;
use crate::error::WriteError;

use super::{GeoColumn, GeoMetadata, GeoParquetVersion, DEFAULT_GEOMETRY_COLUMN};

/// Options controlling metadata preparation.
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Target GeoParquet version.
    pub version: GeoParquetVersion,
    /// Name of the geometry column in the result set.
    pub geometry_column: String,
    /// CRS as a PROJJSON object, or `None` for the default (OGC:CRS84).
    pub crs: Option<serde_json::Value>,
    /// Column descriptor carried over from an input file, if any. Only
    /// consulted when one of the preserve flags is set.
    pub original: Option<GeoColumn>,
    /// Reuse the original bbox instead of recomputing the extent. Set this
    /// to `false` when the result set is a filtered subset of the input, so
    /// the bbox tightens to the surviving rows.
    pub preserve_bbox: bool,
    /// Reuse the original geometry type list instead of re-querying.
    pub preserve_geometry_types: bool,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            version: GeoParquetVersion::default(),
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
            crs: None,
            original: None,
            preserve_bbox: false,
            preserve_geometry_types: false,
        }
    }
}

impl PrepareOptions {
    fn preserved_types(&self) -> Option<Vec<String>> {
        if !self.preserve_geometry_types {
            return None;
        }
        self.original
            .as_ref()
            .filter(|c| !c.geometry_types.is_empty())
            .map(|c| c.geometry_types.clone())
    }

    fn preserved_bbox(&self) -> Option<Vec<f64>> {
        if !self.preserve_bbox {
            return None;
        }
        self.original.as_ref().and_then(|c| c.bbox.clone())
    }
}

/// Compute the complete metadata document for `source`.
///
/// Fields covered by a preserve flag are copied from the original and no
/// aggregate query runs for them; everything else is recomputed. Geometry
/// types are resolved first, and the extent pass then includes Z bounds
/// exactly when some geometry carries a Z dimension. A zero-row source
/// yields empty `geometry_types` and no bbox, which is still a valid
/// document.
pub fn prepare(
    engine: &dyn SpatialEngine,
    source: &str,
    options: &PrepareOptions,
) -> Result<GeoMetadata, WriteError> {
    let column = &options.geometry_column;

    let geometry_types = match options.preserved_types() {
        Some(types) => types,
        None => {
            let raw = engine
                .distinct_geometry_types(source, column)
                .map_err(|e| WriteError::MetadataComputation(e.to_string()))?;
            let mut types: Vec<String> = raw
                .iter()
                .map(|t| canonicalize_geometry_type(t))
                .collect::<Result<_, _>>()?;
            types.sort();
            types.dedup();
            types
        }
    };

    let bbox = if !options.version.embeds_bbox() {
        None
    } else if let Some(preserved) = options.preserved_bbox() {
        Some(preserved)
    } else {
        let include_z = geometry_types
            .iter()
            .any(|t| t.ends_with(" Z") || t.ends_with(" ZM"));
        engine
            .extent(source, column, include_z)
            .map_err(|e| WriteError::MetadataComputation(e.to_string()))?
            .map(|b| b.to_vec())
    };

    debug!(
        "prepared metadata: version={} types={:?} bbox={:?}",
        options.version, geometry_types, bbox
    );

    let mut metadata = GeoMetadata::new(options.version, column);
    if let Some(col) = metadata.primary_mut() {
        col.geometry_types = geometry_types;
        col.bbox = bbox;
        col.crs = options.crs.clone();
    }
    Ok(metadata)
}

/// Map an engine-reported geometry type name to GeoParquet's canonical
/// CamelCase form, e.g. `POINT` to `Point` and `MULTIPOLYGON Z` to
/// `MultiPolygon Z`.
pub(crate) fn canonicalize_geometry_type(raw: &str) -> Result<String, WriteError> {
    let trimmed = raw.trim();
    let (base, suffix) = match trimmed.to_ascii_uppercase() {
        s if s.ends_with(" ZM") => (trimmed[..trimmed.len() - 3].to_ascii_uppercase(), " ZM"),
        s if s.ends_with(" Z") => (trimmed[..trimmed.len() - 2].to_ascii_uppercase(), " Z"),
        s if s.ends_with(" M") => (trimmed[..trimmed.len() - 2].to_ascii_uppercase(), " M"),
        s => (s, ""),
    };
    let canonical = match base.as_str() {
        "POINT" => "Point",
        "LINESTRING" => "LineString",
        "POLYGON" => "Polygon",
        "MULTIPOINT" => "MultiPoint",
        "MULTILINESTRING" => "MultiLineString",
        "MULTIPOLYGON" => "MultiPolygon",
        "GEOMETRYCOLLECTION" => "GeometryCollection",
        other => {
            return Err(WriteError::MetadataComputation(format!(
                "unknown geometry type: {other}"
            )))
        }
    };
    Ok(format!("{canonical}{suffix}"))
}

/// The aggregate SQL computing the coordinate extent of `source`, for
/// SQL-capable engines. One row: xmin, ymin, (zmin,) xmax, ymax(, zmax).
pub fn extent_query(source: &str, geometry_column: &str, include_z: bool) -> String {
    let g = format!("ST_GeomFromWKB({geometry_column})");
    if include_z {
        format!(
            "SELECT MIN(ST_XMin({g})) AS xmin, MIN(ST_YMin({g})) AS ymin, \
             MIN(ST_ZMin({g})) AS zmin, MAX(ST_XMax({g})) AS xmax, \
             MAX(ST_YMax({g})) AS ymax, MAX(ST_ZMax({g})) AS zmax \
             FROM ({source})"
        )
    } else {
        format!(
            "SELECT MIN(ST_XMin({g})) AS xmin, MIN(ST_YMin({g})) AS ymin, \
             MAX(ST_XMax({g})) AS xmax, MAX(ST_YMax({g})) AS ymax \
             FROM ({source})"
        )
    }
}

/// The aggregate SQL listing distinct geometry type names in `source`,
/// for SQL-capable engines.
pub fn geometry_types_query(source: &str, geometry_column: &str) -> String {
    format!(
        "SELECT DISTINCT ST_GeometryType(ST_GeomFromWKB({geometry_column})) AS t \
         FROM ({source}) WHERE {geometry_column} IS NOT NULL"
    )
}
