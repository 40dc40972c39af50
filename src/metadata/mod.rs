//! # GeoParquet Metadata Model
//!
//! The `geo` footer document: `{version, primary_column, columns:
//! {<name>: {encoding, geometry_types, bbox, crs}}}`. Constructed once by
//! the [preparer](prepare), embedded exactly once into the output footer,
//! never mutated after embedding.
//!
//! Column entries live in a `BTreeMap` so serialization is deterministic:
//! preparing the same metadata twice yields byte-identical JSON.

mod prepare;

#[cfg(test)]
mod tests;

pub use prepare::{extent_query, geometry_types_query, prepare, PrepareOptions};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geo::Bbox;

/// Reserved Parquet footer key holding the GeoParquet metadata document.
pub const GEO_METADATA_KEY: &str = "geo";

/// Geometry encoding name for WKB columns (GeoParquet 1.x).
pub const WKB_ENCODING: &str = "WKB";

/// Default name for the primary geometry column.
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geometry";

/// Known GeoParquet spec versions, driving what gets embedded.
///
/// 1.0 and 1.1 require encoding, geometry_types, and bbox. 2.0 relies on
/// Parquet-native geometry types and omits the bbox; with a default CRS and
/// nothing else to annotate, 2.0 output needs no sidecar metadata at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoParquetVersion {
    /// GeoParquet 1.0.0.
    V1_0,
    /// GeoParquet 1.1.0.
    #[default]
    V1_1,
    /// GeoParquet 2.0.0 (native geometry logical types).
    V2_0,
}

impl GeoParquetVersion {
    /// The version string embedded in the footer document.
    pub fn as_str(self) -> &'static str {
        match self {
            GeoParquetVersion::V1_0 => "1.0.0",
            GeoParquetVersion::V1_1 => "1.1.0",
            GeoParquetVersion::V2_0 => "2.0.0",
        }
    }

    /// Parse a version string, accepting the short `1.0`/`1.1`/`2.0` forms.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1.0" | "1.0.0" => Some(GeoParquetVersion::V1_0),
            "1.1" | "1.1.0" => Some(GeoParquetVersion::V1_1),
            "2.0" | "2.0.0" => Some(GeoParquetVersion::V2_0),
            _ => None,
        }
    }

    /// Parse a version string, falling back to the 1.1 policy with a
    /// warning when the string is not a known version.
    pub fn parse_lenient(s: &str) -> Self {
        match Self::parse(s) {
            Some(version) => version,
            None => {
                log::warn!("unknown GeoParquet version {s:?}, using the 1.1 policy");
                GeoParquetVersion::V1_1
            }
        }
    }

    /// Whether this version embeds a bbox in the column descriptor.
    pub fn embeds_bbox(self) -> bool {
        !matches!(self, GeoParquetVersion::V2_0)
    }
}

impl std::fmt::Display for GeoParquetVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-column geometry descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoColumn {
    /// Geometry encoding, `"WKB"` for 1.x output.
    pub encoding: String,

    /// Sorted unique geometry type names; empty only for a zero-row result.
    pub geometry_types: Vec<String>,

    /// Bounding box `[xmin, ymin, (zmin,) xmax, ymax(, zmax)]`. Omitted for
    /// 2.0 output and for zero-row results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    /// CRS as a PROJJSON object; omitted when the dataset uses the default
    /// reference system (OGC:CRS84).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<serde_json::Value>,
}

impl GeoColumn {
    /// A WKB column descriptor with no types, bbox, or CRS yet.
    pub fn new_wkb() -> Self {
        Self {
            encoding: WKB_ENCODING.to_string(),
            geometry_types: Vec::new(),
            bbox: None,
            crs: None,
        }
    }

    /// The bbox parsed back into a [`Bbox`], if present and well-formed.
    pub fn parsed_bbox(&self) -> Option<Bbox> {
        self.bbox.as_deref().and_then(Bbox::from_slice)
    }
}

/// The GeoParquet footer metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoMetadata {
    /// GeoParquet spec version string, e.g. `"1.1.0"`.
    pub version: String,

    /// Name of the primary geometry column.
    pub primary_column: String,

    /// Per-column descriptors, keyed by column name.
    pub columns: BTreeMap<String, GeoColumn>,
}

impl GeoMetadata {
    /// A document for one WKB geometry column.
    pub fn new(version: GeoParquetVersion, primary_column: &str) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(primary_column.to_string(), GeoColumn::new_wkb());
        Self {
            version: version.as_str().to_string(),
            primary_column: primary_column.to_string(),
            columns,
        }
    }

    /// The descriptor for the primary geometry column.
    pub fn primary(&self) -> Option<&GeoColumn> {
        self.columns.get(&self.primary_column)
    }

    /// Mutable descriptor for the primary geometry column.
    pub fn primary_mut(&mut self) -> Option<&mut GeoColumn> {
        self.columns.get_mut(&self.primary_column)
    }

    /// Serialize to the JSON document stored under the
    /// [`GEO_METADATA_KEY`] footer key. Deterministic for a given document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from footer JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The `(key, value)` footer entry for this document, or `None` when no
    /// sidecar metadata is required (2.0 native mode with default CRS).
    pub fn footer_entry(&self) -> Result<Option<(String, String)>, serde_json::Error> {
        if !self.requires_sidecar() {
            return Ok(None);
        }
        Ok(Some((GEO_METADATA_KEY.to_string(), self.to_json()?)))
    }

    /// Whether any sidecar metadata must be written at all.
    ///
    /// GeoParquet 2.0 carries geometry as native Parquet logical types, so
    /// when every column uses the default CRS there is nothing left to
    /// annotate and the footer document is skipped entirely. This is the
    /// only path where the metadata rewrite can be skipped.
    pub fn requires_sidecar(&self) -> bool {
        match GeoParquetVersion::parse(&self.version) {
            Some(GeoParquetVersion::V2_0) => self.columns.values().any(|c| c.crs.is_some()),
            _ => true,
        }
    }
}
