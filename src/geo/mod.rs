//! # Geometry Support
//!
//! Bounding-box accumulation and geometry-type naming shared by the
//! metadata preparer and the in-memory query engine.
//!
//! The numeric type codes follow the WKB convention: base codes 1-7 for the
//! seven geometry types, offset by 1000 for Z, 2000 for M, and 3000 for ZM
//! coordinates.

pub mod wkb;

pub use wkb::{scan_geometry, WkbError};

/// Base WKB code for Point geometries.
pub const WKB_POINT: u32 = 1;
/// Base WKB code for GeometryCollection geometries.
pub const WKB_GEOMETRY_COLLECTION: u32 = 7;

/// The seven base geometry type names, indexed by WKB base code minus one.
const BASE_TYPE_NAMES: [&str; 7] = [
    "Point",
    "LineString",
    "Polygon",
    "MultiPoint",
    "MultiLineString",
    "MultiPolygon",
    "GeometryCollection",
];

/// Canonical GeoParquet name for a WKB type code, e.g. `1` → `"Point"`,
/// `1003` → `"Polygon Z"`. Returns `None` for codes outside the
/// seven base types or the Z/M/ZM offsets.
pub fn geometry_type_name(code: u32) -> Option<String> {
    let base = code % 1000;
    if !(WKB_POINT..=WKB_GEOMETRY_COLLECTION).contains(&base) {
        return None;
    }
    let name = BASE_TYPE_NAMES[(base - 1) as usize];
    match code / 1000 {
        0 => Some(name.to_string()),
        1 => Some(format!("{name} Z")),
        2 => Some(format!("{name} M")),
        3 => Some(format!("{name} ZM")),
        _ => None,
    }
}

/// A bounding box accumulated over a set of geometries.
///
/// Starts empty; coordinates widen it via [`Bbox::update`]. The Z dimension
/// is tracked only once a Z coordinate has been observed, so 2D datasets
/// serialize to the 4-value `[xmin, ymin, xmax, ymax]` form and 3D datasets
/// to the 6-value form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    /// Minimum X (west-most) coordinate.
    pub xmin: f64,
    /// Minimum Y (south-most) coordinate.
    pub ymin: f64,
    /// Minimum Z coordinate, if any Z value was observed.
    pub zmin: Option<f64>,
    /// Maximum X (east-most) coordinate.
    pub xmax: f64,
    /// Maximum Y (north-most) coordinate.
    pub ymax: f64,
    /// Maximum Z coordinate, if any Z value was observed.
    pub zmax: Option<f64>,
}

impl Default for Bbox {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bbox {
    /// An empty bounding box covering nothing.
    pub fn empty() -> Self {
        Self {
            xmin: f64::INFINITY,
            ymin: f64::INFINITY,
            zmin: None,
            xmax: f64::NEG_INFINITY,
            ymax: f64::NEG_INFINITY,
            zmax: None,
        }
    }

    /// A 2D box from explicit bounds.
    pub fn new_2d(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            zmin: None,
            xmax,
            ymax,
            zmax: None,
        }
    }

    /// True when no coordinate has been observed.
    pub fn is_empty(&self) -> bool {
        self.xmin > self.xmax || self.ymin > self.ymax
    }

    /// Widen the box to include one coordinate.
    pub fn update(&mut self, x: f64, y: f64, z: Option<f64>) {
        self.xmin = self.xmin.min(x);
        self.xmax = self.xmax.max(x);
        self.ymin = self.ymin.min(y);
        self.ymax = self.ymax.max(y);
        if let Some(z) = z {
            self.zmin = Some(self.zmin.map_or(z, |v| v.min(z)));
            self.zmax = Some(self.zmax.map_or(z, |v| v.max(z)));
        }
    }

    /// Widen the box to include another box.
    pub fn merge(&mut self, other: &Bbox) {
        if other.is_empty() {
            return;
        }
        self.update(other.xmin, other.ymin, other.zmin);
        self.update(other.xmax, other.ymax, other.zmax);
    }

    /// Serialize to the GeoParquet array form: `[xmin, ymin, xmax, ymax]`
    /// or `[xmin, ymin, zmin, xmax, ymax, zmax]`.
    pub fn to_vec(&self) -> Vec<f64> {
        match (self.zmin, self.zmax) {
            (Some(zmin), Some(zmax)) => vec![self.xmin, self.ymin, zmin, self.xmax, self.ymax, zmax],
            _ => vec![self.xmin, self.ymin, self.xmax, self.ymax],
        }
    }

    /// Parse the 4- or 6-value array form, validating `min <= max` per axis.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let bbox = match values {
            [xmin, ymin, xmax, ymax] => Self {
                xmin: *xmin,
                ymin: *ymin,
                zmin: None,
                xmax: *xmax,
                ymax: *ymax,
                zmax: None,
            },
            [xmin, ymin, zmin, xmax, ymax, zmax] => Self {
                xmin: *xmin,
                ymin: *ymin,
                zmin: Some(*zmin),
                xmax: *xmax,
                ymax: *ymax,
                zmax: Some(*zmax),
            },
            _ => return None,
        };
        if bbox.xmin > bbox.xmax || bbox.ymin > bbox.ymax {
            return None;
        }
        if let (Some(zmin), Some(zmax)) = (bbox.zmin, bbox.zmax) {
            if zmin > zmax {
                return None;
            }
        }
        Some(bbox)
    }

    /// Compare two boxes within an absolute tolerance per bound.
    pub fn approx_eq(&self, other: &Bbox, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance;
        close(self.xmin, other.xmin)
            && close(self.ymin, other.ymin)
            && close(self.xmax, other.xmax)
            && close(self.ymax, other.ymax)
            && match (self.zmin, other.zmin, self.zmax, other.zmax) {
                (Some(a), Some(b), Some(c), Some(d)) => close(a, b) && close(c, d),
                (None, None, None, None) => true,
                _ => false,
            }
    }
}
