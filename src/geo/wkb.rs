//! Well-Known Binary envelope scanner.
//!
//! Walks a WKB geometry without building an object model, accumulating the
//! coordinate envelope and the set of geometry type codes. Both ISO WKB
//! (dimension encoded as a 1000/2000/3000 offset on the type code) and EWKB
//! (dimension and SRID encoded as high-bit flags) are accepted, since query
//! engines disagree on which flavor they emit.

use std::collections::BTreeSet;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::Bbox;

/// EWKB flag: geometry carries Z coordinates.
const EWKB_Z_FLAG: u32 = 0x8000_0000;
/// EWKB flag: geometry carries M coordinates.
const EWKB_M_FLAG: u32 = 0x4000_0000;
/// EWKB flag: a 4-byte SRID follows the type code.
const EWKB_SRID_FLAG: u32 = 0x2000_0000;

/// Errors produced while scanning a WKB buffer.
#[derive(Debug, thiserror::Error)]
pub enum WkbError {
    /// The buffer ended before the geometry was complete.
    #[error("truncated WKB buffer at offset {0}")]
    Truncated(usize),

    /// The byte-order marker was neither 0 (big) nor 1 (little).
    #[error("invalid WKB byte order marker: {0}")]
    InvalidByteOrder(u8),

    /// The type code does not name one of the seven geometry types.
    #[error("unknown WKB geometry type code: {0}")]
    UnknownType(u32),
}

struct WkbReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WkbReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WkbError> {
        let end = self.pos.checked_add(n).ok_or(WkbError::Truncated(self.pos))?;
        if end > self.buf.len() {
            return Err(WkbError::Truncated(self.pos));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, WkbError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self, little_endian: bool) -> Result<u32, WkbError> {
        let bytes = self.take(4)?;
        Ok(if little_endian {
            LittleEndian::read_u32(bytes)
        } else {
            BigEndian::read_u32(bytes)
        })
    }

    fn read_f64(&mut self, little_endian: bool) -> Result<f64, WkbError> {
        let bytes = self.take(8)?;
        Ok(if little_endian {
            LittleEndian::read_f64(bytes)
        } else {
            BigEndian::read_f64(bytes)
        })
    }
}

/// Scan one WKB geometry, widening `bbox` with every coordinate and adding
/// the geometry's normalized type code (base + 1000 Z / 2000 M / 3000 ZM)
/// to `types`.
///
/// Empty points (NaN coordinates) and empty part counts contribute a type
/// but no extent. Nested parts of multi-geometries and collections widen the
/// envelope but only the outermost geometry records a type code.
pub fn scan_geometry(buf: &[u8], bbox: &mut Bbox, types: &mut BTreeSet<u32>) -> Result<(), WkbError> {
    let mut reader = WkbReader::new(buf);
    scan_inner(&mut reader, bbox, Some(types))?;
    Ok(())
}

fn scan_inner(
    reader: &mut WkbReader<'_>,
    bbox: &mut Bbox,
    types: Option<&mut BTreeSet<u32>>,
) -> Result<(), WkbError> {
    let order = reader.read_u8()?;
    let le = match order {
        0 => false,
        1 => true,
        other => return Err(WkbError::InvalidByteOrder(other)),
    };

    let raw = reader.read_u32(le)?;
    let code = raw & !(EWKB_Z_FLAG | EWKB_M_FLAG | EWKB_SRID_FLAG);
    let base = code % 1000;
    if !(1..=7).contains(&base) {
        return Err(WkbError::UnknownType(raw));
    }

    let iso_dim = code / 1000;
    if iso_dim > 3 {
        return Err(WkbError::UnknownType(raw));
    }
    let has_z = raw & EWKB_Z_FLAG != 0 || iso_dim == 1 || iso_dim == 3;
    let has_m = raw & EWKB_M_FLAG != 0 || iso_dim == 2 || iso_dim == 3;

    if raw & EWKB_SRID_FLAG != 0 {
        reader.read_u32(le)?;
    }

    if let Some(types) = types {
        let offset = match (has_z, has_m) {
            (false, false) => 0,
            (true, false) => 1000,
            (false, true) => 2000,
            (true, true) => 3000,
        };
        types.insert(base + offset);
    }

    match base {
        1 => scan_point(reader, le, has_z, has_m, bbox),
        2 => scan_sequence(reader, le, has_z, has_m, bbox),
        3 => {
            let rings = reader.read_u32(le)?;
            for _ in 0..rings {
                scan_sequence(reader, le, has_z, has_m, bbox)?;
            }
            Ok(())
        }
        // Multi-geometries and collections: each part is a complete WKB
        // geometry with its own byte-order marker and type code.
        _ => {
            let parts = reader.read_u32(le)?;
            for _ in 0..parts {
                scan_inner(reader, bbox, None)?;
            }
            Ok(())
        }
    }
}

fn scan_point(
    reader: &mut WkbReader<'_>,
    le: bool,
    has_z: bool,
    has_m: bool,
    bbox: &mut Bbox,
) -> Result<(), WkbError> {
    let x = reader.read_f64(le)?;
    let y = reader.read_f64(le)?;
    let z = if has_z { Some(reader.read_f64(le)?) } else { None };
    if has_m {
        reader.read_f64(le)?;
    }
    // POINT EMPTY is conventionally serialized with NaN coordinates.
    if x.is_nan() && y.is_nan() {
        return Ok(());
    }
    bbox.update(x, y, z.filter(|v| !v.is_nan()));
    Ok(())
}

fn scan_sequence(
    reader: &mut WkbReader<'_>,
    le: bool,
    has_z: bool,
    has_m: bool,
    bbox: &mut Bbox,
) -> Result<(), WkbError> {
    let count = reader.read_u32(le)?;
    for _ in 0..count {
        let x = reader.read_f64(le)?;
        let y = reader.read_f64(le)?;
        let z = if has_z { Some(reader.read_f64(le)?) } else { None };
        if has_m {
            reader.read_f64(le)?;
        }
        bbox.update(x, y, z);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn wkb_point(x: f64, y: f64) -> Vec<u8> {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&x.to_le_bytes());
        buf.extend_from_slice(&y.to_le_bytes());
        buf
    }

    fn wkb_point_z(x: f64, y: f64, z: f64) -> Vec<u8> {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&1001u32.to_le_bytes());
        buf.extend_from_slice(&x.to_le_bytes());
        buf.extend_from_slice(&y.to_le_bytes());
        buf.extend_from_slice(&z.to_le_bytes());
        buf
    }

    fn wkb_linestring(coords: &[(f64, f64)]) -> Vec<u8> {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&(coords.len() as u32).to_le_bytes());
        for (x, y) in coords {
            buf.extend_from_slice(&x.to_le_bytes());
            buf.extend_from_slice(&y.to_le_bytes());
        }
        buf
    }

    fn wkb_multipoint(points: &[(f64, f64)]) -> Vec<u8> {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&(points.len() as u32).to_le_bytes());
        for (x, y) in points {
            buf.extend_from_slice(&wkb_point(*x, *y));
        }
        buf
    }

    fn scan(buf: &[u8]) -> (Bbox, BTreeSet<u32>) {
        let mut bbox = Bbox::empty();
        let mut types = BTreeSet::new();
        scan_geometry(buf, &mut bbox, &mut types).unwrap();
        (bbox, types)
    }

    #[test]
    fn test_point() {
        let (bbox, types) = scan(&wkb_point(4.9, 52.4));
        assert_eq!(bbox.to_vec(), vec![4.9, 52.4, 4.9, 52.4]);
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_point_z() {
        let (bbox, types) = scan(&wkb_point_z(1.0, 2.0, 3.0));
        assert_eq!(bbox.to_vec(), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec![1001]);
    }

    #[test]
    fn test_ewkb_z_flag() {
        // Same payload as ISO 1001 but flagged EWKB-style.
        let mut buf = vec![1u8];
        buf.extend_from_slice(&(1u32 | 0x8000_0000).to_le_bytes());
        buf.extend_from_slice(&1.0f64.to_le_bytes());
        buf.extend_from_slice(&2.0f64.to_le_bytes());
        buf.extend_from_slice(&3.0f64.to_le_bytes());

        let (bbox, types) = scan(&buf);
        assert_eq!(bbox.to_vec(), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec![1001]);
    }

    #[test]
    fn test_ewkb_srid_is_skipped() {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&(1u32 | 0x2000_0000).to_le_bytes());
        buf.extend_from_slice(&4326u32.to_le_bytes());
        buf.extend_from_slice(&(-1.5f64).to_le_bytes());
        buf.extend_from_slice(&0.5f64.to_le_bytes());

        let (bbox, types) = scan(&buf);
        assert_eq!(bbox.to_vec(), vec![-1.5, 0.5, -1.5, 0.5]);
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_big_endian_point() {
        let mut buf = vec![0u8];
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&10.0f64.to_be_bytes());
        buf.extend_from_slice(&20.0f64.to_be_bytes());

        let (bbox, _) = scan(&buf);
        assert_eq!(bbox.to_vec(), vec![10.0, 20.0, 10.0, 20.0]);
    }

    #[test]
    fn test_linestring_envelope() {
        let (bbox, types) = scan(&wkb_linestring(&[(0.0, 1.0), (2.0, 3.0), (-1.0, 0.5)]));
        assert_eq!(bbox.to_vec(), vec![-1.0, 0.5, 2.0, 3.0]);
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_multipoint_records_only_outer_type() {
        let (bbox, types) = scan(&wkb_multipoint(&[(0.0, 0.0), (5.0, -5.0)]));
        assert_eq!(bbox.to_vec(), vec![0.0, -5.0, 5.0, 0.0]);
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_empty_point_contributes_no_extent() {
        let (bbox, types) = scan(&wkb_point(f64::NAN, f64::NAN));
        assert!(bbox.is_empty());
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_truncated_buffer() {
        let buf = wkb_point(1.0, 2.0);
        let mut bbox = Bbox::empty();
        let mut types = BTreeSet::new();
        let err = scan_geometry(&buf[..10], &mut bbox, &mut types).unwrap_err();
        assert!(matches!(err, WkbError::Truncated(_)));
    }

    #[test]
    fn test_unknown_type_code() {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&99u32.to_le_bytes());
        let mut bbox = Bbox::empty();
        let mut types = BTreeSet::new();
        let err = scan_geometry(&buf, &mut bbox, &mut types).unwrap_err();
        assert!(matches!(err, WkbError::UnknownType(99)));
    }

    #[test]
    fn test_invalid_byte_order() {
        let buf = vec![7u8, 0, 0, 0, 0];
        let mut bbox = Bbox::empty();
        let mut types = BTreeSet::new();
        let err = scan_geometry(&buf, &mut bbox, &mut types).unwrap_err();
        assert!(matches!(err, WkbError::InvalidByteOrder(7)));
    }

    proptest! {
        #[test]
        fn prop_point_envelope_is_minmax(
            points in prop::collection::vec((-180.0f64..180.0, -90.0f64..90.0), 1..50)
        ) {
            let mut bbox = Bbox::empty();
            let mut types = BTreeSet::new();
            for (x, y) in &points {
                scan_geometry(&wkb_point(*x, *y), &mut bbox, &mut types).unwrap();
            }

            let xmin = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
            let xmax = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
            let ymin = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
            let ymax = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

            prop_assert_eq!(bbox.to_vec(), vec![xmin, ymin, xmax, ymax]);
        }
    }
}
