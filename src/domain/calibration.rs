//! Calibration value objects: the four-corner quadrilateral and the record
//! persisted per mesa.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in viewport pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Named corner of the projection quadrilateral.
///
/// Corners are an indexed array-of-four, decoupled from any rendering
/// handle; the index matches the wire order TL, TR, BL, BR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    /// Position of this corner in the flat 8-number wire encoding.
    pub fn index(self) -> usize {
        match self {
            Corner::TopLeft => 0,
            Corner::TopRight => 1,
            Corner::BottomLeft => 2,
            Corner::BottomRight => 3,
        }
    }
}

/// Exactly four corner points, ordered TL, TR, BL, BR.
///
/// Serialized on the wire as a flat array of 8 numbers, matching the
/// `corners` field of the calibration JSON.
///
/// # Examples
/// ```
/// use proyeccion::domain::{Corner, CornerSet};
///
/// let square = CornerSet::from_flat([0.0, 0.0, 100.0, 0.0, 0.0, 100.0, 100.0, 100.0]);
/// assert_eq!(square.get(Corner::BottomRight).x, 100.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 8]", into = "[f64; 8]")]
pub struct CornerSet([Point; 4]);

impl CornerSet {
    /// Full-viewport default: corners on the viewport edges.
    pub fn full_viewport(width: f64, height: f64) -> Self {
        Self::from_flat([0.0, 0.0, width, 0.0, 0.0, height, width, height])
    }

    pub fn from_flat(flat: [f64; 8]) -> Self {
        Self([
            Point::new(flat[0], flat[1]),
            Point::new(flat[2], flat[3]),
            Point::new(flat[4], flat[5]),
            Point::new(flat[6], flat[7]),
        ])
    }

    pub fn to_flat(self) -> [f64; 8] {
        let [tl, tr, bl, br] = self.0;
        [tl.x, tl.y, tr.x, tr.y, bl.x, bl.y, br.x, br.y]
    }

    pub fn get(&self, corner: Corner) -> Point {
        self.0[corner.index()]
    }

    pub fn set(&mut self, corner: Corner, point: Point) {
        self.0[corner.index()] = point;
    }

    /// Content hash over the exact bit patterns of the coordinates, used to
    /// skip re-applying an externally pushed set identical to the current one.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        for value in self.to_flat() {
            value.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl From<[f64; 8]> for CornerSet {
    fn from(flat: [f64; 8]) -> Self {
        Self::from_flat(flat)
    }
}

impl From<CornerSet> for [f64; 8] {
    fn from(corners: CornerSet) -> Self {
        corners.to_flat()
    }
}

/// Calibration record owned by a mesa; overwritten on every accepted change,
/// never deleted independently of the mesa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRecord {
    pub corners: CornerSet,
    pub screen_width: f64,
    pub screen_height: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_set_serializes_as_flat_array() {
        let corners = CornerSet::from_flat([0.0, 0.0, 10.0, 0.0, 0.0, 20.0, 10.0, 20.0]);
        let encoded = serde_json::to_string(&corners).expect("corners should serialize");
        assert_eq!(encoded, "[0.0,0.0,10.0,0.0,0.0,20.0,10.0,20.0]");
        let decoded: CornerSet = serde_json::from_str(&encoded).expect("corners should parse");
        assert_eq!(decoded, corners);
    }

    #[test]
    fn content_hash_detects_identity_and_change() {
        let a = CornerSet::full_viewport(1920.0, 1080.0);
        let mut b = a;
        assert_eq!(a.content_hash(), b.content_hash());
        b.set(Corner::TopRight, Point::new(1919.0, 0.0));
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn record_uses_camel_case_wire_names() {
        let record = CalibrationRecord {
            corners: CornerSet::full_viewport(800.0, 600.0),
            screen_width: 800.0,
            screen_height: 600.0,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&record).expect("record should serialize");
        assert!(value.get("screenWidth").is_some());
        assert!(value.get("screenHeight").is_some());
    }
}
