//! Point extraction from the shapes a case record may carry.
//!
//! Geometry arrives in whatever form the last editor of the case layer left
//! it in. Four shapes are recognized: a mapping with `x`/`y` keys (any case),
//! a GeoJSON-style `coordinates` pair, accessor-backed values whose `x`/`y`
//! read back as numeric strings, and a bare ordered pair. The first shape
//! that yields two finite numbers wins; nothing recognizable is a normal
//! outcome, not an error, and the task is created without geometry.

use serde_json::{json, Map, Value};

use crate::record::AttributeRecord;

/// WGS84, the only spatial reference the destination accepts.
pub const WGS84_WKID: u32 = 4326;

/// Attribute names a spatial value has been seen under.
const GEOMETRY_FIELDS: &[&str] = &["SHAPE", "shape", "geometry", "geom", "SHAPE@XY", "Shape"];

/// A canonical point location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub wkid: u32,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            wkid: WGS84_WKID,
        }
    }

    /// The JSON form the feature service expects.
    pub fn to_esri_json(&self) -> Value {
        json!({
            "x": self.x,
            "y": self.y,
            "spatialReference": { "wkid": self.wkid },
        })
    }
}

/// Try the record's geometry slot, then each known attribute name, and return
/// the first value that parses as a point.
pub fn extract_geometry(record: &AttributeRecord) -> Option<Point> {
    if let Some(point) = record.geometry.as_ref().and_then(point_from_value) {
        return Some(point);
    }
    GEOMETRY_FIELDS
        .iter()
        .filter_map(|field| record.get(field))
        .find_map(point_from_value)
}

fn point_from_value(value: &Value) -> Option<Point> {
    match value {
        Value::Object(map) => {
            if let (Some(x), Some(y)) = (lookup_ci(map, "x"), lookup_ci(map, "y")) {
                if let (Some(x), Some(y)) = (as_finite(x), as_finite(y)) {
                    return Some(Point::new(x, y));
                }
            }
            if let Some(Value::Array(coords)) = map.get("coordinates") {
                return pair_from_slice(coords);
            }
            None
        }
        Value::Array(items) => pair_from_slice(items),
        _ => None,
    }
}

fn pair_from_slice(items: &[Value]) -> Option<Point> {
    if items.len() < 2 {
        return None;
    }
    match (as_finite(&items[0]), as_finite(&items[1])) {
        (Some(x), Some(y)) => Some(Point::new(x, y)),
        _ => None,
    }
}

fn lookup_ci<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn as_finite(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
