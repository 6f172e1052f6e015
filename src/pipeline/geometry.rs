//! Workstation region geometry.
//!
//! Configuration rows carry a rectangle plus an optional polygon outline.
//! The polygon arrives in one of three encodings (a JSON-encoded string, a
//! list of `{x, y}` maps, or a list of `[x, y]` pairs); all of them
//! normalize to one ordered vertex list here, so everything downstream only
//! ever sees the two tagged variants.

use serde_json::Value;

use crate::db::Workstation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionGeometry {
    Rectangle { x: i32, y: i32, w: i32, h: i32 },
    Polygon(Vec<(i32, i32)>),
}

impl RegionGeometry {
    /// Geometry for one poll of one workstation. Unusable polygon data is
    /// logged and downgraded to the rectangle; it never aborts a poll.
    pub fn for_workstation(ws: &Workstation) -> RegionGeometry {
        if let Some(raw) = ws.roi_polygon.as_deref() {
            match parse_polygon(raw) {
                Some(vertices) => return RegionGeometry::Polygon(vertices),
                None => log::warn!(
                    "workstation {} has unusable polygon data, falling back to rectangle",
                    ws.id
                ),
            }
        }

        RegionGeometry::Rectangle {
            x: ws.x,
            y: ws.y,
            w: ws.w,
            h: ws.h,
        }
    }
}

/// Normalize raw polygon text into an ordered vertex list.
///
/// Returns `None` for anything unusable: unparsable text, a non-array
/// value, a vertex in neither accepted shape, or fewer than three vertices.
pub fn parse_polygon(raw: &str) -> Option<Vec<(i32, i32)>> {
    let value: Value = serde_json::from_str(raw).ok()?;

    // A JSON string is one level of extra encoding around the real list.
    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner).ok()?,
        other => other,
    };

    let items = value.as_array()?;
    let mut vertices = Vec::with_capacity(items.len());
    for item in items {
        vertices.push(vertex_from_value(item)?);
    }

    if vertices.len() < 3 {
        return None;
    }
    Some(vertices)
}

fn vertex_from_value(item: &Value) -> Option<(i32, i32)> {
    match item {
        Value::Object(map) => {
            let x = map.get("x")?.as_f64()?;
            let y = map.get("y")?.as_f64()?;
            Some((x.round() as i32, y.round() as i32))
        }
        Value::Array(pair) if pair.len() == 2 => {
            let x = pair[0].as_f64()?;
            let y = pair[1].as_f64()?;
            Some((x.round() as i32, y.round() as i32))
        }
        _ => None,
    }
}
