//! Bounding boxes, polygon validation and GeoJSON geometry conversion.

use crate::error::{CwbError, Result};
use geo::{coord, Area, BoundingRect, Coord, LineString, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Axis-aligned bounding box in the raster's coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounding box of a (multi)polygon, `None` when it has no coordinates.
    pub fn of(geometry: &MultiPolygon<f64>) -> Option<Self> {
        geometry
            .bounding_rect()
            .map(|r| Self::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Closed-interval overlap test; touching edges count as intersecting.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Overlapping region of two boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.max_x > self.min_x
            && self.max_y > self.min_y
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }
}

/// Check that a waterbody geometry can be aggregated.
///
/// Every polygon needs an exterior ring of at least four positions with
/// finite coordinates and a non-zero area.
pub fn validate_polygon(geometry: &MultiPolygon<f64>) -> Result<()> {
    if geometry.0.is_empty() {
        return Err(CwbError::MalformedInput("geometry has no polygons".to_string()));
    }
    for (i, polygon) in geometry.0.iter().enumerate() {
        let exterior = polygon.exterior();
        if exterior.0.len() < 4 {
            return Err(CwbError::MalformedInput(format!(
                "polygon {} exterior ring has {} positions, need at least 4",
                i,
                exterior.0.len()
            )));
        }
        let rings = std::iter::once(exterior).chain(polygon.interiors().iter());
        for ring in rings {
            if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(CwbError::MalformedInput(format!(
                    "polygon {} has non-finite coordinates",
                    i
                )));
            }
        }
        if polygon.unsigned_area() <= 0.0 {
            return Err(CwbError::MalformedInput(format!("polygon {} has zero area", i)));
        }
    }
    Ok(())
}

/// Geometry object as found in a GeoJSON feature.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

type RingPositions = Vec<Vec<f64>>;

fn ring_from_positions(positions: &[Vec<f64>]) -> LineString<f64> {
    // Positions shorter than two ordinates become NaN so validation rejects them.
    positions
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => coord! { x: *x, y: *y },
            _ => coord! { x: f64::NAN, y: f64::NAN },
        })
        .collect::<Vec<Coord<f64>>>()
        .into()
}

fn polygon_from_rings(rings: &[RingPositions]) -> Polygon<f64> {
    match rings.split_first() {
        Some((exterior, interiors)) => Polygon::new(
            ring_from_positions(exterior),
            interiors.iter().map(|r| ring_from_positions(r)).collect(),
        ),
        None => Polygon::new(LineString::new(vec![]), vec![]),
    }
}

impl RawGeometry {
    /// Convert into a multipolygon; only `Polygon` and `MultiPolygon` are supported.
    pub fn to_multipolygon(&self) -> Result<MultiPolygon<f64>> {
        match self.kind.as_str() {
            "Polygon" => {
                let rings: Vec<RingPositions> = serde_json::from_value(self.coordinates.clone())?;
                Ok(MultiPolygon::new(vec![polygon_from_rings(&rings)]))
            }
            "MultiPolygon" => {
                let polygons: Vec<Vec<RingPositions>> =
                    serde_json::from_value(self.coordinates.clone())?;
                Ok(MultiPolygon::new(
                    polygons.iter().map(|p| polygon_from_rings(p)).collect(),
                ))
            }
            other => Err(CwbError::MalformedInput(format!(
                "unsupported geometry type '{}'",
                other
            ))),
        }
    }
}

fn ring_to_positions(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.0.iter().map(|c| [c.x, c.y]).collect()
}

fn polygon_to_rings(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .map(ring_to_positions)
        .collect()
}

/// Render a geometry as a GeoJSON geometry object.
pub fn to_geojson(geometry: &MultiPolygon<f64>) -> Value {
    match geometry.0.as_slice() {
        [single] => json!({
            "type": "Polygon",
            "coordinates": polygon_to_rings(single),
        }),
        polygons => json!({
            "type": "MultiPolygon",
            "coordinates": polygons.iter().map(polygon_to_rings).collect::<Vec<_>>(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min_x: f64, min_y: f64, size: f64) -> MultiPolygon<f64> {
        let raw: RawGeometry = serde_json::from_value(json!({
            "type": "Polygon",
            "coordinates": [[
                [min_x, min_y],
                [min_x + size, min_y],
                [min_x + size, min_y + size],
                [min_x, min_y + size],
                [min_x, min_y]
            ]]
        }))
        .unwrap();
        raw.to_multipolygon().unwrap()
    }

    #[test]
    fn bounding_box_of_polygon() {
        let bbox = BoundingBox::of(&square(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(bbox, BoundingBox::new(1.0, 2.0, 4.0, 5.0));
        assert!(BoundingBox::of(&MultiPolygon::new(vec![])).is_none());
    }

    #[test]
    fn bounding_box_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.intersection(&b), Some(BoundingBox::new(5.0, 5.0, 10.0, 10.0)));
        assert!(a.intersection(&c).is_none());
        assert!(a.intersects(&BoundingBox::new(10.0, 0.0, 20.0, 10.0)));
    }

    #[test]
    fn validate_accepts_square() {
        assert!(validate_polygon(&square(0.0, 0.0, 1.0)).is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_rings() {
        let raw: RawGeometry = serde_json::from_value(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 1.0]]]
        }))
        .unwrap();
        let geometry = raw.to_multipolygon().unwrap();
        assert!(matches!(
            validate_polygon(&geometry),
            Err(CwbError::MalformedInput(_))
        ));
        assert!(validate_polygon(&MultiPolygon::new(vec![])).is_err());
    }

    #[test]
    fn validate_rejects_short_positions() {
        let raw: RawGeometry = serde_json::from_value(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
        }))
        .unwrap();
        let geometry = raw.to_multipolygon().unwrap();
        assert!(validate_polygon(&geometry).is_err());
    }

    #[test]
    fn unsupported_geometry_type() {
        let raw: RawGeometry =
            serde_json::from_value(json!({ "type": "Point", "coordinates": [0.0, 0.0] })).unwrap();
        assert!(matches!(raw.to_multipolygon(), Err(CwbError::MalformedInput(_))));
    }

    #[test]
    fn geojson_output_keeps_polygon_type() {
        let value = to_geojson(&square(0.0, 0.0, 2.0));
        assert_eq!(value["type"], "Polygon");
        assert_eq!(value["coordinates"][0].as_array().unwrap().len(), 5);
    }
}
