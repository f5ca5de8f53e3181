//! Waterbody records and the vector-dataset collaborator.

use crate::error::{CwbError, Result};
use crate::geometry::{self, BoundingBox, RawGeometry};
use crate::ObjectId;
use geo::{Contains, MultiPolygon, Point};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

/// Property holding the waterbody identifier in the vector dataset.
pub const OBJECTID_PROPERTY: &str = "OBJECTID";
/// Property holding the waterbody name in the vector dataset.
pub const NAME_PROPERTY: &str = "GNIS_NAME";

/// A named waterbody polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Waterbody {
    pub objectid: ObjectId,
    pub name: String,
    pub crs: Option<String>,
    pub geometry: MultiPolygon<f64>,
    pub properties: BTreeMap<String, Value>,
    /// Why the source geometry could not be read; `geometry` is empty then.
    pub unreadable: Option<String>,
}

impl Waterbody {
    pub fn new(objectid: ObjectId, name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            objectid,
            name: name.into(),
            crs: None,
            geometry,
            properties: BTreeMap::new(),
            unreadable: None,
        }
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::of(&self.geometry)
    }

    /// Reject geometry that cannot be aggregated: `ReadFailure` when the
    /// source geometry was unreadable, `MalformedInput` when it is invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(reason) = &self.unreadable {
            return Err(CwbError::ReadFailure(format!(
                "waterbody {} geometry: {}",
                self.objectid, reason
            )));
        }
        geometry::validate_polygon(&self.geometry).map_err(|e| match e {
            CwbError::MalformedInput(msg) => {
                CwbError::MalformedInput(format!("waterbody {}: {}", self.objectid, msg))
            }
            other => other,
        })
    }
}

/// Search hit returned by name and point lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaterbodyName {
    pub objectid: ObjectId,
    pub name: String,
}

impl From<&Waterbody> for WaterbodyName {
    fn from(wb: &Waterbody) -> Self {
        Self {
            objectid: wb.objectid,
            name: wb.name.clone(),
        }
    }
}

/// Read-only access to the waterbody inventory.
///
/// Listing order is ascending object id, which is stable across calls and
/// is what aggregation cursors are keyed on.
pub trait WaterbodySource: Send + Sync {
    /// Every waterbody, ordered by object id.
    fn list_waterbodies(&self) -> Result<Vec<Waterbody>>;

    /// Up to `limit` waterbodies with object id greater than `after`.
    fn waterbodies_after(&self, after: Option<ObjectId>, limit: usize) -> Result<Vec<Waterbody>> {
        Ok(self
            .list_waterbodies()?
            .into_iter()
            .filter(|wb| after.map_or(true, |a| wb.objectid > a))
            .take(limit)
            .collect())
    }

    fn get(&self, objectid: ObjectId) -> Result<Option<Waterbody>>;

    /// Case-insensitive substring search on the waterbody name.
    fn find_by_name(&self, substring: &str) -> Result<Vec<WaterbodyName>>;

    /// The waterbody whose polygon contains the point, if any.
    fn find_by_point(&self, x: f64, y: f64) -> Result<Option<WaterbodyName>>;

    fn properties_of(&self, objectid: ObjectId) -> Result<Option<BTreeMap<String, Value>>>;
}

/// In-memory waterbody inventory keyed by object id.
#[derive(Debug, Clone, Default)]
pub struct WaterbodyInventory {
    waterbodies: BTreeMap<ObjectId, Waterbody>,
}

#[derive(Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    crs: Option<NamedCrs>,
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct NamedCrs {
    properties: CrsProperties,
}

#[derive(Deserialize)]
struct CrsProperties {
    name: String,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    properties: BTreeMap<String, Value>,
    #[serde(default)]
    geometry: Option<RawGeometry>,
}

fn objectid_of(properties: &BTreeMap<String, Value>) -> Option<ObjectId> {
    match properties.get(OBJECTID_PROPERTY)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl WaterbodyInventory {
    /// Build an inventory; duplicate object ids are rejected.
    pub fn new(waterbodies: Vec<Waterbody>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for wb in waterbodies {
            let id = wb.objectid;
            if map.insert(id, wb).is_some() {
                return Err(CwbError::MalformedInput(format!(
                    "duplicate {} {}",
                    OBJECTID_PROPERTY, id
                )));
            }
        }
        Ok(Self { waterbodies: map })
    }

    /// Parse a GeoJSON FeatureCollection.
    ///
    /// Features must carry an integer `OBJECTID`. A feature whose geometry
    /// cannot be read is still loaded, with the reason in `unreadable`.
    pub fn from_geojson(body: &str) -> Result<Self> {
        let collection: FeatureCollection = serde_json::from_str(body)?;
        let crs = collection.crs.map(|c| c.properties.name);
        let mut waterbodies = Vec::with_capacity(collection.features.len());
        for (i, feature) in collection.features.into_iter().enumerate() {
            let objectid = objectid_of(&feature.properties).ok_or_else(|| {
                CwbError::MalformedInput(format!(
                    "feature {} has no integer {}",
                    i, OBJECTID_PROPERTY
                ))
            })?;
            let (geometry, unreadable) =
                match feature.geometry.as_ref().map(RawGeometry::to_multipolygon) {
                    Some(Ok(g)) => (g, None),
                    Some(Err(e)) => {
                        warn!("Waterbody {} geometry unreadable: {}", objectid, e);
                        (MultiPolygon::new(vec![]), Some(e.to_string()))
                    }
                    None => {
                        warn!("Waterbody {} has no geometry", objectid);
                        (MultiPolygon::new(vec![]), Some("no geometry".to_string()))
                    }
                };
            let name = feature
                .properties
                .get(NAME_PROPERTY)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            waterbodies.push(Waterbody {
                objectid,
                name,
                crs: crs.clone(),
                geometry,
                properties: feature.properties,
                unreadable,
            });
        }
        Self::new(waterbodies)
    }

    /// Load a GeoJSON FeatureCollection from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path)
            .map_err(|e| CwbError::ReadFailure(format!("{}: {}", path.display(), e)))?;
        let inventory = Self::from_geojson(&body)?;
        info!("Loaded {} waterbodies from {}", inventory.len(), path.display());
        Ok(inventory)
    }

    pub fn len(&self) -> usize {
        self.waterbodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waterbodies.is_empty()
    }
}

impl WaterbodySource for WaterbodyInventory {
    fn list_waterbodies(&self) -> Result<Vec<Waterbody>> {
        Ok(self.waterbodies.values().cloned().collect())
    }

    fn waterbodies_after(&self, after: Option<ObjectId>, limit: usize) -> Result<Vec<Waterbody>> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(self
            .waterbodies
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, wb)| wb.clone())
            .collect())
    }

    fn get(&self, objectid: ObjectId) -> Result<Option<Waterbody>> {
        Ok(self.waterbodies.get(&objectid).cloned())
    }

    fn find_by_name(&self, substring: &str) -> Result<Vec<WaterbodyName>> {
        let needle = substring.replace(['\'', '"'], "").to_lowercase();
        Ok(self
            .waterbodies
            .values()
            .filter(|wb| wb.name.to_lowercase().contains(&needle))
            .map(WaterbodyName::from)
            .collect())
    }

    fn find_by_point(&self, x: f64, y: f64) -> Result<Option<WaterbodyName>> {
        let point = Point::new(x, y);
        Ok(self
            .waterbodies
            .values()
            .filter(|wb| wb.bbox().is_some_and(|b| b.contains_point(x, y)))
            .find(|wb| wb.geometry.contains(&point))
            .map(WaterbodyName::from))
    }

    fn properties_of(&self, objectid: ObjectId) -> Result<Option<BTreeMap<String, Value>>> {
        Ok(self.waterbodies.get(&objectid).map(|wb| wb.properties.clone()))
    }
}
