// ── GeoJSON wire model ──
//
// Serde types for the subset of RFC 7946 the pipeline consumes. Feature
// order and property order are preserved as received.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// `type` marker for a FeatureCollection document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    #[default]
    FeatureCollection,
}

/// `type` marker for a single Feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    #[default]
    Feature,
}

/// A GeoJSON position: `[x, y]` or `[x, y, z]`.
///
/// Kept as the raw number array so altitude and any extra ordinates
/// survive a round trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(pub Vec<f64>);

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self(vec![x, y])
    }

    pub fn x(&self) -> f64 {
        self.0.first().copied().unwrap_or(0.0)
    }

    pub fn y(&self) -> f64 {
        self.0.get(1).copied().unwrap_or(0.0)
    }
}

impl From<(f64, f64)> for Position {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// A closed sequence of positions (first == last).
pub type Ring = Vec<Position>;

/// Tagged geometry union, discriminated by the GeoJSON `type` member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// GeoJSON type name of this geometry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Point { .. } => "Point",
            Self::MultiPoint { .. } => "MultiPoint",
            Self::LineString { .. } => "LineString",
            Self::MultiLineString { .. } => "MultiLineString",
            Self::Polygon { .. } => "Polygon",
            Self::MultiPolygon { .. } => "MultiPolygon",
            Self::GeometryCollection { .. } => "GeometryCollection",
        }
    }

    /// `true` for geometries rendered as markers.
    pub fn is_point_like(&self) -> bool {
        matches!(self, Self::Point { .. } | Self::MultiPoint { .. })
    }

    /// Total number of positions, recursing into collections.
    pub fn position_count(&self) -> usize {
        match self {
            Self::Point { .. } => 1,
            Self::MultiPoint { coordinates } | Self::LineString { coordinates } => {
                coordinates.len()
            }
            Self::MultiLineString { coordinates } | Self::Polygon { coordinates } => {
                coordinates.iter().map(Vec::len).sum()
            }
            Self::MultiPolygon { coordinates } => coordinates
                .iter()
                .flat_map(|poly| poly.iter().map(Vec::len))
                .sum(),
            Self::GeometryCollection { geometries } => {
                geometries.iter().map(Self::position_count).sum()
            }
        }
    }
}

/// A single GeoJSON Feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: FeatureKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// `null` geometry is legal GeoJSON (unlocated feature).
    pub geometry: Option<Geometry>,

    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub properties: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            kind: FeatureKind::Feature,
            id: None,
            geometry: Some(geometry),
            properties: Map::new(),
            bbox: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A GeoJSON FeatureCollection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: CollectionKind,

    pub features: Vec<Feature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    /// Parse a complete, fully-buffered response body.
    ///
    /// This is the non-streaming path, also used as the fallback when the
    /// incremental parser rejects a stream.
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(body).map_err(|e| Error::parse(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Total number of positions across every feature.
    pub fn position_count(&self) -> usize {
        self.features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .map(Geometry::position_count)
            .sum()
    }
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}
