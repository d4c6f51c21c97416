// ── Layer descriptor types ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Layer category, as supplied by the catalog that describes the layer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[non_exhaustive]
pub enum LayerType {
    Boundary,
    Road,
    Waterway,
    Landuse,
    Building,
    PointOfInterest,
    #[default]
    Other,
}

/// Stroke pattern for line and polygon outlines.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Bold,
    DashDotDot,
    DashDotDashDotDot,
}

impl LineStyle {
    /// SVG-style dash array, or `None` for a continuous stroke.
    pub fn dash_array(self) -> Option<&'static str> {
        match self {
            Self::Solid | Self::Bold => None,
            Self::Dashed => Some("6 6"),
            Self::DashDotDot => Some("20 8 3 8 3 8"),
            Self::DashDotDashDotDot => Some("15 5 3 5 15 5 3 5 3 5"),
        }
    }

    /// Stroke width in pixels.
    pub fn weight(self) -> u32 {
        match self {
            Self::Bold => 6,
            _ => 3,
        }
    }
}

/// A CSS color: `#rgb`, `#rrggbb`, `#rrggbbaa`, or a named color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let valid = if let Some(hex) = s.strip_prefix('#') {
            matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
        } else {
            !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
        };
        if valid {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(format!("invalid color '{s}' (expected #rgb, #rrggbb, #rrggbbaa or a color name)"))
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-layer visual metadata. Every field is optional; an absent field
/// means "leave the renderer's default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_style: Option<LineStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_opacity: Option<f64>,
}

impl StyleMeta {
    pub fn is_empty(&self) -> bool {
        self.color.is_none()
            && self.line_style.is_none()
            && self.icon_url.is_none()
            && self.fill_opacity.is_none()
    }
}

/// Identity and source of one layer.
///
/// `key` is the cache and dedup identity; two descriptors with the same
/// key are the same layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub key: String,
    pub id: String,
    #[serde(rename = "type", default)]
    pub layer_type: LayerType,
    /// GeoJSON resource to fetch.
    pub url: String,
    /// Simplification tolerance in coordinate units. Overrides the
    /// pipeline default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "StyleMeta::is_empty")]
    pub style: StyleMeta,
}

impl LayerDescriptor {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            id: key.clone(),
            key,
            layer_type: LayerType::default(),
            url: url.into(),
            tolerance: None,
            style: StyleMeta::default(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_style(mut self, style: StyleMeta) -> Self {
        self.style = style;
        self
    }

    pub fn with_type(mut self, layer_type: LayerType) -> Self {
        self.layer_type = layer_type;
        self
    }
}
