// ── Style enrichment ──
//
// Merges per-layer visual metadata into feature properties. Additive only:
// a property already present on the feature always wins.

use geolayer_api::Feature;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Color, LineStyle, StyleMeta};

/// Property names written by the enricher.
pub mod props {
    pub const STROKE: &str = "stroke";
    pub const STROKE_OPACITY: &str = "stroke-opacity";
    pub const STROKE_WIDTH: &str = "stroke-width";
    pub const STROKE_DASHARRAY: &str = "stroke-dasharray";
    pub const FILL: &str = "fill";
    pub const FILL_OPACITY: &str = "fill-opacity";
    pub const ICON: &str = "icon";
}

pub const DEFAULT_FILL_OPACITY: f64 = 0.8;

/// Style with the icon already resolved to a renderer-usable reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStyle {
    pub color: Option<Color>,
    pub line_style: Option<LineStyle>,
    pub fill_opacity: Option<f64>,
    /// Local blob reference or remote URL, as returned by the icon cache.
    pub icon: Option<String>,
}

impl ResolvedStyle {
    pub fn from_meta(meta: &StyleMeta, icon: Option<String>) -> Self {
        Self {
            color: meta.color.clone(),
            line_style: meta.line_style,
            fill_opacity: meta.fill_opacity,
            icon,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.line_style.is_none() && self.icon.is_none()
    }
}

/// Apply `style` to one feature.
pub fn enrich(mut feature: Feature, style: &ResolvedStyle) -> Feature {
    let properties = &mut feature.properties;

    if let Some(color) = &style.color {
        set_default(properties, props::STROKE, color.as_str().into());
        set_default(properties, props::STROKE_OPACITY, 1.into());
        set_default(properties, props::FILL, color.as_str().into());
        set_default(
            properties,
            props::FILL_OPACITY,
            style.fill_opacity.unwrap_or(DEFAULT_FILL_OPACITY).into(),
        );
    }

    if let Some(line) = style.line_style {
        if let Some(dash) = line.dash_array() {
            set_default(properties, props::STROKE_DASHARRAY, dash.into());
        }
        set_default(properties, props::STROKE_WIDTH, line.weight().into());
    }

    let point_like = feature
        .geometry
        .as_ref()
        .is_some_and(geolayer_api::Geometry::is_point_like);
    if let (Some(icon), true) = (&style.icon, point_like) {
        set_default(&mut feature.properties, props::ICON, icon.as_str().into());
    }

    feature
}

fn set_default(properties: &mut Map<String, Value>, key: &str, value: Value) {
    properties.entry(key).or_insert(value);
}
