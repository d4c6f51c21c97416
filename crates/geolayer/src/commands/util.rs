//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::path::Path;

use serde::Serialize;
use tabled::Tabled;

use geolayer_core::{CacheEntry, Color, FeatureCollection, LayerType, LineStyle, StyleMeta};

use crate::cli::StyleArgs;
use crate::error::CliError;

/// Build layer style metadata from `--color` / `--line-style` / `--fill-opacity`.
pub fn style_from_args(args: &StyleArgs, icon_url: Option<String>) -> Result<StyleMeta, CliError> {
    let color = args
        .color
        .as_deref()
        .map(str::parse::<Color>)
        .transpose()
        .map_err(|reason| CliError::Validation {
            field: "color".into(),
            reason,
        })?;

    let line_style = args
        .line_style
        .as_deref()
        .map(str::parse::<LineStyle>)
        .transpose()
        .map_err(|e| CliError::Validation {
            field: "line-style".into(),
            reason: e.to_string(),
        })?;

    if let Some(opacity) = args.fill_opacity {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(CliError::Validation {
                field: "fill-opacity".into(),
                reason: format!("expected a value between 0 and 1, got {opacity}"),
            });
        }
    }

    Ok(StyleMeta {
        color,
        line_style,
        icon_url,
        fill_opacity: args.fill_opacity,
    })
}

pub fn parse_layer_type(value: Option<&str>) -> Result<LayerType, CliError> {
    value.map_or(Ok(LayerType::default()), |v| {
        v.parse().map_err(|_| CliError::Validation {
            field: "type".into(),
            reason: format!("unknown layer type '{v}'"),
        })
    })
}

/// Tolerances must be finite and non-negative.
pub fn check_tolerance(tolerance: Option<f64>) -> Result<(), CliError> {
    match tolerance {
        Some(t) if !t.is_finite() || t < 0.0 => Err(CliError::Validation {
            field: "tolerance".into(),
            reason: format!("expected a non-negative number, got {t}"),
        }),
        _ => Ok(()),
    }
}

/// Read and parse a GeoJSON FeatureCollection file.
pub fn read_collection(path: &Path) -> Result<FeatureCollection, CliError> {
    let body = std::fs::read(path)?;
    FeatureCollection::from_slice(&body).map_err(|e| CliError::Parse {
        source_name: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

// ── Layer summary rows ───────────────────────────────────────────────

/// One loaded layer, for table and structured output.
#[derive(Debug, Serialize, Tabled)]
pub struct LayerSummary {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Type")]
    pub layer_type: String,
    #[tabled(rename = "Features")]
    pub features: usize,
    #[tabled(rename = "Positions")]
    pub positions: usize,
    #[tabled(rename = "Loaded")]
    pub loaded_at: String,
}

impl From<&CacheEntry> for LayerSummary {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.meta.key.clone(),
            layer_type: entry.meta.layer_type.to_string(),
            features: entry.data.len(),
            positions: entry.data.position_count(),
            loaded_at: entry.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn style_args_are_validated() {
        let args = StyleArgs {
            color: Some("#ABC".into()),
            line_style: Some("dash-dot-dot".into()),
            fill_opacity: Some(0.5),
        };
        let style = style_from_args(&args, None).unwrap();
        assert_eq!(style.color.unwrap().as_str(), "#abc");
        assert_eq!(style.line_style, Some(LineStyle::DashDotDot));

        let bad = StyleArgs {
            line_style: Some("wavy".into()),
            ..StyleArgs::default()
        };
        assert!(matches!(
            style_from_args(&bad, None),
            Err(CliError::Validation { ref field, .. }) if field == "line-style"
        ));

        let opaque = StyleArgs {
            fill_opacity: Some(1.5),
            ..StyleArgs::default()
        };
        assert!(style_from_args(&opaque, None).is_err());
    }

    #[test]
    fn layer_type_defaults_to_other() {
        assert_eq!(parse_layer_type(None).unwrap(), LayerType::Other);
        assert_eq!(parse_layer_type(Some("waterway")).unwrap(), LayerType::Waterway);
        assert!(parse_layer_type(Some("lava")).is_err());
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        assert!(check_tolerance(Some(-0.1)).is_err());
        assert!(check_tolerance(Some(f64::NAN)).is_err());
        assert!(check_tolerance(Some(0.0)).is_ok());
        assert!(check_tolerance(None).is_ok());
    }
}
