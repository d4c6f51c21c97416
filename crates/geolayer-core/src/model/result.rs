// ── Pipeline output types ──

use std::ops::Deref;

use chrono::{DateTime, Utc};
use geolayer_api::FeatureCollection;
use serde::{Deserialize, Serialize};

use super::layer::LayerDescriptor;

/// A FeatureCollection whose feature properties carry resolved style and
/// icon-reference fields, ready for a renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnhancedFeatureCollection(pub FeatureCollection);

impl EnhancedFeatureCollection {
    pub fn into_inner(self) -> FeatureCollection {
        self.0
    }
}

impl Deref for EnhancedFeatureCollection {
    type Target = FeatureCollection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Processed result for one layer key. Created once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub data: EnhancedFeatureCollection,
    pub meta: LayerDescriptor,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(data: EnhancedFeatureCollection, meta: LayerDescriptor) -> Self {
        Self {
            data,
            meta,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.meta.key
    }
}

/// One element of a batch processing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedCollection {
    pub key: String,
    pub data: EnhancedFeatureCollection,
}

/// Batch progress, emitted once per settled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}
