// ── Domain model ──

pub mod layer;
pub mod result;

pub use layer::{Color, LayerDescriptor, LayerType, LineStyle, StyleMeta};
pub use result::{BatchProgress, CacheEntry, EnhancedFeatureCollection, KeyedCollection};
