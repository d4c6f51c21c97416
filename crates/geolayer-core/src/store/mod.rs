// ── Shared pipeline state ──

mod active;
mod layer_cache;

pub use active::{ActiveLayers, ActiveSnapshot};
pub use layer_cache::{LayerResultCache, LayerSnapshot};
