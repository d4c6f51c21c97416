// ── Active layer set ──
//
// Which layer keys are currently toggled on. Disabling a layer removes it
// here only; its processed result stays in the `LayerResultCache`.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;

/// Sorted snapshot of active keys.
pub type ActiveSnapshot = Arc<BTreeSet<String>>;

#[derive(Debug)]
pub struct ActiveLayers {
    keys: watch::Sender<ActiveSnapshot>,
}

impl Default for ActiveLayers {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveLayers {
    pub fn new() -> Self {
        let (keys, _) = watch::channel(Arc::new(BTreeSet::new()));
        Self { keys }
    }

    /// Mark a key active. Returns `true` if it was not active before.
    pub fn activate(&self, key: &str) -> bool {
        self.keys.send_if_modified(|set| {
            if set.contains(key) {
                return false;
            }
            Arc::make_mut(set).insert(key.to_owned());
            true
        })
    }

    /// Mark a key inactive. Returns `true` if it was active.
    pub fn deactivate(&self, key: &str) -> bool {
        self.keys.send_if_modified(|set| {
            if !set.contains(key) {
                return false;
            }
            Arc::make_mut(set).remove(key);
            true
        })
    }

    /// Deactivate several keys with a single notification. Returns how many
    /// were active.
    pub fn deactivate_all<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> usize {
        let mut removed = 0;
        self.keys.send_if_modified(|set| {
            let next = Arc::make_mut(set);
            for key in keys {
                if next.remove(key) {
                    removed += 1;
                }
            }
            removed > 0
        });
        removed
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.keys.borrow().contains(key)
    }

    pub fn snapshot(&self) -> ActiveSnapshot {
        self.keys.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActiveSnapshot> {
        self.keys.subscribe()
    }
}
