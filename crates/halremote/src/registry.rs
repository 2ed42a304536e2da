//! Session pin indexes.

use crate::pin::HalPin;
use std::collections::HashMap;
use std::sync::Arc;

/// Two indexes over the pins of one bound session: by local name and by
/// server-assigned handle.
///
/// The name index is populated when a session starts; the handle index is
/// populated from full updates and replaced wholesale on every new snapshot,
/// so a server that renumbers pins cannot leak stale entries.
#[derive(Default)]
pub struct PinRegistry {
    by_name: HashMap<String, Arc<HalPin>>,
    by_handle: HashMap<u32, Arc<HalPin>>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pin by name. Pins with an empty name and disabled pins
    /// are ignored; returns whether the pin was added.
    pub fn add(&mut self, pin: Arc<HalPin>) -> bool {
        if pin.name().is_empty() || !pin.enabled() {
            return false;
        }
        self.by_name.insert(pin.name().to_string(), pin);
        true
    }

    /// Links a local name to a server handle. Both indexes refer to the same
    /// pin afterwards. Returns `false` when the name is unknown.
    pub fn bind_handle(&mut self, name: &str, handle: u32) -> bool {
        match self.by_name.get(name) {
            Some(pin) => {
                pin.set_handle(handle);
                self.by_handle.insert(handle, Arc::clone(pin));
                true
            }
            None => false,
        }
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<HalPin>> {
        self.by_name.get(name).cloned()
    }

    pub fn by_handle(&self, handle: u32) -> Option<Arc<HalPin>> {
        self.by_handle.get(&handle).cloned()
    }

    pub fn pins(&self) -> impl Iterator<Item = &Arc<HalPin>> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Clears the synced flag on every registered pin.
    pub fn unsync_all(&self) {
        for pin in self.by_name.values() {
            pin.set_synced(false);
        }
    }

    /// Drops the handle index and every registered pin's stored handle.
    /// A following full update rebuilds both from scratch.
    pub fn clear_handles(&mut self) {
        for pin in self.by_name.values() {
            pin.clear_handle();
        }
        self.by_handle.clear();
    }

    /// Drops both indexes. The pins themselves live on in their container.
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_handle.clear();
    }
}
