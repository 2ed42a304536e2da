//! Pin container tree.

use crate::pin::HalPin;
use parking_lot::Mutex;
use std::sync::Arc;

/// Holds the pins of a component, optionally nested in child containers.
///
/// The container owns the pins; sessions only borrow `Arc` references for
/// their lifetime, so pins survive disconnects and ready cycles.
#[derive(Default)]
pub struct HalPinContainer {
    pins: Mutex<Vec<Arc<HalPin>>>,
    children: Mutex<Vec<Arc<HalPinContainer>>>,
}

impl HalPinContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pin and returns the shared reference to it.
    pub fn add_pin(&self, pin: HalPin) -> Arc<HalPin> {
        let pin = Arc::new(pin);
        self.pins.lock().push(Arc::clone(&pin));
        pin
    }

    pub fn add_child(&self, child: Arc<HalPinContainer>) {
        self.children.lock().push(child);
    }

    /// Enumerates every pin in this container and all descendants.
    pub fn all_pins(&self) -> Vec<Arc<HalPin>> {
        let mut pins: Vec<Arc<HalPin>> = self.pins.lock().iter().cloned().collect();
        for child in self.children.lock().iter() {
            pins.extend(child.all_pins());
        }
        pins
    }

    /// Finds a pin by local name anywhere in the tree.
    pub fn pin(&self, name: &str) -> Option<Arc<HalPin>> {
        if let Some(pin) = self.pins.lock().iter().find(|p| p.name() == name) {
            return Some(Arc::clone(pin));
        }
        self.children.lock().iter().find_map(|c| c.pin(name))
    }
}
