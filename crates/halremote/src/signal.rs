//! Change-notification signals.
//!
//! A [`Signal`] is a small registry of callbacks invoked when an event is
//! emitted. Pins use one to announce value changes; the component uses them
//! for the `connectionState` and `error` observables.

use std::collections::HashMap;

/// Identifies one subscription to a [`Signal`] so it can be disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalHandle(u64);

/// Callback registry with connect/disconnect/emit semantics.
///
/// Listeners are `FnMut` so they can capture and mutate external state.
/// Emission order between listeners is unspecified.
pub struct Signal<T> {
    listeners: HashMap<u64, Box<dyn FnMut(&T) + Send>>,
    next_id: u64,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_id: 0,
        }
    }

    /// Connects a callback, returning a handle for later disconnection.
    pub fn connect<F>(&mut self, callback: F) -> SignalHandle
    where
        F: FnMut(&T) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, Box::new(callback));
        SignalHandle(id)
    }

    /// Removes a previously connected callback. Returns `false` if the
    /// handle was already disconnected.
    pub fn disconnect(&mut self, handle: SignalHandle) -> bool {
        self.listeners.remove(&handle.0).is_some()
    }

    /// Invokes every connected callback with `value`.
    pub fn emit(&mut self, value: &T) {
        for listener in self.listeners.values_mut() {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Removes all connected callbacks.
    pub fn disconnect_all(&mut self) {
        self.listeners.clear();
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_connect_emit_disconnect() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut signal = Signal::new();

        let counter_clone = Arc::clone(&counter);
        let handle = signal.connect(move |n: &usize| {
            counter_clone.fetch_add(*n, Ordering::Relaxed);
        });

        signal.emit(&2);
        signal.emit(&3);
        assert_eq!(counter.load(Ordering::Relaxed), 5);

        assert!(signal.disconnect(handle));
        signal.emit(&100);
        assert_eq!(counter.load(Ordering::Relaxed), 5);

        // Handle is gone now
        assert!(!signal.disconnect(handle));
    }

    #[test]
    fn test_multiple_listeners() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut signal = Signal::new();

        for _ in 0..3 {
            let counter_clone = Arc::clone(&counter);
            signal.connect(move |_: &()| {
                counter_clone.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(signal.listener_count(), 3);

        signal.emit(&());
        assert_eq!(counter.load(Ordering::Relaxed), 3);

        signal.disconnect_all();
        assert_eq!(signal.listener_count(), 0);
    }
}
