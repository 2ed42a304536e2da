//! Typed, directional signal endpoints.
//!
//! A [`HalPin`] is the local mirror of one pin of a remote HAL component.
//! The immutable identity (name, type, direction) is fixed at construction;
//! the live state (value, synced flag, server handle) sits behind a mutex so
//! pins can be shared between the owning container, the session thread, and
//! UI code.
//!
//! Two write paths exist and must stay distinct:
//!
//! - [`HalPin::set_value`] is the local path. It marks the pin unsynced and
//!   emits the value-changed signal so a running session forwards the write.
//! - [`HalPin::update_from_remote`] applies a server value. It marks the pin
//!   synced and stays silent, which is what prevents update echo storms.

use crate::error::{HalRemoteError, Result};
use crate::signal::{Signal, SignalHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Value type of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinType {
    Float,
    Bit,
    S32,
    U32,
}

/// Data-flow direction of a pin, seen from the local component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinDirection {
    /// Remote writes, local reads. Never originates SET messages.
    In,
    /// Local writes, remote reads.
    Out,
    /// Both directions.
    Io,
}

/// A pin value; the variant always matches the pin's [`PinType`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PinValue {
    Float(f64),
    Bit(bool),
    S32(i32),
    U32(u32),
}

impl PinValue {
    pub fn pin_type(&self) -> PinType {
        match self {
            PinValue::Float(_) => PinType::Float,
            PinValue::Bit(_) => PinType::Bit,
            PinValue::S32(_) => PinType::S32,
            PinValue::U32(_) => PinType::U32,
        }
    }

    fn default_for(ptype: PinType) -> Self {
        match ptype {
            PinType::Float => PinValue::Float(0.0),
            PinType::Bit => PinValue::Bit(false),
            PinType::S32 => PinValue::S32(0),
            PinType::U32 => PinValue::U32(0),
        }
    }
}

struct PinState {
    value: PinValue,
    synced: bool,
    handle: Option<u32>,
}

/// Local mirror of one remote pin.
pub struct HalPin {
    name: String,
    ptype: PinType,
    direction: PinDirection,
    enabled: bool,
    state: Mutex<PinState>,
    value_changed: Mutex<Signal<PinValue>>,
}

impl HalPin {
    /// Creates an enabled pin holding the default value for its type.
    pub fn new(name: impl Into<String>, ptype: PinType, direction: PinDirection) -> Self {
        Self {
            name: name.into(),
            ptype,
            direction,
            enabled: true,
            state: Mutex::new(PinState {
                value: PinValue::default_for(ptype),
                synced: false,
                handle: None,
            }),
            value_changed: Mutex::new(Signal::new()),
        }
    }

    /// Sets the initial value. Panics on a type mismatch; initial values are
    /// construction-time constants, not runtime input.
    pub fn with_value(self, value: PinValue) -> Self {
        assert_eq!(
            value.pin_type(),
            self.ptype,
            "initial value type must match the pin type"
        );
        self.state.lock().value = value;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pin_type(&self) -> PinType {
        self.ptype
    }

    pub fn direction(&self) -> PinDirection {
        self.direction
    }

    /// Disabled pins are ignored entirely: never registered, never bound.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn value(&self) -> PinValue {
        self.state.lock().value
    }

    /// Whether the current value reflects the most recently known remote
    /// state.
    pub fn synced(&self) -> bool {
        self.state.lock().synced
    }

    pub fn set_synced(&self, synced: bool) {
        self.state.lock().synced = synced;
    }

    /// Server-assigned handle, present after the first full update of a
    /// session.
    pub fn handle(&self) -> Option<u32> {
        self.state.lock().handle
    }

    pub fn set_handle(&self, handle: u32) {
        self.state.lock().handle = Some(handle);
    }

    pub fn clear_handle(&self) {
        self.state.lock().handle = None;
    }

    /// Local write. Marks the pin unsynced and emits the value-changed
    /// signal, once per write — rewriting the current value still counts,
    /// so every accepted write of an out/io pin yields one SET upstream.
    pub fn set_value(&self, value: PinValue) -> Result<()> {
        self.check_type(value)?;
        {
            let mut state = self.state.lock();
            state.value = value;
            state.synced = false;
        }
        // Emit outside the state lock: listeners may read the pin back.
        self.value_changed.lock().emit(&value);
        Ok(())
    }

    /// Remote write. Applies the value and marks the pin synced without
    /// emitting the local-change signal.
    pub fn update_from_remote(&self, value: PinValue) -> Result<()> {
        self.check_type(value)?;
        let mut state = self.state.lock();
        state.value = value;
        state.synced = true;
        Ok(())
    }

    /// Subscribes to local value changes.
    pub fn on_value_changed<F>(&self, callback: F) -> SignalHandle
    where
        F: FnMut(&PinValue) + Send + 'static,
    {
        self.value_changed.lock().connect(callback)
    }

    pub fn disconnect_value_changed(&self, handle: SignalHandle) -> bool {
        self.value_changed.lock().disconnect(handle)
    }

    fn check_type(&self, value: PinValue) -> Result<()> {
        if value.pin_type() != self.ptype {
            return Err(HalRemoteError::PinTypeMismatch {
                pin: self.name.clone(),
                expected: self.ptype,
                got: value.pin_type(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for HalPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HalPin")
            .field("name", &self.name)
            .field("type", &self.ptype)
            .field("direction", &self.direction)
            .field("enabled", &self.enabled)
            .field("value", &state.value)
            .field("synced", &state.synced)
            .field("handle", &state.handle)
            .finish()
    }
}
