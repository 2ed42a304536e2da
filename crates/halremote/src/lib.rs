//! halremote - Rust client for remote HAL components
//!
//! This crate mirrors a set of typed signal endpoints ("pins") between a
//! local process and a remote real-time HAL instance. The remote side
//! exposes two services: **halrcmd**, a bidirectional command channel, and
//! **halrcomp**, a publish/subscribe update broadcast. The client binds a
//! named component, subscribes to its update topic, keeps local pin values
//! synchronized with the remote, forwards local writes upstream, and keeps
//! the link alive with heartbeats on both channels.
//!
//! # Features
//! - Typed pins (float, bit, s32, u32) with in/out/io directions
//! - Automatic bind / subscribe / full-update handshake
//! - Incremental updates applied by server-assigned handle
//! - Local writes forwarded as SET messages (input pins never publish)
//! - Dual-channel heartbeats with timeout-driven recovery
//! - Observable connection state and classified errors
//!
//! # Quick Start
//!
//! ```ignore
//! use halremote::{HalPin, HalPinContainer, HalRemoteComponent,
//!                 PinDirection, PinType, PinValue, RemoteComponentConfig};
//! use std::sync::Arc;
//!
//! // Declare the pins
//! let container = Arc::new(HalPinContainer::new());
//! let speed = container.add_pin(HalPin::new("speed", PinType::Float, PinDirection::Out));
//! container.add_pin(HalPin::new("enabled", PinType::Bit, PinDirection::In));
//!
//! // Bind them to the remote component "frontend"
//! let config = RemoteComponentConfig::new("frontend").with_remote_host("192.168.1.2");
//! let mut component = HalRemoteComponent::new(config, Arc::clone(&container))?;
//! component.set_ready(true);
//!
//! // Local writes are forwarded while connected
//! speed.set_value(PinValue::Float(120.0))?;
//!
//! // Falling edge closes the session
//! component.set_ready(false);
//! # Ok::<(), halremote::HalRemoteError>(())
//! ```
//!
//! # Architecture
//!
//! The client uses ZMQ for communication with the remote host:
//! - **halrcmd**: DEALER socket (BIND, SET, PING; identified per client)
//! - **halrcomp**: SUB socket (full/incremental updates, server pings)
//!
//! A poller thread drains both sockets and marshals every delivery onto the
//! session thread, where the connection state machine runs single-threaded;
//! local pin writes arrive on the same queue, so the controller never needs
//! a lock.
//!
//! # Error Handling
//!
//! Fallible operations return `Result<T, HalRemoteError>`. Protocol-level
//! faults surface through the observable [`ConnectionError`] kind instead:
//! bind/set rejections, command errors, heartbeat timeouts, and socket
//! faults all transition the component into the Error state, and only the
//! timeout recovers automatically.

pub mod component;
pub mod config;
pub mod container;
pub mod controller;
pub mod error;
pub mod heartbeat;
pub mod pin;
pub mod registry;
pub mod signal;
pub mod transport;
pub mod wire;

// Re-export the main types for convenience
pub use component::HalRemoteComponent;
pub use config::RemoteComponentConfig;
pub use container::HalPinContainer;
pub use controller::{ConnectionController, ConnectionError, ConnectionState, SessionEvent};
pub use error::{HalRemoteError, Result};
pub use pin::{HalPin, PinDirection, PinType, PinValue};
pub use signal::{Signal, SignalHandle};
pub use transport::{Transport, ZmqTransport};
