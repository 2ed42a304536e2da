//! Public client for one remote HAL component.

use crate::config::RemoteComponentConfig;
use crate::container::HalPinContainer;
use crate::controller::{
    ConnectionController, ConnectionError, ConnectionState, SessionEvent,
};
use crate::error::Result;
use crate::heartbeat::NowMs;
use crate::pin::HalPin;
use crate::signal::{Signal, SignalHandle};
use crate::transport::{Transport, ZmqTransport};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receive timeout of the session loop when no heartbeat deadline is armed.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Mirrors the pins of a container against a remote HAL component.
///
/// The component scans its [`HalPinContainer`] for pins when `ready` rises,
/// binds them under `name` at the remote host, and keeps values synchronized
/// in both directions until `ready` falls.
///
/// # Example
/// ```ignore
/// use halremote::{HalPin, HalPinContainer, HalRemoteComponent,
///                 PinDirection, PinType, PinValue, RemoteComponentConfig};
/// use std::sync::Arc;
///
/// let container = Arc::new(HalPinContainer::new());
/// let jog = container.add_pin(HalPin::new("jog", PinType::Float, PinDirection::Out));
/// container.add_pin(HalPin::new("estop", PinType::Bit, PinDirection::In));
///
/// let config = RemoteComponentConfig::new("jog-panel").with_remote_host("192.168.1.2");
/// let mut component = HalRemoteComponent::new(config, Arc::clone(&container))?;
/// component.set_ready(true);
///
/// jog.set_value(PinValue::Float(0.5))?;   // forwarded as a SET
///
/// component.set_ready(false);
/// # Ok::<(), halremote::HalRemoteError>(())
/// ```
pub struct HalRemoteComponent {
    config: RemoteComponentConfig,
    container: Arc<HalPinContainer>,
    ready: bool,
    session: Option<Session>,
    observed: Arc<ObservedState>,
}

/// Snapshot plus change signals shared with the session thread.
struct ObservedState {
    snapshot: RwLock<StatusSnapshot>,
    state_signal: Mutex<Signal<ConnectionState>>,
    error_signal: Mutex<Signal<(ConnectionError, String)>>,
}

struct StatusSnapshot {
    state: ConnectionState,
    error: ConnectionError,
    error_string: String,
}

struct Session {
    events_tx: Sender<SessionEvent>,
    thread: Option<JoinHandle<()>>,
    pin_hooks: Vec<(Arc<HalPin>, SignalHandle)>,
}

impl HalRemoteComponent {
    pub fn new(config: RemoteComponentConfig, container: Arc<HalPinContainer>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            container,
            ready: false,
            session: None,
            observed: Arc::new(ObservedState {
                snapshot: RwLock::new(StatusSnapshot {
                    state: ConnectionState::Disconnected,
                    error: ConnectionError::NoError,
                    error_string: String::new(),
                }),
                state_signal: Mutex::new(Signal::new()),
                error_signal: Mutex::new(Signal::new()),
            }),
        })
    }

    pub fn config(&self) -> &RemoteComponentConfig {
        &self.config
    }

    pub fn container(&self) -> &Arc<HalPinContainer> {
        &self.container
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.observed.snapshot.read().state
    }

    pub fn error(&self) -> ConnectionError {
        self.observed.snapshot.read().error
    }

    pub fn error_string(&self) -> String {
        self.observed.snapshot.read().error_string.clone()
    }

    /// Subscribes to aggregate state changes.
    pub fn on_connection_state_changed<F>(&self, callback: F) -> SignalHandle
    where
        F: FnMut(&ConnectionState) + Send + 'static,
    {
        self.observed.state_signal.lock().connect(callback)
    }

    /// Subscribes to error kind / message changes.
    pub fn on_error_changed<F>(&self, callback: F) -> SignalHandle
    where
        F: FnMut(&(ConnectionError, String)) + Send + 'static,
    {
        self.observed.error_signal.lock().connect(callback)
    }

    /// Rising edge starts a session, falling edge stops it. Idempotent.
    pub fn set_ready(&mut self, ready: bool) {
        if ready == self.ready {
            return;
        }
        self.ready = ready;
        if ready {
            self.start_session();
        } else {
            self.stop_session();
        }
    }

    fn start_session(&mut self) {
        info!("[CLIENT] {}: starting", self.config.name);
        let (events_tx, events_rx) = channel::unbounded();

        // Every local pin write becomes an event on the session thread.
        let pins = self.container.all_pins();
        let mut pin_hooks = Vec::with_capacity(pins.len());
        for pin in &pins {
            let tx = events_tx.clone();
            let name = pin.name().to_string();
            let hook = pin.on_value_changed(move |_| {
                let _ = tx.send(SessionEvent::PinChanged(name.clone()));
            });
            pin_hooks.push((Arc::clone(pin), hook));
        }

        let transport = ZmqTransport::new(events_tx.clone());
        let mut controller = ConnectionController::new(
            self.config.name.clone(),
            self.config.heartbeat_period_ms,
            transport,
        );

        let observed = Arc::clone(&self.observed);
        controller.set_state_callback(Box::new(move |state| {
            observed.snapshot.write().state = state;
            observed.state_signal.lock().emit(&state);
        }));
        let observed = Arc::clone(&self.observed);
        controller.set_error_callback(Box::new(move |error, message| {
            {
                let mut snapshot = observed.snapshot.write();
                snapshot.error = error;
                snapshot.error_string = message.to_string();
            }
            observed
                .error_signal
                .lock()
                .emit(&(error, message.to_string()));
        }));

        let identity = format!("{}-{}", self.config.name, std::process::id());
        let cmd_uri = self.config.halrcmd_uri.clone();
        let update_uri = self.config.halrcomp_uri.clone();

        let thread = thread::Builder::new()
            .name(format!("halremote-{}", self.config.name))
            .spawn(move || {
                run_session(controller, events_rx, pins, identity, cmd_uri, update_uri);
            })
            .expect("Failed to spawn session thread");

        self.session = Some(Session {
            events_tx,
            thread: Some(thread),
            pin_hooks,
        });
    }

    fn stop_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        info!("[CLIENT] {}: stopping", self.config.name);
        let _ = session.events_tx.send(SessionEvent::Stop);
        if let Some(thread) = session.thread.take() {
            if thread.join().is_err() {
                warn!("[CLIENT] {}: session thread panicked", self.config.name);
            }
        }
        for (pin, hook) in session.pin_hooks.drain(..) {
            pin.disconnect_value_changed(hook);
        }
    }
}

impl Drop for HalRemoteComponent {
    fn drop(&mut self) {
        self.set_ready(false);
    }
}

/// One event loop multiplexing transport deliveries, pin changes, and
/// heartbeat deadlines onto the controller.
fn run_session<T: Transport>(
    mut controller: ConnectionController<T>,
    events: Receiver<SessionEvent>,
    pins: Vec<Arc<HalPin>>,
    identity: String,
    cmd_uri: String,
    update_uri: String,
) {
    let anchor = Instant::now();
    let now_ms = |anchor: &Instant| -> NowMs { anchor.elapsed().as_millis() as NowMs };

    controller.start(&pins, &identity, &cmd_uri, &update_uri, now_ms(&anchor));

    loop {
        let now = now_ms(&anchor);
        let timeout = controller
            .next_deadline_ms()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now)))
            .unwrap_or(IDLE_POLL);

        match events.recv_timeout(timeout) {
            Ok(SessionEvent::Stop) => break,
            Ok(event) => controller.handle_event(event, now_ms(&anchor)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("[CLIENT] session channel closed, shutting down");
                break;
            }
        }
        controller.process_timers(now_ms(&anchor));
    }

    controller.stop(now_ms(&anchor));
}
