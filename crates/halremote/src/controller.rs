//! Connection lifecycle state machine.
//!
//! The controller drives one session of a remote component:
//! bind → subscribe → full update → incremental updates, with dual-channel
//! heartbeats and timeout-driven recovery. It is purely event-driven — the
//! session loop feeds it [`SessionEvent`]s and tick checks, all on one
//! thread, so no locking happens in here.
//!
//! Clock values are monotonic milliseconds ([`NowMs`]) supplied by the
//! driver, which keeps every transition deterministic and testable.

use crate::heartbeat::{HeartbeatTimer, NowMs};
use crate::pin::{HalPin, PinDirection};
use crate::registry::PinRegistry;
use crate::transport::Transport;
use crate::wire::{ComponentMessage, Envelope, MessageType, PinMessage};
use log::{debug, error, warn};
use std::fmt;
use std::sync::Arc;

/// Aggregate connection state visible to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Bound (or binding) but no full update received yet.
    Connecting,
    /// Pin mirroring is live.
    Connected,
    /// A fault occurred; see [`ConnectionError`].
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Classified fault kind accompanying [`ConnectionState::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    NoError,
    /// The server refused the component registration.
    BindError,
    /// The server refused a pin change.
    PinChangeError,
    /// Protocol error on either channel (including malformed payloads).
    CommandError,
    /// A heartbeat expired; recovery pings are running.
    TimeoutError,
    /// Transport-level fault on connect or send.
    SocketError,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionError::NoError => "no error",
            ConnectionError::BindError => "bind rejected",
            ConnectionError::PinChangeError => "pin change rejected",
            ConnectionError::CommandError => "command error",
            ConnectionError::TimeoutError => "timeout",
            ConnectionError::SocketError => "socket error",
        };
        f.write_str(s)
    }
}

/// Per-channel liveness sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Down,
    Trying,
    Up,
}

/// Inputs to the controller, serialized onto the session thread.
#[derive(Debug)]
pub enum SessionEvent {
    /// Command-channel delivery: a single payload frame.
    CmdFrames(Vec<Vec<u8>>),
    /// Update-channel delivery: topic frame plus payload frame.
    SubFrames(Vec<Vec<u8>>),
    /// A local pin value changed.
    PinChanged(String),
    /// The transport worker hit a socket fault.
    SocketError(String),
    /// End the session loop.
    Stop,
}

/// Observer callback for aggregate state changes.
pub type StateChangeCallback = Box<dyn FnMut(ConnectionState) + Send>;
/// Observer callback for error kind / message changes.
pub type ErrorChangeCallback = Box<dyn FnMut(ConnectionError, &str) + Send>;

/// The state machine of one remote-component session.
pub struct ConnectionController<T: Transport> {
    name: String,
    heartbeat_period_ms: u64,
    transport: T,
    registry: PinRegistry,
    cmd_heartbeat: HeartbeatTimer,
    sub_heartbeat: HeartbeatTimer,
    cmd_state: ChannelState,
    sub_state: ChannelState,
    state: ConnectionState,
    error: ConnectionError,
    error_string: String,
    on_state_change: Option<StateChangeCallback>,
    on_error_change: Option<ErrorChangeCallback>,
}

impl<T: Transport> ConnectionController<T> {
    pub fn new(name: impl Into<String>, heartbeat_period_ms: u64, transport: T) -> Self {
        Self {
            name: name.into(),
            heartbeat_period_ms,
            transport,
            registry: PinRegistry::new(),
            cmd_heartbeat: HeartbeatTimer::new(),
            sub_heartbeat: HeartbeatTimer::new(),
            cmd_state: ChannelState::Down,
            sub_state: ChannelState::Down,
            state: ConnectionState::Disconnected,
            error: ConnectionError::NoError,
            error_string: String::new(),
            on_state_change: None,
            on_error_change: None,
        }
    }

    pub fn set_state_callback(&mut self, callback: StateChangeCallback) {
        self.on_state_change = Some(callback);
    }

    pub fn set_error_callback(&mut self, callback: ErrorChangeCallback) {
        self.on_error_change = Some(callback);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn error(&self) -> ConnectionError {
        self.error
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    pub fn registry(&self) -> &PinRegistry {
        &self.registry
    }

    /// Opens the sockets, registers the pins, and sends the BIND request.
    pub fn start(
        &mut self,
        pins: &[Arc<HalPin>],
        identity: &str,
        cmd_uri: &str,
        update_uri: &str,
        now: NowMs,
    ) {
        debug!("[CONTROLLER] {}: starting session", self.name);
        self.cmd_state = ChannelState::Trying;
        self.update_state(ConnectionState::Connecting, now);

        let connected = self
            .transport
            .set_identity(identity)
            .and_then(|()| self.transport.connect(cmd_uri, update_uri));
        if let Err(e) = connected {
            self.socket_error(&e.to_string(), now);
            return;
        }

        for pin in pins {
            if self.registry.add(Arc::clone(pin)) {
                debug!("[CONTROLLER] {}: pin added: {}", self.name, pin.name());
            }
        }
        self.bind(now);
    }

    /// Tears the session down: stops heartbeats, closes sockets, drops pin
    /// references, clears the error.
    pub fn stop(&mut self, now: NowMs) {
        debug!("[CONTROLLER] {}: stopping session", self.name);
        self.cmd_heartbeat.stop();
        self.sub_heartbeat.stop();
        self.transport.close();
        self.cmd_state = ChannelState::Down;
        self.sub_state = ChannelState::Down;
        self.update_state(ConnectionState::Disconnected, now);
        self.update_error(ConnectionError::NoError, "");
        self.registry.unsync_all();
        self.registry.clear_handles();
        self.registry.clear();
    }

    pub fn handle_event(&mut self, event: SessionEvent, now: NowMs) {
        match event {
            SessionEvent::CmdFrames(frames) => self.handle_cmd_frames(&frames, now),
            SessionEvent::SubFrames(frames) => self.handle_sub_frames(&frames, now),
            SessionEvent::PinChanged(name) => self.pin_changed(&name, now),
            SessionEvent::SocketError(msg) => self.socket_error(&msg, now),
            SessionEvent::Stop => {} // consumed by the session loop
        }
    }

    /// Earliest heartbeat deadline, used to bound the loop's receive
    /// timeout.
    pub fn next_deadline_ms(&self) -> Option<NowMs> {
        match (self.cmd_heartbeat.deadline_ms(), self.sub_heartbeat.deadline_ms()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fires any heartbeat whose deadline has passed.
    pub fn process_timers(&mut self, now: NowMs) {
        if self.cmd_heartbeat.expired(now) {
            self.cmd_heartbeat.rearm(now);
            self.cmd_heartbeat_tick(now);
        }
        if self.sub_heartbeat.expired(now) {
            self.sub_heartbeat.rearm(now);
            self.sub_heartbeat_tick(now);
        }
    }

    // ── command channel ──────────────────────────────────────────────

    fn handle_cmd_frames(&mut self, frames: &[Vec<u8>], now: NowMs) {
        let Some(payload) = frames.last() else {
            warn!("[CONTROLLER] {}: empty command reply", self.name);
            return;
        };
        let rx = match Envelope::decode(payload) {
            Ok(rx) => rx,
            Err(e) => {
                self.fail(
                    ConnectionError::CommandError,
                    &format!("malformed command reply: {e}"),
                    now,
                );
                return;
            }
        };

        match rx.msg_type {
            MessageType::PingAck => {
                self.cmd_state = ChannelState::Up;
                self.cmd_heartbeat.set_outstanding(false);
                if self.state == ConnectionState::Error
                    && self.error == ConnectionError::TimeoutError
                {
                    debug!("[CONTROLLER] {}: service is back, resubscribing", self.name);
                    self.update_error(ConnectionError::NoError, "");
                    self.update_state(ConnectionState::Connected, now);
                    // Forces the server to emit a fresh full update
                    self.subscribe(now);
                }
            }
            MessageType::BindConfirm => {
                debug!("[CONTROLLER] {}: bind confirmed", self.name);
                self.cmd_state = ChannelState::Up;
                self.subscribe(now);
            }
            MessageType::BindReject | MessageType::SetReject => {
                let message = join_notes(&rx.note);
                self.cmd_state = ChannelState::Down;
                let kind = if rx.msg_type == MessageType::BindReject {
                    ConnectionError::BindError
                } else {
                    ConnectionError::PinChangeError
                };
                self.fail(kind, &message, now);
            }
            other => {
                debug!(
                    "[CONTROLLER] {}: ignoring unexpected command reply {:?}",
                    self.name, other
                );
            }
        }
    }

    // ── update channel ───────────────────────────────────────────────

    fn handle_sub_frames(&mut self, frames: &[Vec<u8>], now: NowMs) {
        let [topic, payload] = frames else {
            warn!(
                "[CONTROLLER] {}: update message with {} frame(s)",
                self.name,
                frames.len()
            );
            return;
        };
        if topic.as_slice() != self.name.as_bytes() {
            // The SUB filter is a prefix match, so a sibling component whose
            // name extends ours would land here.
            warn!(
                "[CONTROLLER] {}: discarding update for topic '{}'",
                self.name,
                String::from_utf8_lossy(topic)
            );
            return;
        }
        let rx = match Envelope::decode(payload) {
            Ok(rx) => rx,
            Err(e) => {
                self.fail(
                    ConnectionError::CommandError,
                    &format!("malformed update: {e}"),
                    now,
                );
                return;
            }
        };

        // Anything decodable counts as liveness on this channel.
        self.sub_heartbeat.refresh(now);

        match rx.msg_type {
            MessageType::FullUpdate => self.apply_full_update(&rx, now),
            MessageType::IncrementalUpdate => self.apply_incremental_update(&rx, now),
            MessageType::Ping => {}
            MessageType::Error => {
                let message = join_notes(&rx.note);
                self.sub_state = ChannelState::Down;
                self.fail(ConnectionError::CommandError, &message, now);
            }
            other => {
                debug!(
                    "[CONTROLLER] {}: ignoring unexpected update {:?}",
                    self.name, other
                );
            }
        }
    }

    fn apply_full_update(&mut self, rx: &Envelope, now: NowMs) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            // A snapshot that raced our unsubscribe; applying it would fake
            // liveness the command channel has not confirmed.
            debug!(
                "[CONTROLLER] {}: discarding full update in state {}",
                self.name, self.state
            );
            return;
        }
        debug!("[CONTROLLER] {}: full update", self.name);

        // Snapshot semantics: the handle index is replaced, never merged.
        self.registry.clear_handles();

        for comp in &rx.comp {
            for remote in &comp.pin {
                let Some(full_name) = remote.name.as_deref() else {
                    warn!("[CONTROLLER] {}: unnamed pin in full update", self.name);
                    continue;
                };
                let local_name = full_name
                    .split_once('.')
                    .map(|(_, rest)| rest)
                    .unwrap_or(full_name);
                let Some(pin) = self.registry.by_name(local_name) else {
                    warn!(
                        "[CONTROLLER] {}: full update for unknown pin '{}'",
                        self.name, full_name
                    );
                    continue;
                };
                if let Some(handle) = remote.handle {
                    self.registry.bind_handle(local_name, handle);
                }
                if !self.apply_remote_value(&pin, remote, now) {
                    return;
                }
            }
        }

        if let Some(pparams) = rx.pparams {
            self.sub_heartbeat
                .start(u64::from(pparams.keepalive_timer), now);
        }

        self.sub_state = ChannelState::Up;
        if self.state != ConnectionState::Connected {
            self.update_state(ConnectionState::Connected, now);
        }
    }

    fn apply_incremental_update(&mut self, rx: &Envelope, now: NowMs) {
        if self.state != ConnectionState::Connected {
            // Stale delta from before an unsubscribe; its handles are no
            // longer trustworthy.
            debug!(
                "[CONTROLLER] {}: discarding incremental update in state {}",
                self.name, self.state
            );
            return;
        }
        for remote in &rx.pin {
            let Some(handle) = remote.handle else {
                warn!(
                    "[CONTROLLER] {}: incremental update without handle",
                    self.name
                );
                continue;
            };
            let Some(pin) = self.registry.by_handle(handle) else {
                warn!(
                    "[CONTROLLER] {}: incremental update for unknown handle {}",
                    self.name, handle
                );
                continue;
            };
            if !self.apply_remote_value(&pin, remote, now) {
                return;
            }
        }
    }

    /// Applies one remote pin value. Returns `false` when the update was a
    /// protocol error that transitioned the machine to Error.
    fn apply_remote_value(&mut self, pin: &Arc<HalPin>, remote: &PinMessage, now: NowMs) -> bool {
        let Some(value) = remote.value() else {
            warn!(
                "[CONTROLLER] {}: update for '{}' carried no value",
                self.name,
                pin.name()
            );
            return true;
        };
        match pin.update_from_remote(value) {
            Ok(()) => true,
            Err(e) => {
                self.fail(ConnectionError::CommandError, &e.to_string(), now);
                false
            }
        }
    }

    // ── local writes ─────────────────────────────────────────────────

    fn pin_changed(&mut self, name: &str, now: NowMs) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(pin) = self.registry.by_name(name) else {
            return;
        };
        if pin.direction() == PinDirection::In {
            return;
        }
        let Some(handle) = pin.handle() else {
            // Racing ahead of the first full update; the snapshot that is
            // about to arrive reseeds this pin anyway.
            warn!(
                "[CONTROLLER] {}: dropping set for '{}' (no handle yet)",
                self.name, name
            );
            return;
        };

        let mut msg = PinMessage {
            name: Some(format!("{}.{}", self.name, pin.name())),
            handle: Some(handle),
            ptype: Some(pin.pin_type()),
            ..Default::default()
        };
        msg.set_value(pin.value());
        let mut tx = Envelope::new(MessageType::Set);
        tx.pin.push(msg);
        debug!(
            "[CONTROLLER] {}: set {} = {:?}",
            self.name,
            name,
            pin.value()
        );
        self.send_cmd_envelope(&tx, now);
    }

    // ── heartbeat ticks ──────────────────────────────────────────────

    fn cmd_heartbeat_tick(&mut self, now: NowMs) {
        if self.cmd_heartbeat.outstanding() {
            warn!("[CONTROLLER] {}: command service timed out", self.name);
            self.cmd_state = ChannelState::Trying;
            self.unsubscribe(now);
            self.fail(ConnectionError::TimeoutError, "command service timed out", now);
        }
        self.send_ping(now);
    }

    fn sub_heartbeat_tick(&mut self, now: NowMs) {
        // No outstanding bookkeeping on this channel: the server's own
        // pings drive refresh, so an expiry is always a timeout.
        warn!("[CONTROLLER] {}: update service timed out", self.name);
        self.unsubscribe(now);
        self.fail(ConnectionError::TimeoutError, "update service timed out", now);
        // Probe the command service; sent even when the command heartbeat
        // is configured off.
        self.send_ping(now);
    }

    // ── plumbing ─────────────────────────────────────────────────────

    fn bind(&mut self, now: NowMs) {
        let mut comp = ComponentMessage {
            name: self.name.clone(),
            pin: Vec::new(),
        };
        for pin in self.registry.pins() {
            let mut msg = PinMessage {
                name: Some(format!("{}.{}", self.name, pin.name())),
                ptype: Some(pin.pin_type()),
                dir: Some(pin.direction()),
                ..Default::default()
            };
            msg.set_value(pin.value());
            comp.pin.push(msg);
        }
        debug!(
            "[CONTROLLER] {}: bind ({} pins)",
            self.name,
            comp.pin.len()
        );
        let mut tx = Envelope::new(MessageType::Bind);
        tx.comp.push(comp);
        self.send_cmd_envelope(&tx, now);
    }

    fn subscribe(&mut self, now: NowMs) {
        self.sub_state = ChannelState::Trying;
        if let Err(e) = self.transport.subscribe(self.name.as_bytes()) {
            self.socket_error(&e.to_string(), now);
        }
    }

    fn unsubscribe(&mut self, now: NowMs) {
        if self.sub_state == ChannelState::Down {
            return;
        }
        self.sub_state = ChannelState::Down;
        if let Err(e) = self.transport.unsubscribe(self.name.as_bytes()) {
            self.socket_error(&e.to_string(), now);
        }
    }

    fn send_ping(&mut self, now: NowMs) {
        self.send_cmd_envelope(&Envelope::new(MessageType::Ping), now);
        self.cmd_heartbeat.set_outstanding(true);
    }

    fn send_cmd_envelope(&mut self, tx: &Envelope, now: NowMs) {
        let payload = match tx.encode() {
            Ok(payload) => payload,
            Err(e) => {
                self.update_error(ConnectionError::CommandError, &format!("{e}"));
                self.update_state(ConnectionState::Error, now);
                return;
            }
        };
        if let Err(e) = self.transport.send_cmd(&payload) {
            self.socket_error(&e.to_string(), now);
        }
    }

    fn socket_error(&mut self, message: &str, now: NowMs) {
        error!("[CONTROLLER] {}: socket error: {}", self.name, message);
        self.fail(ConnectionError::SocketError, message, now);
    }

    /// Classifies a fault and transitions to Error. Every kind except
    /// Timeout parks both heartbeats: only the timeout path retries, and a
    /// fault may strike while the machine already sits in Error with its
    /// recovery timer armed.
    fn fail(&mut self, kind: ConnectionError, message: &str, now: NowMs) {
        self.update_error(kind, message);
        self.update_state(ConnectionState::Error, now);
        if kind != ConnectionError::TimeoutError {
            self.cmd_heartbeat.stop();
            self.sub_heartbeat.stop();
        }
    }

    fn update_state(&mut self, new_state: ConnectionState, now: NowMs) {
        if new_state == self.state {
            return;
        }
        if self.state == ConnectionState::Connected {
            // Observers must see that values are stale now
            self.registry.unsync_all();
        }
        self.state = new_state;
        debug!("[CONTROLLER] {}: state -> {}", self.name, new_state);
        if let Some(callback) = self.on_state_change.as_mut() {
            callback(new_state);
        }

        match new_state {
            ConnectionState::Connected => {
                self.update_error(ConnectionError::NoError, "");
                self.cmd_heartbeat.start(self.heartbeat_period_ms, now);
            }
            ConnectionState::Error if self.error == ConnectionError::TimeoutError => {
                // Keep pinging the command service until it acknowledges
                self.sub_heartbeat.stop();
                if self.heartbeat_period_ms > 0 && !self.cmd_heartbeat.is_active() {
                    self.cmd_heartbeat.start(self.heartbeat_period_ms, now);
                }
            }
            _ => {
                self.cmd_heartbeat.stop();
                self.sub_heartbeat.stop();
            }
        }
    }

    fn update_error(&mut self, error: ConnectionError, message: &str) {
        if error == self.error && self.error_string == message {
            return;
        }
        self.error = error;
        self.error_string = message.to_string();
        if error != ConnectionError::NoError {
            warn!("[CONTROLLER] {}: {}: {}", self.name, error, message);
        }
        if let Some(callback) = self.on_error_change.as_mut() {
            callback(error, message);
        }
    }
}

/// Concatenates server-provided reason strings, one per line.
fn join_notes(notes: &[String]) -> String {
    let mut message = String::new();
    for note in notes {
        message.push_str(note);
        message.push('\n');
    }
    message
}
