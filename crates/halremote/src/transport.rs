//! Socket wiring for the command and update services.
//!
//! The controller talks to the outside world through the [`Transport`]
//! trait. [`ZmqTransport`] is the real implementation: a DEALER socket for
//! the command service (identified so the server can address replies) and a
//! SUB socket for the update broadcast. A dedicated poller thread drains
//! both sockets non-blockingly and marshals every received frame list into
//! the session event channel, so the controller only ever sees serialized
//! events.

use crate::controller::SessionEvent;
use crate::error::{HalRemoteError, Result};
use crossbeam::channel::Sender;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Operations the controller needs from the socket layer.
pub trait Transport: Send {
    /// Sets the command-socket identity (`<component>-<pid>`). Must be
    /// called before [`Transport::connect`].
    fn set_identity(&mut self, identity: &str) -> Result<()>;

    /// Opens the command and update sockets.
    fn connect(&mut self, cmd_uri: &str, update_uri: &str) -> Result<()>;

    /// Sends one payload frame on the command socket.
    fn send_cmd(&mut self, payload: &[u8]) -> Result<()>;

    /// Adds a subscription filter on the update socket.
    fn subscribe(&mut self, topic: &[u8]) -> Result<()>;

    /// Removes a subscription filter from the update socket.
    fn unsubscribe(&mut self, topic: &[u8]) -> Result<()>;

    /// Closes both sockets. Idempotent.
    fn close(&mut self);
}

/// How long the poller sleeps when neither socket had data.
const POLL_IDLE: Duration = Duration::from_millis(10);

/// ZMQ DEALER + SUB socket pair with a background poller.
pub struct ZmqTransport {
    context: zmq::Context,
    identity: Vec<u8>,
    events: Sender<SessionEvent>,
    cmd_socket: Option<Arc<Mutex<zmq::Socket>>>,
    sub_socket: Option<Arc<Mutex<zmq::Socket>>>,
    poller_running: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
}

impl ZmqTransport {
    /// Creates a transport that delivers received messages into `events`.
    pub fn new(events: Sender<SessionEvent>) -> Self {
        Self {
            context: zmq::Context::new(),
            identity: Vec::new(),
            events,
            cmd_socket: None,
            sub_socket: None,
            poller_running: Arc::new(AtomicBool::new(false)),
            poller: None,
        }
    }

    fn spawn_poller(&mut self, cmd: Arc<Mutex<zmq::Socket>>, sub: Arc<Mutex<zmq::Socket>>) {
        let events = self.events.clone();
        let running = Arc::clone(&self.poller_running);
        running.store(true, Ordering::Relaxed);

        let handle = thread::Builder::new()
            .name("halremote-poller".to_string())
            .spawn(move || {
                debug!("[TRANSPORT] poller started");
                while running.load(Ordering::Relaxed) {
                    let mut idle = true;
                    if !drain_socket(&cmd, &events, SessionEvent::CmdFrames, &mut idle) {
                        break;
                    }
                    if !drain_socket(&sub, &events, SessionEvent::SubFrames, &mut idle) {
                        break;
                    }
                    if idle {
                        thread::sleep(POLL_IDLE);
                    }
                }
                debug!("[TRANSPORT] poller stopped");
            })
            .expect("Failed to spawn poller thread");

        self.poller = Some(handle);
    }
}

/// Non-blockingly drains one socket into the event channel. Returns `false`
/// when the poller should terminate (socket fault or session gone).
fn drain_socket(
    socket: &Arc<Mutex<zmq::Socket>>,
    events: &Sender<SessionEvent>,
    wrap: fn(Vec<Vec<u8>>) -> SessionEvent,
    idle: &mut bool,
) -> bool {
    loop {
        // Hold the lock only for the receive itself; the session thread
        // shares this socket for sends.
        let received = { socket.lock().recv_multipart(zmq::DONTWAIT) };
        match received {
            Ok(frames) => {
                *idle = false;
                if events.send(wrap(frames)).is_err() {
                    return false; // session loop is gone
                }
            }
            Err(zmq::Error::EAGAIN) => return true,
            Err(e) => {
                warn!("[TRANSPORT] receive failed: {}", e);
                let _ = events.send(SessionEvent::SocketError(e.to_string()));
                return false;
            }
        }
    }
}

impl Transport for ZmqTransport {
    fn set_identity(&mut self, identity: &str) -> Result<()> {
        self.identity = identity.as_bytes().to_vec();
        Ok(())
    }

    fn connect(&mut self, cmd_uri: &str, update_uri: &str) -> Result<()> {
        let cmd = self.context.socket(zmq::DEALER)?;
        cmd.set_linger(0)?;
        if !self.identity.is_empty() {
            cmd.set_identity(&self.identity)?;
        }
        cmd.connect(cmd_uri)?;

        let sub = self.context.socket(zmq::SUB)?;
        sub.set_linger(0)?;
        sub.connect(update_uri)?;

        debug!("[TRANSPORT] sockets connected: {} {}", cmd_uri, update_uri);

        let cmd = Arc::new(Mutex::new(cmd));
        let sub = Arc::new(Mutex::new(sub));
        self.cmd_socket = Some(Arc::clone(&cmd));
        self.sub_socket = Some(Arc::clone(&sub));
        self.spawn_poller(cmd, sub);
        Ok(())
    }

    fn send_cmd(&mut self, payload: &[u8]) -> Result<()> {
        let socket = self
            .cmd_socket
            .as_ref()
            .ok_or(HalRemoteError::NotConnected)?;
        socket.lock().send(payload, 0)?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &[u8]) -> Result<()> {
        let socket = self
            .sub_socket
            .as_ref()
            .ok_or(HalRemoteError::NotConnected)?;
        socket.lock().set_subscribe(topic)?;
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &[u8]) -> Result<()> {
        let socket = self
            .sub_socket
            .as_ref()
            .ok_or(HalRemoteError::NotConnected)?;
        socket.lock().set_unsubscribe(topic)?;
        Ok(())
    }

    fn close(&mut self) {
        self.poller_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.poller.take() {
            let _ = handle.join();
        }
        self.cmd_socket = None;
        self.sub_socket = None;
    }
}

impl Drop for ZmqTransport {
    fn drop(&mut self) {
        self.close();
    }
}
