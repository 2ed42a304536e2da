//! Session state machine tests driven through a recording mock transport.

use halremote::controller::{
    ConnectionController, ConnectionError, ConnectionState, SessionEvent,
};
use halremote::error::{HalRemoteError, Result};
use halremote::pin::{HalPin, PinDirection, PinType, PinValue};
use halremote::transport::Transport;
use halremote::wire::{ComponentMessage, Envelope, MessageType, PinMessage, ProtocolParameters};
use std::sync::{Arc, Mutex};

// ── mock transport ──────────────────────────────────────────────────

#[derive(Default)]
struct MockInner {
    identity: String,
    connected: bool,
    close_count: usize,
    fail_connect: bool,
    sent: Vec<Envelope>,
    subscribes: Vec<Vec<u8>>,
    unsubscribes: Vec<Vec<u8>>,
}

struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner::default())),
        }
    }

    fn failing_connect() -> Self {
        let mock = Self::new();
        mock.inner.lock().unwrap().fail_connect = true;
        mock
    }

    fn handle(&self) -> Arc<Mutex<MockInner>> {
        Arc::clone(&self.inner)
    }
}

impl Transport for MockTransport {
    fn set_identity(&mut self, identity: &str) -> Result<()> {
        self.inner.lock().unwrap().identity = identity.to_string();
        Ok(())
    }

    fn connect(&mut self, _cmd_uri: &str, _update_uri: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_connect {
            return Err(HalRemoteError::Other("connection refused".to_string()));
        }
        inner.connected = true;
        Ok(())
    }

    fn send_cmd(&mut self, payload: &[u8]) -> Result<()> {
        let envelope = Envelope::decode(payload).expect("client sent a valid envelope");
        self.inner.lock().unwrap().sent.push(envelope);
        Ok(())
    }

    fn subscribe(&mut self, topic: &[u8]) -> Result<()> {
        self.inner.lock().unwrap().subscribes.push(topic.to_vec());
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &[u8]) -> Result<()> {
        self.inner.lock().unwrap().unsubscribes.push(topic.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.close_count += 1;
    }
}

// ── helpers ─────────────────────────────────────────────────────────

const COMP: &str = "comp";

fn make_pins() -> (Arc<HalPin>, Arc<HalPin>) {
    let x = Arc::new(
        HalPin::new("x", PinType::Float, PinDirection::Out).with_value(PinValue::Float(1.5)),
    );
    let y = Arc::new(HalPin::new("y", PinType::Bit, PinDirection::In));
    (x, y)
}

fn start_controller(
    heartbeat_period_ms: u64,
) -> (
    ConnectionController<MockTransport>,
    Arc<Mutex<MockInner>>,
    Arc<HalPin>,
    Arc<HalPin>,
) {
    let (x, y) = make_pins();
    let mock = MockTransport::new();
    let recorder = mock.handle();
    let mut controller = ConnectionController::new(COMP, heartbeat_period_ms, mock);
    controller.start(
        &[Arc::clone(&x), Arc::clone(&y)],
        "comp-1234",
        "tcp://127.0.0.1:5001",
        "tcp://127.0.0.1:5002",
        0,
    );
    (controller, recorder, x, y)
}

fn cmd_event(envelope: &Envelope) -> SessionEvent {
    SessionEvent::CmdFrames(vec![envelope.encode().unwrap()])
}

fn sub_event(envelope: &Envelope) -> SessionEvent {
    SessionEvent::SubFrames(vec![COMP.as_bytes().to_vec(), envelope.encode().unwrap()])
}

fn reply_with_notes(msg_type: MessageType, notes: &[&str]) -> Envelope {
    let mut envelope = Envelope::new(msg_type);
    envelope.note = notes.iter().map(|n| n.to_string()).collect();
    envelope
}

fn full_update(pins: &[(&str, u32, PinValue)], keepalive_ms: Option<u32>) -> Envelope {
    let mut comp = ComponentMessage {
        name: COMP.to_string(),
        pin: Vec::new(),
    };
    for (name, handle, value) in pins {
        let mut pin = PinMessage {
            name: Some(format!("{COMP}.{name}")),
            handle: Some(*handle),
            ..Default::default()
        };
        pin.set_value(*value);
        comp.pin.push(pin);
    }
    let mut envelope = Envelope::new(MessageType::FullUpdate);
    envelope.comp.push(comp);
    envelope.pparams = keepalive_ms.map(|keepalive_timer| ProtocolParameters { keepalive_timer });
    envelope
}

fn incremental_update(pins: &[(u32, PinValue)]) -> Envelope {
    let mut envelope = Envelope::new(MessageType::IncrementalUpdate);
    for (handle, value) in pins {
        let mut pin = PinMessage {
            handle: Some(*handle),
            ..Default::default()
        };
        pin.set_value(*value);
        envelope.pin.push(pin);
    }
    envelope
}

fn sent_of_type(recorder: &Arc<Mutex<MockInner>>, msg_type: MessageType) -> Vec<Envelope> {
    recorder
        .lock()
        .unwrap()
        .sent
        .iter()
        .filter(|e| e.msg_type == msg_type)
        .cloned()
        .collect()
}

/// Drives the controller to Connected: bind confirm, then the first full
/// update assigning handles 10 (x) and 11 (y).
fn connect(
    controller: &mut ConnectionController<MockTransport>,
    keepalive_ms: Option<u32>,
) {
    controller.handle_event(cmd_event(&Envelope::new(MessageType::BindConfirm)), 0);
    controller.handle_event(
        sub_event(&full_update(
            &[
                ("x", 10, PinValue::Float(1.5)),
                ("y", 11, PinValue::Bit(false)),
            ],
            keepalive_ms,
        )),
        0,
    );
}

// ── end-to-end session flows ────────────────────────────────────────

#[test]
fn full_bind_subscribe_cycle_reaches_connected() {
    let (mut controller, recorder, x, y) = start_controller(3000);
    assert_eq!(controller.state(), ConnectionState::Connecting);
    {
        let inner = recorder.lock().unwrap();
        assert!(inner.connected);
        assert_eq!(inner.identity, "comp-1234");
    }

    // BIND enumerates exactly the enabled, named pins
    let binds = sent_of_type(&recorder, MessageType::Bind);
    assert_eq!(binds.len(), 1);
    let comp = &binds[0].comp[0];
    assert_eq!(comp.name, COMP);
    assert_eq!(comp.pin.len(), 2);
    let bind_x = comp
        .pin
        .iter()
        .find(|p| p.name.as_deref() == Some("comp.x"))
        .unwrap();
    assert_eq!(bind_x.ptype, Some(PinType::Float));
    assert_eq!(bind_x.dir, Some(PinDirection::Out));
    assert_eq!(bind_x.value(), Some(PinValue::Float(1.5)));
    assert_eq!(bind_x.handle, None);

    controller.handle_event(cmd_event(&Envelope::new(MessageType::BindConfirm)), 0);
    assert_eq!(
        recorder.lock().unwrap().subscribes,
        vec![COMP.as_bytes().to_vec()]
    );
    assert_eq!(controller.state(), ConnectionState::Connecting);

    controller.handle_event(
        sub_event(&full_update(
            &[
                ("x", 10, PinValue::Float(1.5)),
                ("y", 11, PinValue::Bit(false)),
            ],
            Some(2000),
        )),
        0,
    );
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(controller.error(), ConnectionError::NoError);
    assert_eq!(x.handle(), Some(10));
    assert_eq!(y.handle(), Some(11));
    assert!(x.synced());
    assert!(y.synced());
}

#[test]
fn local_write_emits_one_set() {
    let (mut controller, recorder, x, _y) = start_controller(3000);
    connect(&mut controller, None);

    x.set_value(PinValue::Float(2.0)).unwrap();
    controller.handle_event(SessionEvent::PinChanged("x".to_string()), 100);

    let sets = sent_of_type(&recorder, MessageType::Set);
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].pin.len(), 1);
    let pin = &sets[0].pin[0];
    assert_eq!(pin.handle, Some(10));
    assert_eq!(pin.name.as_deref(), Some("comp.x"));
    assert_eq!(pin.ptype, Some(PinType::Float));
    assert_eq!(pin.halfloat, Some(2.0));
    assert_eq!(pin.halbit, None);
}

#[test]
fn input_write_is_ignored() {
    let (mut controller, recorder, _x, y) = start_controller(3000);
    connect(&mut controller, None);

    y.set_value(PinValue::Bit(true)).unwrap();
    controller.handle_event(SessionEvent::PinChanged("y".to_string()), 100);

    assert!(sent_of_type(&recorder, MessageType::Set).is_empty());
}

#[test]
fn subscription_timeout_recovers_via_ping() {
    let (mut controller, recorder, x, _y) = start_controller(3000);
    connect(&mut controller, Some(2000));
    assert!(x.synced());

    // No update traffic past the keepalive period
    controller.process_timers(2500);
    assert_eq!(controller.state(), ConnectionState::Error);
    assert_eq!(controller.error(), ConnectionError::TimeoutError);
    assert_eq!(
        recorder.lock().unwrap().unsubscribes,
        vec![COMP.as_bytes().to_vec()]
    );
    assert_eq!(sent_of_type(&recorder, MessageType::Ping).len(), 1);
    assert!(!x.synced());

    // The service answers: reconnect and resubscribe
    controller.handle_event(cmd_event(&Envelope::new(MessageType::PingAck)), 2600);
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(controller.error(), ConnectionError::NoError);
    assert_eq!(recorder.lock().unwrap().subscribes.len(), 2);

    // The forced snapshot may renumber the pins
    controller.handle_event(
        sub_event(&full_update(
            &[
                ("x", 20, PinValue::Float(7.5)),
                ("y", 21, PinValue::Bit(true)),
            ],
            Some(2000),
        )),
        2700,
    );
    assert_eq!(x.handle(), Some(20));
    assert_eq!(x.value(), PinValue::Float(7.5));
    assert!(x.synced());
    assert!(controller.registry().by_handle(10).is_none());
}

#[test]
fn bind_rejection_surfaces_notes_without_subscribing() {
    let (mut controller, recorder, _x, _y) = start_controller(3000);

    controller.handle_event(
        cmd_event(&reply_with_notes(
            MessageType::BindReject,
            &["bad pin", "no perm"],
        )),
        0,
    );

    assert_eq!(controller.state(), ConnectionState::Error);
    assert_eq!(controller.error(), ConnectionError::BindError);
    assert_eq!(controller.error_string(), "bad pin\nno perm\n");
    assert!(recorder.lock().unwrap().subscribes.is_empty());
}

#[test]
fn ready_cycle_clears_state() {
    let (mut controller, recorder, x, y) = start_controller(3000);
    connect(&mut controller, Some(2000));

    controller.stop(100);
    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert_eq!(controller.error(), ConnectionError::NoError);
    assert_eq!(recorder.lock().unwrap().close_count, 1);
    assert!(controller.registry().is_empty());
    assert!(!x.synced());
    assert!(!y.synced());
    assert_eq!(x.handle(), None);
    assert_eq!(controller.next_deadline_ms(), None);

    // A fresh start binds the current pins again
    controller.start(
        &[Arc::clone(&x), Arc::clone(&y)],
        "comp-1234",
        "tcp://127.0.0.1:5001",
        "tcp://127.0.0.1:5002",
        200,
    );
    assert_eq!(controller.state(), ConnectionState::Connecting);
    assert_eq!(sent_of_type(&recorder, MessageType::Bind).len(), 2);
    let second_bind = &sent_of_type(&recorder, MessageType::Bind)[1];
    assert_eq!(second_bind.comp[0].pin.len(), 2);
}

// ── invariants and boundary behaviors ───────────────────────────────

#[test]
fn set_reject_enters_pin_change_error() {
    let (mut controller, _recorder, _x, _y) = start_controller(3000);
    connect(&mut controller, None);

    controller.handle_event(
        cmd_event(&reply_with_notes(MessageType::SetReject, &["readonly"])),
        100,
    );
    assert_eq!(controller.state(), ConnectionState::Error);
    assert_eq!(controller.error(), ConnectionError::PinChangeError);
    assert_eq!(controller.error_string(), "readonly\n");
}

#[test]
fn no_set_is_emitted_before_connected() {
    let (mut controller, recorder, x, _y) = start_controller(3000);
    assert_eq!(controller.state(), ConnectionState::Connecting);

    x.set_value(PinValue::Float(3.0)).unwrap();
    controller.handle_event(SessionEvent::PinChanged("x".to_string()), 0);

    assert!(sent_of_type(&recorder, MessageType::Set).is_empty());
}

#[test]
fn bind_confirm_after_full_update_still_connects() {
    let (mut controller, _recorder, _x, _y) = start_controller(3000);

    controller.handle_event(
        sub_event(&full_update(&[("x", 10, PinValue::Float(1.5))], Some(2000))),
        0,
    );
    assert_eq!(controller.state(), ConnectionState::Connected);

    controller.handle_event(cmd_event(&Envelope::new(MessageType::BindConfirm)), 10);
    assert_eq!(controller.state(), ConnectionState::Connected);
}

#[test]
fn second_full_update_reseeds_without_reconnecting() {
    let (mut controller, _recorder, x, y) = start_controller(3000);
    connect(&mut controller, Some(2000));

    let states = Arc::new(Mutex::new(Vec::new()));
    let states_clone = Arc::clone(&states);
    controller.set_state_callback(Box::new(move |state| {
        states_clone.lock().unwrap().push(state);
    }));

    controller.handle_event(
        sub_event(&full_update(
            &[
                ("x", 30, PinValue::Float(9.0)),
                ("y", 31, PinValue::Bit(true)),
            ],
            None,
        )),
        500,
    );

    assert_eq!(controller.state(), ConnectionState::Connected);
    assert!(states.lock().unwrap().is_empty(), "no state churn");
    assert_eq!(x.handle(), Some(30));
    assert_eq!(x.value(), PinValue::Float(9.0));
    assert_eq!(y.handle(), Some(31));
    // Replaced, not merged: the old handles are gone
    assert!(controller.registry().by_handle(10).is_none());
    assert!(controller.registry().by_handle(11).is_none());
}

#[test]
fn incremental_update_applies_by_handle() {
    let (mut controller, _recorder, x, _y) = start_controller(3000);
    connect(&mut controller, None);
    x.set_synced(false);

    controller.handle_event(sub_event(&incremental_update(&[(10, PinValue::Float(4.5))])), 100);
    assert_eq!(x.value(), PinValue::Float(4.5));
    assert!(x.synced());
}

#[test]
fn incremental_update_with_unknown_handle_is_ignored() {
    let (mut controller, _recorder, x, _y) = start_controller(3000);
    connect(&mut controller, None);

    controller.handle_event(
        sub_event(&incremental_update(&[
            (99, PinValue::Float(1.0)),
            (10, PinValue::Float(6.0)),
        ])),
        100,
    );
    // The stray handle is skipped, the connection survives, the valid pin
    // still applies
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(x.value(), PinValue::Float(6.0));
}

#[test]
fn disabled_heartbeat_never_pings() {
    let (mut controller, recorder, _x, _y) = start_controller(0);
    connect(&mut controller, None);

    assert_eq!(controller.next_deadline_ms(), None);
    controller.process_timers(1_000_000);
    assert!(sent_of_type(&recorder, MessageType::Ping).is_empty());
}

#[test]
fn command_heartbeat_pings_then_times_out() {
    let (mut controller, recorder, _x, _y) = start_controller(3000);
    connect(&mut controller, None);

    // First tick: ping goes out, connection stays up
    controller.process_timers(3000);
    assert_eq!(sent_of_type(&recorder, MessageType::Ping).len(), 1);
    assert_eq!(controller.state(), ConnectionState::Connected);

    // Acknowledged in time: the next tick pings again without erroring
    controller.handle_event(cmd_event(&Envelope::new(MessageType::PingAck)), 3100);
    controller.process_timers(6000);
    assert_eq!(sent_of_type(&recorder, MessageType::Ping).len(), 2);
    assert_eq!(controller.state(), ConnectionState::Connected);

    // Unacknowledged: the following tick is a timeout
    controller.process_timers(9000);
    assert_eq!(controller.state(), ConnectionState::Error);
    assert_eq!(controller.error(), ConnectionError::TimeoutError);
    // The recovery ping keeps going out while the error persists
    assert_eq!(sent_of_type(&recorder, MessageType::Ping).len(), 3);
    controller.process_timers(12000);
    assert_eq!(sent_of_type(&recorder, MessageType::Ping).len(), 4);
}

#[test]
fn server_ping_refreshes_the_subscription_watchdog() {
    let (mut controller, _recorder, _x, _y) = start_controller(3000);
    connect(&mut controller, Some(2000));

    // Keep the channel alive with server pings
    controller.handle_event(sub_event(&Envelope::new(MessageType::Ping)), 1500);
    controller.process_timers(2500);
    assert_eq!(controller.state(), ConnectionState::Connected);

    // Silence past the refreshed deadline times out
    controller.process_timers(3600);
    assert_eq!(controller.error(), ConnectionError::TimeoutError);
}

#[test]
fn subscription_error_envelope_is_a_command_error() {
    let (mut controller, _recorder, _x, _y) = start_controller(3000);
    connect(&mut controller, None);

    controller.handle_event(
        sub_event(&reply_with_notes(MessageType::Error, &["no such component"])),
        100,
    );
    assert_eq!(controller.state(), ConnectionState::Error);
    assert_eq!(controller.error(), ConnectionError::CommandError);
    assert_eq!(controller.error_string(), "no such component\n");
}

#[test]
fn malformed_payload_is_a_command_error() {
    let (mut controller, _recorder, _x, _y) = start_controller(3000);

    controller.handle_event(SessionEvent::CmdFrames(vec![vec![0xde, 0xad]]), 0);
    assert_eq!(controller.state(), ConnectionState::Error);
    assert_eq!(controller.error(), ConnectionError::CommandError);
}

#[test]
fn foreign_topic_is_discarded() {
    let (mut controller, _recorder, x, _y) = start_controller(3000);
    connect(&mut controller, None);

    // The SUB prefix filter would also match "comp2"
    let envelope = full_update(&[("x", 50, PinValue::Float(8.0))], None);
    controller.handle_event(
        SessionEvent::SubFrames(vec![b"comp2".to_vec(), envelope.encode().unwrap()]),
        100,
    );
    assert_eq!(x.handle(), Some(10));
    assert_eq!(x.value(), PinValue::Float(1.5));
}

#[test]
fn socket_failure_on_connect_is_a_socket_error() {
    let (x, y) = make_pins();
    let mock = MockTransport::failing_connect();
    let mut controller = ConnectionController::new(COMP, 3000, mock);
    controller.start(
        &[x, y],
        "comp-1234",
        "tcp://127.0.0.1:5001",
        "tcp://127.0.0.1:5002",
        0,
    );
    assert_eq!(controller.state(), ConnectionState::Error);
    assert_eq!(controller.error(), ConnectionError::SocketError);
}

#[test]
fn bind_skips_disabled_and_unnamed_pins() {
    let enabled = Arc::new(HalPin::new("on", PinType::Bit, PinDirection::Out));
    let disabled = Arc::new(
        HalPin::new("off", PinType::Bit, PinDirection::Out).with_enabled(false),
    );
    let unnamed = Arc::new(HalPin::new("", PinType::Bit, PinDirection::Out));

    let mock = MockTransport::new();
    let recorder = mock.handle();
    let mut controller = ConnectionController::new(COMP, 3000, mock);
    controller.start(
        &[enabled, disabled, unnamed],
        "comp-1234",
        "tcp://127.0.0.1:5001",
        "tcp://127.0.0.1:5002",
        0,
    );

    let binds = sent_of_type(&recorder, MessageType::Bind);
    assert_eq!(binds[0].comp[0].pin.len(), 1);
    assert_eq!(binds[0].comp[0].pin[0].name.as_deref(), Some("comp.on"));
}

#[test]
fn type_mismatch_in_update_is_a_protocol_error() {
    let (mut controller, _recorder, x, _y) = start_controller(3000);
    connect(&mut controller, None);

    // x is a Float pin; the server claims it is a Bit
    controller.handle_event(sub_event(&incremental_update(&[(10, PinValue::Bit(true))])), 100);
    assert_eq!(controller.state(), ConnectionState::Error);
    assert_eq!(controller.error(), ConnectionError::CommandError);
    assert_eq!(x.value(), PinValue::Float(1.5));
}

#[test]
fn observers_are_notified_on_changes() {
    let (mut controller, _recorder, _x, _y) = start_controller(3000);

    let states = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let states_clone = Arc::clone(&states);
    let errors_clone = Arc::clone(&errors);
    controller.set_state_callback(Box::new(move |state| {
        states_clone.lock().unwrap().push(state);
    }));
    controller.set_error_callback(Box::new(move |error, message| {
        errors_clone.lock().unwrap().push((error, message.to_string()));
    }));

    connect(&mut controller, None);
    controller.handle_event(
        cmd_event(&reply_with_notes(MessageType::SetReject, &["nope"])),
        100,
    );

    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectionState::Connected, ConnectionState::Error]
    );
    assert_eq!(
        *errors.lock().unwrap(),
        vec![(ConnectionError::PinChangeError, "nope\n".to_string())]
    );
}
