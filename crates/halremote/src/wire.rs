//! Wire schema for the halrcmd and halrcomp services.
//!
//! Every message on either socket is one [`Envelope`]: a type discriminator
//! plus optional repeated sub-messages. Component sub-messages appear in
//! BIND requests and full updates; bare pin sub-messages appear in SET
//! requests and incremental updates; note strings carry human-readable
//! rejection reasons; protocol parameters ride along with full updates.
//!
//! Frames are binary, `bincode`-encoded. The state machine consumes this
//! module opaquely through [`Envelope::encode`] / [`Envelope::decode`].

use crate::pin::{PinDirection, PinType, PinValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec errors
#[derive(Error, Debug)]
pub enum WireError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Client → server: initial component registration.
    Bind,
    /// Client → server: local pin change.
    Set,
    /// Keepalive, sent by the client on halrcmd and by the server on
    /// halrcomp.
    Ping,
    /// Server → client: registration accepted.
    BindConfirm,
    /// Server → client: registration refused.
    BindReject,
    /// Server → client: set refused.
    SetReject,
    /// Server → client: keepalive answer.
    PingAck,
    /// Server → client: snapshot of all pins of a component.
    FullUpdate,
    /// Server → client: delta carrying only changed pins.
    IncrementalUpdate,
    /// Server → client: subscription-side protocol error.
    Error,
}

/// One pin inside an envelope.
///
/// Exactly one of the four value fields is set, matching `ptype`. The
/// field-per-type shape mirrors the schema; [`PinMessage::value`] and
/// [`PinMessage::set_value`] bridge to [`PinValue`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinMessage {
    /// Fully qualified `<component>.<pin>` name.
    pub name: Option<String>,
    /// Server-assigned handle. Required in SET and incremental updates.
    pub handle: Option<u32>,
    pub ptype: Option<PinType>,
    pub dir: Option<PinDirection>,
    pub halfloat: Option<f64>,
    pub halbit: Option<bool>,
    pub hals32: Option<i32>,
    pub halu32: Option<u32>,
}

impl PinMessage {
    /// Extracts the carried value, if any field is set.
    pub fn value(&self) -> Option<PinValue> {
        if let Some(v) = self.halfloat {
            Some(PinValue::Float(v))
        } else if let Some(v) = self.halbit {
            Some(PinValue::Bit(v))
        } else if let Some(v) = self.hals32 {
            Some(PinValue::S32(v))
        } else {
            self.halu32.map(PinValue::U32)
        }
    }

    /// Stores `value` in the type-appropriate field, clearing the others.
    pub fn set_value(&mut self, value: PinValue) {
        self.halfloat = None;
        self.halbit = None;
        self.hals32 = None;
        self.halu32 = None;
        match value {
            PinValue::Float(v) => self.halfloat = Some(v),
            PinValue::Bit(v) => self.halbit = Some(v),
            PinValue::S32(v) => self.hals32 = Some(v),
            PinValue::U32(v) => self.halu32 = Some(v),
        }
    }
}

/// One component inside an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentMessage {
    pub name: String,
    pub pin: Vec<PinMessage>,
}

/// Server-dictated protocol parameters carried by full updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    /// Keepalive period for the subscription channel, in milliseconds.
    pub keepalive_timer: u32,
}

/// The single message shape spoken on both sockets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub comp: Vec<ComponentMessage>,
    pub pin: Vec<PinMessage>,
    pub note: Vec<String>,
    pub pparams: Option<ProtocolParameters>,
}

impl Envelope {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            comp: Vec::new(),
            pin: Vec::new(),
            note: Vec::new(),
            pparams: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let mut env = Envelope::new(MessageType::Bind);
        let mut pin = PinMessage {
            name: Some("comp.speed".to_string()),
            ptype: Some(PinType::Float),
            dir: Some(PinDirection::Out),
            ..Default::default()
        };
        pin.set_value(PinValue::Float(1.5));
        env.comp.push(ComponentMessage {
            name: "comp".to_string(),
            pin: vec![pin],
        });

        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(
            decoded.comp[0].pin[0].value(),
            Some(PinValue::Float(1.5))
        );
    }

    #[test]
    fn test_set_value_clears_other_fields() {
        let mut pin = PinMessage::default();
        pin.set_value(PinValue::Float(2.0));
        pin.set_value(PinValue::Bit(true));

        assert_eq!(pin.halfloat, None);
        assert_eq!(pin.value(), Some(PinValue::Bit(true)));
    }

    #[test]
    fn test_empty_value() {
        let pin = PinMessage::default();
        assert_eq!(pin.value(), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode(&[0xde, 0xad, 0xbe, 0xef]).is_err());
        assert!(Envelope::decode(&[]).is_err());
    }

    #[test]
    fn test_pparams_roundtrip() {
        let mut env = Envelope::new(MessageType::FullUpdate);
        env.pparams = Some(ProtocolParameters {
            keepalive_timer: 2500,
        });
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded.pparams.unwrap().keepalive_timer, 2500);
    }
}
