use resonator_protocol::{ControlMsg, DataMsg, DeviceCommand};
use serde_json::Value;

/// Legacy handshake offer, sent by the device as a bare text frame.
pub const LEGACY_HANDSHAKE: &str = "handshake";

const CONNECTION_REPLY: &str = r#"{"event":"connection-reply"}"#;
const HANDSHAKE_REPLY: &str = r#"{"command":"handshakeReply"}"#;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of classifying one inbound text frame. Payloads that match no
/// recognized shape come back as `Raw`, unmodified; that path is a
/// fallback, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Msg(T),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    Msg(ControlMsg),
    /// Structured payload with an unrecognized shape: the open-ended
    /// custom kind.
    Custom(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataFrame {
    Msg(DataMsg),
    /// Handshake offer on the data channel (legacy generation only).
    Handshake,
}

/// One wire-protocol generation. The two generations found on devices are
/// mutually incompatible; a connection speaks exactly one of them.
pub trait ModelSyncProtocol: Send {
    fn decode_control(&self, frame: &str) -> Decoded<ControlFrame>;
    fn decode_data(&self, frame: &str) -> Decoded<DataFrame>;
    fn encode_command(&self, cmd: &DeviceCommand) -> Result<String, CodecError>;

    /// Reply to the control-channel connection offer.
    fn connection_reply(&self) -> &'static str;

    /// Reply to the data-channel handshake offer, if this generation has
    /// one.
    fn handshake_reply(&self) -> Option<&'static str>;

    /// Whether the data channel must wait for a handshake frame before
    /// normal traffic begins.
    fn data_handshake_required(&self) -> bool;
}

/// Canonical generation: control frames tagged by `event`, data frames
/// tagged by `data`, commands in the `{command, args}` envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventProtocol;

impl ModelSyncProtocol for EventProtocol {
    fn decode_control(&self, frame: &str) -> Decoded<ControlFrame> {
        if let Ok(msg) = serde_json::from_str::<ControlMsg>(frame) {
            return Decoded::Msg(ControlFrame::Msg(msg));
        }
        match serde_json::from_str::<Value>(frame) {
            Ok(value) if value.is_object() => Decoded::Msg(ControlFrame::Custom(value)),
            _ => Decoded::Raw(frame.to_string()),
        }
    }

    fn decode_data(&self, frame: &str) -> Decoded<DataFrame> {
        match serde_json::from_str::<DataMsg>(frame) {
            Ok(msg) => Decoded::Msg(DataFrame::Msg(msg)),
            Err(_) => Decoded::Raw(frame.to_string()),
        }
    }

    fn encode_command(&self, cmd: &DeviceCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(cmd)?)
    }

    fn connection_reply(&self) -> &'static str {
        CONNECTION_REPLY
    }

    fn handshake_reply(&self) -> Option<&'static str> {
        None
    }

    fn data_handshake_required(&self) -> bool {
        false
    }
}

/// Legacy generation: the device opens the data channel with a bare
/// `"handshake"` text frame and expects `{"command":"handshakeReply"}`
/// back before serving traffic. Kept for old device firmware; new code
/// should speak [`EventProtocol`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HandshakeProtocol;

impl ModelSyncProtocol for HandshakeProtocol {
    fn decode_control(&self, frame: &str) -> Decoded<ControlFrame> {
        EventProtocol.decode_control(frame)
    }

    fn decode_data(&self, frame: &str) -> Decoded<DataFrame> {
        if frame == LEGACY_HANDSHAKE {
            return Decoded::Msg(DataFrame::Handshake);
        }
        EventProtocol.decode_data(frame)
    }

    fn encode_command(&self, cmd: &DeviceCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(cmd)?)
    }

    fn connection_reply(&self) -> &'static str {
        CONNECTION_REPLY
    }

    fn handshake_reply(&self) -> Option<&'static str> {
        Some(HANDSHAKE_REPLY)
    }

    fn data_handshake_required(&self) -> bool {
        true
    }
}
