use crate::message::{DecodeError, IncomingMessage, OutgoingMessage, RawMessage};

use tungstenite::Message as WsMessage;

pub const JSON_PROTOCOL: &str = "obswebsocket.json";
pub const MSGPACK_PROTOCOL: &str = "obswebsocket.msgpack";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Expected a {expected} frame")]
    FrameKind { expected: &'static str },
    #[error("JSON error ({0})")]
    Json(#[from] serde_json::Error),
    #[error("MessagePack encode error ({0})")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("MessagePack decode error ({0})")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error(transparent)]
    Message(#[from] DecodeError),
}
impl CodecError {
    pub fn response_to(&self) -> Option<&str> {
        match self {
            CodecError::Message(e) => e.response_to(),
            _ => None,
        }
    }
}

/// Converts between protocol messages and WebSocket frames.
///
/// Implementors only deal with the `{op, d}` envelope; the typed schema is
/// shared through [`RawMessage`].
pub trait Codec: Send + Sync + 'static {
    /// The `Sec-WebSocket-Protocol` value announcing this encoding.
    fn protocol(&self) -> &'static str;
    fn encode_raw(&self, raw: &RawMessage) -> Result<WsMessage, CodecError>;
    fn decode_raw(&self, frame: &WsMessage) -> Result<RawMessage, CodecError>;

    fn encode(&self, message: &OutgoingMessage) -> Result<WsMessage, CodecError> {
        self.encode_raw(&message.to_raw()?)
    }
    fn decode(&self, frame: &WsMessage) -> Result<IncomingMessage, CodecError> {
        Ok(IncomingMessage::from_raw(self.decode_raw(frame)?)?)
    }
    /// Server-side counterpart of [`Codec::encode`].
    fn encode_incoming(&self, message: &IncomingMessage) -> Result<WsMessage, CodecError> {
        self.encode_raw(&message.to_raw()?)
    }
    fn decode_outgoing(&self, frame: &WsMessage) -> Result<OutgoingMessage, CodecError> {
        Ok(OutgoingMessage::from_raw(self.decode_raw(frame)?)?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;
impl Codec for JsonCodec {
    fn protocol(&self) -> &'static str {
        JSON_PROTOCOL
    }
    fn encode_raw(&self, raw: &RawMessage) -> Result<WsMessage, CodecError> {
        Ok(WsMessage::text(serde_json::to_string(raw)?))
    }
    fn decode_raw(&self, frame: &WsMessage) -> Result<RawMessage, CodecError> {
        match frame {
            WsMessage::Text(text) => Ok(serde_json::from_str(text.as_str())?),
            _ => Err(CodecError::FrameKind { expected: "text" }),
        }
    }
}

/// Binary frames carrying MessagePack maps with named fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;
impl Codec for MsgPackCodec {
    fn protocol(&self) -> &'static str {
        MSGPACK_PROTOCOL
    }
    fn encode_raw(&self, raw: &RawMessage) -> Result<WsMessage, CodecError> {
        Ok(WsMessage::binary(rmp_serde::to_vec_named(raw)?))
    }
    fn decode_raw(&self, frame: &WsMessage) -> Result<RawMessage, CodecError> {
        match frame {
            WsMessage::Binary(bytes) => Ok(rmp_serde::from_slice(bytes)?),
            _ => Err(CodecError::FrameKind { expected: "binary" }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecKind {
    #[default]
    Json,
    MsgPack,
}
impl CodecKind {
    pub fn protocol(self) -> &'static str {
        match self {
            CodecKind::Json => JSON_PROTOCOL,
            CodecKind::MsgPack => MSGPACK_PROTOCOL,
        }
    }
    pub fn from_protocol(protocol: &str) -> Option<Self> {
        match protocol {
            JSON_PROTOCOL => Some(CodecKind::Json),
            MSGPACK_PROTOCOL => Some(CodecKind::MsgPack),
            _ => None,
        }
    }
    pub fn codec(self) -> Box<dyn Codec> {
        match self {
            CodecKind::Json => Box::new(JsonCodec),
            CodecKind::MsgPack => Box::new(MsgPackCodec),
        }
    }
}
