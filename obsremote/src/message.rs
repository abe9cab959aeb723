use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

pub const RPC_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown opcode ({0})")]
    UnknownOpCode(i32),
    #[error("Invalid payload for opcode {op} ({source})")]
    Payload {
        op: i32,
        request_id: Option<String>,
        #[source]
        source: serde_json::Error,
    },
}
impl DecodeError {
    /// The request a malformed response belongs to.
    pub fn response_to(&self) -> Option<&str> {
        match self {
            DecodeError::Payload {
                op: RequestResponse::OP | RequestBatchResponse::OP,
                request_id: Some(request_id),
                ..
            } => Some(request_id),
            _ => None,
        }
    }
}

pub trait MessageData: Sized {
    const OP: i32;
}
macro_rules! impl_message_data {
    ($($type:ty => $op:literal),* $(,)?) => {
        $(
            impl MessageData for $type {
                const OP: i32 = $op;
            }
        )*
    };
}

/// Bitmask values for `eventSubscriptions` in `Identify` / `Reidentify`.
pub mod event_subscription {
    pub const NONE: u32 = 0;
    pub const GENERAL: u32 = 1 << 0;
    pub const CONFIG: u32 = 1 << 1;
    pub const SCENES: u32 = 1 << 2;
    pub const INPUTS: u32 = 1 << 3;
    pub const TRANSITIONS: u32 = 1 << 4;
    pub const FILTERS: u32 = 1 << 5;
    pub const OUTPUTS: u32 = 1 << 6;
    pub const SCENE_ITEMS: u32 = 1 << 7;
    pub const MEDIA_INPUTS: u32 = 1 << 8;
    pub const VENDORS: u32 = 1 << 9;
    pub const UI: u32 = 1 << 10;
    /// Every non-high-volume category.
    pub const ALL: u32 = GENERAL
        | CONFIG
        | SCENES
        | INPUTS
        | TRANSITIONS
        | FILTERS
        | OUTPUTS
        | SCENE_ITEMS
        | MEDIA_INPUTS
        | VENDORS
        | UI;
    pub const INPUT_VOLUME_METERS: u32 = 1 << 16;
    pub const INPUT_ACTIVE_STATE_CHANGED: u32 = 1 << 17;
    pub const INPUT_SHOW_STATE_CHANGED: u32 = 1 << 18;
    pub const SCENE_ITEM_TRANSFORM_CHANGED: u32 = 1 << 19;
}

/// Values for `RequestBatch.executionType`.
pub mod execution_type {
    pub const NONE: i32 = -1;
    pub const SERIAL_REALTIME: i32 = 0;
    pub const SERIAL_FRAME: i32 = 1;
    pub const PARALLEL: i32 = 2;
}

pub mod hello {
    use super::*;
    #[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Authentication {
        pub challenge: String,
        pub salt: String,
    }
}
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<hello::Authentication>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_subscriptions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reidentify {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_subscriptions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub event_intent: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}
impl RequestStatus {
    pub fn success() -> Self {
        Self {
            result: true,
            code: crate::status::SUCCESS,
            comment: None,
        }
    }
    pub fn failure(code: i32, comment: Option<&str>) -> Self {
        Self {
            result: false,
            code,
            comment: comment.map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}
impl BatchRequest {
    pub fn new(request_type: impl Into<String>, request_data: Option<Value>) -> Self {
        Self {
            request_type: request_type.into(),
            request_id: None,
            request_data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBatch {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<i32>,
    pub requests: Vec<BatchRequest>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub request_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBatchResponse {
    pub request_id: String,
    pub results: Vec<BatchResult>,
}

impl_message_data! {
    Hello => 0,
    Identify => 1,
    Identified => 2,
    Reidentify => 3,
    Event => 5,
    Request => 6,
    RequestResponse => 7,
    RequestBatch => 8,
    RequestBatchResponse => 9,
}

/// The `{ "op": .., "d": .. }` envelope every frame is wrapped in.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Raw<T> {
    pub op: i32,
    pub d: T,
}
pub type RawMessage = Raw<Value>;

fn raw_of<T: Serialize + MessageData>(data: &T) -> Result<RawMessage, serde_json::Error> {
    Ok(Raw {
        op: T::OP,
        d: serde_json::to_value(data)?,
    })
}
fn payload_of<T: DeserializeOwned + MessageData>(d: Value) -> Result<T, DecodeError> {
    let request_id = d
        .get("requestId")
        .and_then(Value::as_str)
        .map(str::to_owned);
    serde_json::from_value(d).map_err(|source| DecodeError::Payload {
        op: T::OP,
        request_id,
        source,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Identify(Identify),
    Reidentify(Reidentify),
    Request(Request),
    RequestBatch(RequestBatch),
}
impl OutgoingMessage {
    pub fn opcode(&self) -> i32 {
        match self {
            OutgoingMessage::Identify(_) => Identify::OP,
            OutgoingMessage::Reidentify(_) => Reidentify::OP,
            OutgoingMessage::Request(_) => Request::OP,
            OutgoingMessage::RequestBatch(_) => RequestBatch::OP,
        }
    }
    pub fn to_raw(&self) -> Result<RawMessage, serde_json::Error> {
        match self {
            OutgoingMessage::Identify(d) => raw_of(d),
            OutgoingMessage::Reidentify(d) => raw_of(d),
            OutgoingMessage::Request(d) => raw_of(d),
            OutgoingMessage::RequestBatch(d) => raw_of(d),
        }
    }
    pub fn from_raw(raw: RawMessage) -> Result<Self, DecodeError> {
        Ok(match raw.op {
            Identify::OP => OutgoingMessage::Identify(payload_of(raw.d)?),
            Reidentify::OP => OutgoingMessage::Reidentify(payload_of(raw.d)?),
            Request::OP => OutgoingMessage::Request(payload_of(raw.d)?),
            RequestBatch::OP => OutgoingMessage::RequestBatch(payload_of(raw.d)?),
            invalid => return Err(DecodeError::UnknownOpCode(invalid)),
        })
    }
}

/// Unknown opcodes decode to [`IncomingMessage::Unrecognized`].
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Hello(Hello),
    Identified(Identified),
    Event(Event),
    RequestResponse(RequestResponse),
    RequestBatchResponse(RequestBatchResponse),
    Unrecognized { op: i32, d: Value },
}
impl IncomingMessage {
    pub fn opcode(&self) -> i32 {
        match self {
            IncomingMessage::Hello(_) => Hello::OP,
            IncomingMessage::Identified(_) => Identified::OP,
            IncomingMessage::Event(_) => Event::OP,
            IncomingMessage::RequestResponse(_) => RequestResponse::OP,
            IncomingMessage::RequestBatchResponse(_) => RequestBatchResponse::OP,
            IncomingMessage::Unrecognized { op, .. } => *op,
        }
    }
    pub fn to_raw(&self) -> Result<RawMessage, serde_json::Error> {
        match self {
            IncomingMessage::Hello(d) => raw_of(d),
            IncomingMessage::Identified(d) => raw_of(d),
            IncomingMessage::Event(d) => raw_of(d),
            IncomingMessage::RequestResponse(d) => raw_of(d),
            IncomingMessage::RequestBatchResponse(d) => raw_of(d),
            IncomingMessage::Unrecognized { op, d } => Ok(Raw {
                op: *op,
                d: d.clone(),
            }),
        }
    }
    pub fn from_raw(raw: RawMessage) -> Result<Self, DecodeError> {
        Ok(match raw.op {
            Hello::OP => IncomingMessage::Hello(payload_of(raw.d)?),
            Identified::OP => IncomingMessage::Identified(payload_of(raw.d)?),
            Event::OP => IncomingMessage::Event(payload_of(raw.d)?),
            RequestResponse::OP => IncomingMessage::RequestResponse(payload_of(raw.d)?),
            RequestBatchResponse::OP => IncomingMessage::RequestBatchResponse(payload_of(raw.d)?),
            op => IncomingMessage::Unrecognized { op, d: raw.d },
        })
    }
}
