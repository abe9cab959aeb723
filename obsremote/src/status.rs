//! Numeric codes defined by the OBS WebSocket v5 protocol.

/// `requestStatus.code` values.
pub const UNKNOWN: i32 = 0;
pub const NO_ERROR: i32 = 10;
pub const SUCCESS: i32 = 100;
pub const MISSING_REQUEST_TYPE: i32 = 203;
pub const UNKNOWN_REQUEST_TYPE: i32 = 204;
pub const GENERIC_ERROR: i32 = 205;
pub const UNSUPPORTED_REQUEST_BATCH_EXECUTION_TYPE: i32 = 206;
pub const NOT_READY: i32 = 207;
pub const MISSING_REQUEST_FIELD: i32 = 300;
pub const MISSING_REQUEST_DATA: i32 = 301;
pub const INVALID_REQUEST_FIELD: i32 = 400;
pub const INVALID_REQUEST_FIELD_TYPE: i32 = 401;
pub const REQUEST_FIELD_OUT_OF_RANGE: i32 = 402;
pub const REQUEST_FIELD_EMPTY: i32 = 403;
pub const TOO_MANY_REQUEST_FIELDS: i32 = 404;
/// The output is already running, e.g. `StartReplayBuffer` on an active buffer.
pub const OUTPUT_RUNNING: i32 = 500;
/// The output is not running, e.g. `StopReplayBuffer` on an inactive buffer.
pub const OUTPUT_NOT_RUNNING: i32 = 501;
pub const OUTPUT_PAUSED: i32 = 502;
pub const OUTPUT_NOT_PAUSED: i32 = 503;
pub const OUTPUT_DISABLED: i32 = 504;
pub const STUDIO_MODE_ACTIVE: i32 = 505;
pub const STUDIO_MODE_NOT_ACTIVE: i32 = 506;
pub const RESOURCE_NOT_FOUND: i32 = 600;
pub const RESOURCE_ALREADY_EXISTS: i32 = 601;
pub const INVALID_RESOURCE_TYPE: i32 = 602;
pub const NOT_ENOUGH_RESOURCES: i32 = 603;
pub const INVALID_RESOURCE_STATE: i32 = 604;
pub const INVALID_INPUT_KIND: i32 = 605;
pub const RESOURCE_NOT_CONFIGURABLE: i32 = 606;
pub const INVALID_FILTER_KIND: i32 = 607;
pub const RESOURCE_CREATION_FAILED: i32 = 700;
pub const RESOURCE_ACTION_FAILED: i32 = 701;
pub const REQUEST_PROCESSING_FAILED: i32 = 702;
pub const CANNOT_ACT: i32 = 703;

/// WebSocket close codes the server uses when it drops a session.
pub mod close_code {
    pub const DONT_CLOSE: u16 = 0;
    pub const UNKNOWN_REASON: u16 = 4000;
    pub const MESSAGE_DECODE_ERROR: u16 = 4002;
    pub const MISSING_DATA_FIELD: u16 = 4003;
    pub const INVALID_DATA_FIELD_TYPE: u16 = 4004;
    pub const INVALID_DATA_FIELD_VALUE: u16 = 4005;
    pub const UNKNOWN_OP_CODE: u16 = 4006;
    pub const NOT_IDENTIFIED: u16 = 4007;
    pub const ALREADY_IDENTIFIED: u16 = 4008;
    pub const AUTHENTICATION_FAILED: u16 = 4009;
    pub const UNSUPPORTED_RPC_VERSION: u16 = 4010;
    pub const SESSION_INVALIDATED: u16 = 4011;
    pub const UNSUPPORTED_FEATURE: u16 = 4012;
}
