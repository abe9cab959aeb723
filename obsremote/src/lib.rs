//! An async client for the OBS WebSocket v5 protocol.
//!
//! ```no_run
//! # async fn run() -> obsremote::Result<()> {
//! let obs = obsremote::Client::new();
//! obs.connect("ws://127.0.0.1:4455", Some("secret")).await?;
//! match obs.call("StartReplayBuffer", None).await {
//!     Err(e) if e.is_request_code(obsremote::status::OUTPUT_RUNNING) => {}
//!     other => {
//!         other?;
//!     }
//! }
//! obs.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod client;
pub mod codec;
mod connection;
mod error;
pub mod events;
pub mod message;
pub mod state;
pub mod status;

pub use auth::derive_auth_response;
pub use client::{BatchOptions, Client, ConnectOptions};
pub use codec::{Codec, CodecError, CodecKind, JsonCodec, MsgPackCodec};
pub use error::{Error, Result, TransportError};
pub use events::ConnectionEvent;
pub use message::{BatchRequest, BatchResult, Event, IncomingMessage, OutgoingMessage};
pub use state::{ConnectionState, Identification};
