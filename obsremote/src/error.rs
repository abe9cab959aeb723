use crate::codec::CodecError;

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed because the transport is generic and tungstenite's errors are large.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid origin ({0})")]
    InvalidOrigin(String),
    /// The connection could not be opened, or failed while open.
    /// Fatal to the connection.
    #[error("Transport error ({0})")]
    Transport(TransportError),
    /// `Hello` / `Identify` / `Identified` did not complete. Covers the server
    /// rejecting the password, which it signals by closing the socket.
    #[error("Handshake failed ({reason})")]
    Handshake {
        close_code: Option<u16>,
        reason: String,
    },
    /// The server answered a request with a failing `requestStatus`.
    /// Only affects the request it belongs to.
    #[error("{request_type} failed with code {code} ({})", .comment.as_deref().unwrap_or("no comment"))]
    Request {
        request_id: String,
        request_type: String,
        code: i32,
        comment: Option<String>,
    },
    /// The server sent something this client does not understand.
    #[error("Protocol violation ({0})")]
    Protocol(String),
    #[error("Codec error ({0})")]
    Codec(#[from] CodecError),
    #[error("Not identified")]
    NotIdentified,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn transport<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Transport(Box::new(error))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Request { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_request_code(&self, code: i32) -> bool {
        self.code() == Some(code)
    }

    /// Whether the connection this error came from is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Handshake { .. } | Error::Protocol(_) | Error::ConnectionClosed
        )
    }
}

impl From<tungstenite::Error> for Error {
    fn from(value: tungstenite::Error) -> Self {
        Error::transport(value)
    }
}
