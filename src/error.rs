use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Reasons a handshake header fails to parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header truncated: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
    #[error("unknown address type {0:#04x}")]
    UnknownAddressType(u8),
}

/// Terminal outcomes of a session other than a clean relay shutdown.
///
/// Every variant ends the session by closing whatever streams are open.
/// None of them is reported to the peer beyond the closure itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed handshake header: {0}")]
    MalformedHeader(#[from] HeaderError),
    #[error("client identifier mismatch")]
    AuthenticationFailure,
    #[error("failed to connect to {target}")]
    DialFailure {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("relay failed: {0}")]
    RelayFailure(String),
    #[error("inbound websocket error")]
    Inbound(#[from] tungstenite::Error),
    #[error("inbound stream closed before a handshake arrived")]
    NoHandshake,
    #[error("session cancelled by shutdown")]
    Shutdown,
}
