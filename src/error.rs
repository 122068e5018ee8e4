//! Error taxonomy for login negotiation
//!
//! None of these escape `login()` or `connect_and_login()`: they are recorded
//! and folded into a `LoginOutcome`.

use thiserror::Error;

/// Why a single cloud login target was inconclusive
#[derive(Debug, Error)]
pub enum LoginError {
    /// Connection refused, DNS, timeout, unreadable body
    #[error("{0}")]
    Transport(String),

    /// Non-decodable body or unexpected response shape
    #[error("unexpected response ({status}): {detail}")]
    ProtocolMismatch { status: u16, detail: String },

    /// Decodable error response with a code outside the known set
    #[error("{message}")]
    BusinessRejection { code: Option<i64>, message: String },
}

impl LoginError {
    /// Whether this error contributes a "last error" message
    pub fn is_recorded(&self) -> bool {
        !matches!(self, LoginError::ProtocolMismatch { .. })
    }
}

/// Errors raised by the gateway connection
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to connect to gateway at {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("gateway connection is not open")]
    NotConnected,

    #[error("a gateway session is already active on this client")]
    AlreadyActive,

    #[error("gateway closed the connection")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
