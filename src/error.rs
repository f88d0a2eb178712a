use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    /// The HTTP upgrade to the controller failed.
    #[error("websocket upgrade failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("websocket transport error: {0}")]
    Transport(#[source] tungstenite::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid header `{0}`, expected NAME:VALUE")]
    InvalidHeader(String),

    #[error("invalid edge `{0}`, expected A:B:COST")]
    InvalidEdge(String),

    #[error("invalid send gap: min {min_ms}ms must be below max {max_ms}ms")]
    InvalidGap { min_ms: u64, max_ms: u64 },

    /// A frame was offered after the close frame went out.
    #[error("session already closed")]
    SessionClosed,
}
