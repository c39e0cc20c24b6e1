use dtscan_scraper::BrowserError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CdpError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to encode CDP command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("CDP command {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("CDP error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("DevTools connection closed")]
    Closed,

    #[error("failed to launch browser at {path}: {source}")]
    Launch {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no page target found at {url}")]
    NoPageTarget { url: String },
}

impl From<CdpError> for BrowserError {
    fn from(err: CdpError) -> Self {
        match err {
            CdpError::Closed | CdpError::WebSocket(_) => BrowserError::Disconnected,
            CdpError::Timeout { method, timeout_ms } => BrowserError::Timeout {
                what: method,
                timeout_ms,
            },
            CdpError::Remote { message, .. }
                if message.contains("Target closed") || message.contains("No target") =>
            {
                BrowserError::TargetClosed(message)
            }
            other => BrowserError::Protocol(other.to_string()),
        }
    }
}
