use thiserror::Error;

/// Failures reported by a [`crate::BrowserSession`] implementation.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("browser has disconnected")]
    Disconnected,

    #[error("target closed: {0}")]
    TargetClosed(String),

    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("no element matches selector {selector}")]
    ElementNotFound { selector: String },

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// `true` when the session can no longer be driven and retrying is pointless.
    ///
    /// Some drivers only surface the condition as message text, so the
    /// rendered message is checked as well as the variant.
    #[must_use]
    pub fn is_session_dead(&self) -> bool {
        if matches!(self, BrowserError::Disconnected | BrowserError::TargetClosed(_)) {
            return true;
        }
        let message = self.to_string().to_lowercase();
        message.contains("browser has disconnected") || message.contains("target closed")
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowserError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("all {attempts} attempts failed; couldn't run {step} successfully")]
    ExhaustedRetries { step: String, attempts: u32 },

    #[error("failed to pass the CAPTCHA")]
    CaptchaFailed,

    #[error("login rejected with HTTP {status}")]
    LoginRejected { status: u16 },

    #[error("booking site unavailable: HTTP {status} from {url}")]
    UpstreamOutage { status: u16, url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("{0}")]
    Step(String),
}

impl ScraperError {
    #[must_use]
    pub fn is_session_dead(&self) -> bool {
        match self {
            ScraperError::Browser(e) => e.is_session_dead(),
            _ => false,
        }
    }

    /// Errors the retry loop must not swallow.
    ///
    /// `CaptchaFailed` is deliberately absent: the user may still pass it on
    /// a later attempt.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.is_session_dead()
            || matches!(
                self,
                ScraperError::LoginRejected { .. }
                    | ScraperError::UpstreamOutage { .. }
                    | ScraperError::Cancelled
            )
    }
}
