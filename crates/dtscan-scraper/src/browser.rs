//! The browser seam. The navigator only talks to a page through
//! [`BrowserSession`]; `dtscan-browser` implements it over the DevTools
//! protocol and tests use an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::error::{BrowserError, ScraperError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOptions {
    /// Also require the element to be rendered (non-zero box, not hidden).
    pub visible: bool,
}

impl WaitOptions {
    #[must_use]
    pub fn visible() -> Self {
        Self { visible: true }
    }
}

/// Traffic observed on the page, in the order the browser reported it.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    Request { request_id: String, url: String },
    Response(NetworkExchange),
}

/// One completed request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkExchange {
    pub request_id: String,
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl NetworkExchange {
    /// Deserialize the response body.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Deserialize`] tagged with `context`.
    pub fn json<T: DeserializeOwned>(&self, context: &str) -> Result<T, ScraperError> {
        serde_json::from_str(&self.body).map_err(|source| ScraperError::Deserialize {
            context: context.to_string(),
            source,
        })
    }

    /// First value of query parameter `name`, if present.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.url.split_once('?')?.1;
        let query = query.split('#').next().unwrap_or(query);
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Which response URLs a waiter is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlPattern {
    Exact(String),
    Prefix {
        prefix: String,
        /// URLs also starting with this are not matched.
        excluding: Option<String>,
    },
}

impl UrlPattern {
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Exact(expected) => url == expected,
            UrlPattern::Prefix { prefix, excluding } => {
                url.starts_with(prefix.as_str())
                    && !excluding
                        .as_deref()
                        .is_some_and(|excluded| url.starts_with(excluded))
            }
        }
    }
}

impl std::fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlPattern::Exact(url) => f.write_str(url),
            UrlPattern::Prefix { prefix, .. } => write!(f, "{prefix}*"),
        }
    }
}

/// A single controllable page.
///
/// Calls are issued one at a time by the navigator; only
/// [`network_events`](Self::network_events) is consumed concurrently.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Focus `selector` and type `text` into it.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    /// Resolve once `selector` is present (and visible, if asked).
    async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitOptions,
    ) -> Result<(), BrowserError>;

    /// Resolve on the next top-level navigation.
    async fn wait_for_navigation(&self) -> Result<(), BrowserError>;

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, BrowserError>;

    /// Subscribe to request/response events from now on.
    fn network_events(&self) -> broadcast::Receiver<NetworkEvent>;

    /// Resolve with the next response whose URL matches `pattern`.
    ///
    /// Fails with [`BrowserError::Timeout`] if none arrives within `timeout`.
    async fn wait_for_response(
        &self,
        pattern: &UrlPattern,
        timeout: Duration,
    ) -> Result<NetworkExchange, BrowserError>;

    /// Sleep tied to the session, so a closed session wakes sleepers with an error.
    async fn sleep(&self, duration: Duration) -> Result<(), BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}
