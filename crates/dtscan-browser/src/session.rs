//! [`BrowserSession`] over a single DevTools page target.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dtscan_scraper::{BrowserError, BrowserSession, NetworkEvent, NetworkExchange, UrlPattern, WaitOptions};
use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cdp::{CdpClient, CdpEvent};
use crate::error::CdpError;
use crate::launch::launch_chromium;

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);
const NETWORK_BUFFER: usize = 256;

/// Resource types whose response bodies are fetched and published.
const CAPTURED_RESOURCE_TYPES: [&str; 2] = ["XHR", "Fetch"];

pub struct CdpSession {
    client: Arc<CdpClient>,
    network: broadcast::Sender<NetworkEvent>,
    pump: JoinHandle<()>,
    closed: AtomicBool,
    process: Mutex<Option<Child>>,
    /// `None` waits indefinitely; the user may sit on the CAPTCHA or in the
    /// waiting room for a long time.
    navigation_timeout: Option<Duration>,
    selector_timeout: Option<Duration>,
}

impl CdpSession {
    /// Attach to the page behind `ws_url` and enable the Page, Runtime and
    /// Network domains.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be opened or a domain cannot be enabled.
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        let client = Arc::new(CdpClient::connect(ws_url).await?);
        let (network, _) = broadcast::channel(NETWORK_BUFFER);
        let pump = tokio::spawn(pump_network(
            Arc::clone(&client),
            client.subscribe(),
            network.clone(),
        ));

        for domain in ["Page", "Runtime", "Network"] {
            client.send_command(&format!("{domain}.enable"), json!({})).await?;
        }

        Ok(Self {
            client,
            network,
            pump,
            closed: AtomicBool::new(false),
            process: Mutex::new(None),
            navigation_timeout: None,
            selector_timeout: None,
        })
    }

    /// Start Chromium at `path` and attach to its first page. The browser
    /// process is killed when the session is closed.
    ///
    /// # Errors
    ///
    /// Fails if the browser cannot be started or reached.
    pub async fn launch(path: &Path, port: u16) -> Result<Self, CdpError> {
        let launched = launch_chromium(path, port).await?;
        let session = Self::connect(&launched.ws_url).await?;
        *session.process.lock().await = Some(launched.child);
        Ok(session)
    }

    #[must_use]
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_selector_timeout(mut self, timeout: Duration) -> Self {
        self.selector_timeout = Some(timeout);
        self
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrowserError::TargetClosed("page has been closed".to_string()));
        }
        if self.client.is_closed() {
            return Err(BrowserError::Disconnected);
        }
        Ok(())
    }

    async fn command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.ensure_open()?;
        Ok(self.client.send_command(method, params).await?)
    }

    /// Wait for the next `method` event on `events`.
    async fn next_event(
        &self,
        events: &mut broadcast::Receiver<CdpEvent>,
        method: &str,
        timeout: Option<Duration>,
    ) -> Result<CdpEvent, BrowserError> {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.method == method => return Ok(event),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return Err(BrowserError::Disconnected),
                }
            }
        };
        let bounded = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or_else(|_| {
                    Err(BrowserError::Timeout {
                        what: method.to_string(),
                        timeout_ms: millis(limit),
                    })
                }),
                None => wait.await,
            }
        };
        tokio::select! {
            () = self.client.wait_closed() => Err(BrowserError::Disconnected),
            result = bounded => result,
        }
    }

    /// Run `script` (an element-level snippet with `el` bound) against the
    /// first match for `selector`. Returns `false` when nothing matches.
    async fn with_element(&self, selector: &str, script: &str) -> Result<bool, BrowserError> {
        let quoted = Value::String(selector.to_string());
        let expression = format!(
            "(() => {{ const el = document.querySelector({quoted}); if (!el) return false; {script} return true; }})()"
        );
        Ok(self.evaluate(&expression).await?.as_bool().unwrap_or(false))
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let mut events = self.client.subscribe();
        let result = self.command("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            if !error.is_empty() {
                return Err(BrowserError::Protocol(format!("navigation to {url} failed: {error}")));
            }
        }
        self.next_event(&mut events, "Page.loadEventFired", self.navigation_timeout)
            .await?;
        tracing::debug!(url, "page loaded");
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let found = self
            .with_element(selector, "el.scrollIntoView({ block: 'center' }); el.click();")
            .await?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        if !self.with_element(selector, "el.focus();").await? {
            return Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        self.command("Input.insertText", json!({ "text": text })).await?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitOptions,
    ) -> Result<(), BrowserError> {
        let check = if options.visible {
            "const style = getComputedStyle(el); const rect = el.getBoundingClientRect(); \
             if (style.visibility === 'hidden' || style.display === 'none' || (rect.width === 0 && rect.height === 0)) return false;"
        } else {
            ""
        };
        let deadline = self.selector_timeout.map(|limit| Instant::now() + limit);
        loop {
            match self.with_element(selector, check).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // Execution contexts come and go while the page navigates.
                Err(err) if !err.is_session_dead() => {
                    tracing::trace!(selector, error = %err, "selector poll failed");
                }
                Err(err) => return Err(err),
            }
            if let (Some(deadline), Some(limit)) = (deadline, self.selector_timeout) {
                if Instant::now() >= deadline {
                    return Err(BrowserError::Timeout {
                        what: format!("selector {selector}"),
                        timeout_ms: millis(limit),
                    });
                }
            }
            self.sleep(SELECTOR_POLL_INTERVAL).await?;
        }
    }

    async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let mut events = self.client.subscribe();
        self.next_event(&mut events, "Page.loadEventFired", self.navigation_timeout)
            .await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("unknown exception");
            return Err(BrowserError::Evaluation(message.to_string()));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn network_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.network.subscribe()
    }

    async fn wait_for_response(
        &self,
        pattern: &UrlPattern,
        timeout: Duration,
    ) -> Result<NetworkExchange, BrowserError> {
        self.ensure_open()?;
        let mut events = self.network.subscribe();
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(NetworkEvent::Response(exchange)) if pattern.matches(&exchange.url) => {
                        return Ok(exchange);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "network listener lagged");
                    }
                    Err(RecvError::Closed) => return Err(BrowserError::Disconnected),
                }
            }
        };
        tokio::select! {
            () = self.client.wait_closed() => Err(BrowserError::Disconnected),
            result = tokio::time::timeout(timeout, wait) => result.unwrap_or_else(|_| {
                Err(BrowserError::Timeout {
                    what: format!("response from {pattern}"),
                    timeout_ms: millis(timeout),
                })
            }),
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<(), BrowserError> {
        self.ensure_open()?;
        tokio::select! {
            () = self.client.wait_closed() => Err(BrowserError::Disconnected),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if !self.client.is_closed() {
            if let Err(err) = self
                .client
                .send_command_with_timeout("Browser.close", json!({}), Duration::from_secs(5))
                .await
            {
                tracing::debug!(error = %err, "Browser.close failed");
            }
            self.client.close().await;
        }
        if let Some(mut child) = self.process.lock().await.take() {
            if let Err(err) = child.kill().await {
                tracing::debug!(error = %err, "browser process already gone");
            }
        }
        tracing::info!("browser closed");
        Ok(())
    }
}

/// Translate DevTools network events into [`NetworkEvent`]s, fetching the
/// body of each finished XHR/fetch response.
async fn pump_network(
    client: Arc<CdpClient>,
    mut events: broadcast::Receiver<CdpEvent>,
    network: broadcast::Sender<NetworkEvent>,
) {
    // requestId -> (url, status) between responseReceived and loadingFinished.
    let mut in_flight: HashMap<String, (String, u16)> = HashMap::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "DevTools event pump lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let params = &event.params;
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            continue;
        };
        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                if let Some(url) = params.pointer("/request/url").and_then(Value::as_str) {
                    let _ = network.send(NetworkEvent::Request {
                        request_id: request_id.to_string(),
                        url: url.to_string(),
                    });
                }
            }
            "Network.responseReceived" => {
                let captured = params
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|kind| CAPTURED_RESOURCE_TYPES.contains(&kind));
                if let (true, Some(url), Some(status)) = (
                    captured,
                    params.pointer("/response/url").and_then(Value::as_str),
                    params.pointer("/response/status").and_then(status_code),
                ) {
                    in_flight.insert(request_id.to_string(), (url.to_string(), status));
                }
            }
            "Network.loadingFinished" => {
                let Some((url, status)) = in_flight.remove(request_id) else {
                    continue;
                };
                match response_body(&client, request_id).await {
                    Ok(body) => {
                        tracing::trace!(%url, status, "captured response");
                        let _ = network.send(NetworkEvent::Response(NetworkExchange {
                            request_id: request_id.to_string(),
                            url,
                            status,
                            body,
                        }));
                    }
                    Err(err) => tracing::debug!(%url, error = %err, "could not read response body"),
                }
            }
            "Network.loadingFailed" => {
                in_flight.remove(request_id);
            }
            _ => {}
        }
    }
}

async fn response_body(client: &CdpClient, request_id: &str) -> Result<String, CdpError> {
    let result = client
        .send_command("Network.getResponseBody", json!({ "requestId": request_id }))
        .await?;
    if result.get("base64Encoded").and_then(Value::as_bool) == Some(true) {
        return Err(CdpError::Remote {
            code: 0,
            message: "binary response body".to_string(),
        });
    }
    Ok(result
        .get("body")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn status_code(value: &Value) -> Option<u16> {
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|f| f as u64))
        .and_then(|status| u16::try_from(status).ok())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
