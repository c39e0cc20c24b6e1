//! Scripted in-memory [`BrowserSession`] for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::browser::{BrowserSession, NetworkEvent, NetworkExchange, UrlPattern, WaitOptions};
use crate::error::BrowserError;

/// What happens the next time a selector is clicked.
#[derive(Debug, Clone)]
pub(crate) enum ClickScript {
    Fail(BrowserError),
    /// Publish these exchanges (request then response) after `delay`.
    Emit {
        exchanges: Vec<(String, u16, String)>,
        delay: Duration,
    },
}

#[derive(Default)]
struct Script {
    clicks: HashMap<String, VecDeque<ClickScript>>,
    evaluations: VecDeque<serde_json::Value>,
    navigation_failures: u32,
}

pub(crate) struct FakeSession {
    events: broadcast::Sender<NetworkEvent>,
    script: Mutex<Script>,
    absent: Mutex<HashSet<String>>,
    actions: Mutex<Vec<String>>,
    closed: AtomicBool,
    direct_waits_time_out: AtomicBool,
    next_request: AtomicU64,
}

impl FakeSession {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            events,
            script: Mutex::new(Script::default()),
            absent: Mutex::new(HashSet::new()),
            actions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            direct_waits_time_out: AtomicBool::new(false),
            next_request: AtomicU64::new(1),
        })
    }

    pub(crate) fn on_click(&self, selector: &str, script: ClickScript) {
        self.script
            .lock()
            .unwrap()
            .clicks
            .entry(selector.to_string())
            .or_default()
            .push_back(script);
    }

    /// Shorthand: clicking `selector` produces one exchange immediately.
    pub(crate) fn respond_on_click(&self, selector: &str, url: &str, status: u16, body: &str) {
        self.on_click(
            selector,
            ClickScript::Emit {
                exchanges: vec![(url.to_string(), status, body.to_string())],
                delay: Duration::ZERO,
            },
        );
    }

    pub(crate) fn push_evaluation(&self, value: serde_json::Value) {
        self.script.lock().unwrap().evaluations.push_back(value);
    }

    pub(crate) fn fail_navigations(&self, count: u32) {
        self.script.lock().unwrap().navigation_failures = count;
    }

    /// Waiting for this selector never resolves.
    pub(crate) fn mark_absent(&self, selector: &str) {
        self.absent.lock().unwrap().insert(selector.to_string());
    }

    pub(crate) fn set_direct_waits_time_out(&self, value: bool) {
        self.direct_waits_time_out.store(value, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    pub(crate) fn clicks_of(&self, selector: &str) -> usize {
        let wanted = format!("click {selector}");
        self.actions().iter().filter(|a| **a == wanted).count()
    }

    /// Publish a request/response pair now and return the exchange.
    pub(crate) fn emit(&self, url: &str, status: u16, body: &str) -> NetworkExchange {
        let id = self.next_request.fetch_add(1, Ordering::SeqCst);
        let exchange = NetworkExchange {
            request_id: format!("req-{id}"),
            url: url.to_string(),
            status,
            body: body.to_string(),
        };
        let _ = self.events.send(NetworkEvent::Request {
            request_id: exchange.request_id.clone(),
            url: exchange.url.clone(),
        });
        let _ = self.events.send(NetworkEvent::Response(exchange.clone()));
        exchange
    }

    /// Publish only the request half and return its id.
    pub(crate) fn emit_request(&self, url: &str) -> String {
        let id = format!("req-{}", self.next_request.fetch_add(1, Ordering::SeqCst));
        let _ = self.events.send(NetworkEvent::Request {
            request_id: id.clone(),
            url: url.to_string(),
        });
        id
    }

    pub(crate) fn emit_response(&self, request_id: &str, url: &str, status: u16, body: &str) {
        let _ = self.events.send(NetworkEvent::Response(NetworkExchange {
            request_id: request_id.to_string(),
            url: url.to_string(),
            status,
            body: body.to_string(),
        }));
    }

    fn record(&self, action: String) {
        self.actions.lock().unwrap().push(action);
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.is_closed() {
            Err(BrowserError::TargetClosed("page".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.record(format!("goto {url}"));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.record(format!("click {selector}"));
        let next = self
            .script
            .lock()
            .unwrap()
            .clicks
            .get_mut(selector)
            .and_then(VecDeque::pop_front);
        match next {
            None => Ok(()),
            Some(ClickScript::Fail(err)) => Err(err),
            Some(ClickScript::Emit { exchanges, delay }) => {
                if delay.is_zero() {
                    for (url, status, body) in exchanges {
                        self.emit(&url, status, &body);
                    }
                } else {
                    let events = self.events.clone();
                    let first_id = self
                        .next_request
                        .fetch_add(exchanges.len() as u64, Ordering::SeqCst);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        for (offset, (url, status, body)) in exchanges.into_iter().enumerate() {
                            let request_id = format!("req-{}", first_id + offset as u64);
                            let _ = events.send(NetworkEvent::Request {
                                request_id: request_id.clone(),
                                url: url.clone(),
                            });
                            let _ = events.send(NetworkEvent::Response(NetworkExchange {
                                request_id,
                                url,
                                status,
                                body,
                            }));
                        }
                    });
                }
                Ok(())
            }
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.record(format!("type {selector} {text}"));
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, options: WaitOptions) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let absent = self.absent.lock().unwrap().contains(selector);
        if absent {
            std::future::pending::<()>().await;
        }
        let suffix = if options.visible { " (visible)" } else { "" };
        self.record(format!("wait {selector}{suffix}"));
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let mut script = self.script.lock().unwrap();
        if script.navigation_failures > 0 {
            script.navigation_failures -= 1;
            return Err(BrowserError::Timeout {
                what: "navigation".into(),
                timeout_ms: 30_000,
            });
        }
        drop(script);
        self.record("navigation".to_string());
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, BrowserError> {
        self.ensure_open()?;
        self.record(format!("evaluate {expression}"));
        Ok(self
            .script
            .lock()
            .unwrap()
            .evaluations
            .pop_front()
            .unwrap_or(serde_json::Value::Null))
    }

    fn network_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    async fn wait_for_response(
        &self,
        pattern: &UrlPattern,
        timeout: Duration,
    ) -> Result<NetworkExchange, BrowserError> {
        self.ensure_open()?;
        let timed_out = || BrowserError::Timeout {
            what: format!("response matching {pattern}"),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        if self.direct_waits_time_out.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(timed_out());
        }
        let mut rx = self.events.subscribe();
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(NetworkEvent::Response(ex)) if pattern.matches(&ex.url) => return Ok(ex),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(BrowserError::Disconnected),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| Err(timed_out()))
    }

    async fn sleep(&self, duration: Duration) -> Result<(), BrowserError> {
        self.ensure_open()?;
        tokio::time::sleep(duration).await;
        self.ensure_open()
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        self.record("close".to_string());
        Ok(())
    }
}
