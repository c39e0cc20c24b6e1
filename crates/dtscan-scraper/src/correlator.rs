//! Response correlation.
//!
//! The booking page fires its API calls on its own schedule, often before
//! the navigator gets round to waiting for them. A listener task records
//! every request it recognises and the response that completes it. A caller
//! in [`ResponseCorrelator::wait_for`] races a direct "next matching
//! response" wait on the session against that record, so a response that
//! arrived early is still delivered.
//!
//! Each [`ExchangeId`] has one slot moving `Unset -> Pending -> Resolved`.
//! A newer request always overwrites the slot. Consuming a result resets the
//! slot to `Unset`, but only if it still holds that same result.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserSession, NetworkEvent, NetworkExchange};
use crate::error::ScraperError;
use crate::exchange::{ExchangeId, ExchangeRoutes};

#[derive(Debug, Clone, Default)]
enum SlotState {
    #[default]
    Unset,
    Pending {
        request_id: String,
    },
    Resolved(Arc<NetworkExchange>),
}

#[derive(Debug, Default)]
struct SlotInner {
    state: SlotState,
    /// Most recently consumed exchange. Late events for the same request are
    /// ignored and late direct waits reuse this `Arc`.
    last_consumed: Option<Arc<NetworkExchange>>,
}

#[derive(Debug)]
struct Slot {
    inner: Mutex<SlotInner>,
    resolved: broadcast::Sender<Arc<NetworkExchange>>,
}

impl Slot {
    fn new() -> Self {
        let (resolved, _) = broadcast::channel(8);
        Self {
            inner: Mutex::new(SlotInner::default()),
            resolved,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct ResponseCorrelator {
    routes: ExchangeRoutes,
    slots: [Slot; 4],
}

impl ResponseCorrelator {
    #[must_use]
    pub fn new(routes: ExchangeRoutes) -> Self {
        Self {
            routes,
            slots: [Slot::new(), Slot::new(), Slot::new(), Slot::new()],
        }
    }

    #[must_use]
    pub fn routes(&self) -> &ExchangeRoutes {
        &self.routes
    }

    fn slot(&self, id: ExchangeId) -> &Slot {
        &self.slots[id.index()]
    }

    /// Note an outgoing request. Returns the id it was classified as.
    pub fn record_request(&self, request_id: &str, url: &str) -> Option<ExchangeId> {
        let id = self.routes.classify(url)?;
        let mut inner = self.slot(id).lock();
        if inner
            .last_consumed
            .as_ref()
            .is_some_and(|c| c.request_id == request_id)
        {
            return Some(id);
        }
        tracing::debug!(exchange = %id, request_id, "waiting for response");
        inner.state = SlotState::Pending {
            request_id: request_id.to_string(),
        };
        Some(id)
    }

    /// Complete the pending request this response belongs to, if any.
    pub fn record_response(&self, exchange: NetworkExchange) -> Option<ExchangeId> {
        for id in ExchangeId::ALL {
            let slot = self.slot(id);
            let mut inner = slot.lock();
            let SlotState::Pending { request_id } = &inner.state else {
                continue;
            };
            if *request_id != exchange.request_id {
                continue;
            }
            tracing::debug!(exchange = %id, request_id = %exchange.request_id, status = exchange.status, "received response");
            let resolved = Arc::new(exchange);
            inner.state = SlotState::Resolved(Arc::clone(&resolved));
            drop(inner);
            // No receivers just means nobody is waiting yet.
            let _ = slot.resolved.send(resolved);
            return Some(id);
        }
        None
    }

    pub fn handle_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Request { request_id, url } => {
                self.record_request(&request_id, &url);
            }
            NetworkEvent::Response(exchange) => {
                self.record_response(exchange);
            }
        }
    }

    /// The resolved exchange currently held for `id`.
    #[must_use]
    pub fn peek(&self, id: ExchangeId) -> Option<Arc<NetworkExchange>> {
        match &self.slot(id).lock().state {
            SlotState::Resolved(exchange) => Some(Arc::clone(exchange)),
            _ => None,
        }
    }

    /// Feed the session's network events into the slots until `cancel` fires
    /// or the session's event stream ends.
    pub fn spawn_listener(
        self: &Arc<Self>,
        session: &dyn BrowserSession,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut events = session.network_events();
        let correlator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => correlator.handle_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "network listener fell behind; events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("network listener stopped");
        })
    }

    /// Wait for the next `id` exchange.
    ///
    /// A direct wait on the session runs for up to `timeout`; meanwhile, and
    /// afterwards without limit, the recorded slot is watched. Whichever
    /// yields first wins.
    ///
    /// # Errors
    ///
    /// Only session-dead failures from the direct wait are returned; any
    /// other direct failure falls back to the recorded slot.
    pub async fn wait_for(
        &self,
        session: &dyn BrowserSession,
        id: ExchangeId,
        timeout: Duration,
    ) -> Result<Arc<NetworkExchange>, ScraperError> {
        let pattern = self.routes.pattern(id);
        // Subscribe before looking at the slot so a resolve in between is not lost.
        let receiver = self.slot(id).resolved.subscribe();
        let recorded = self.next_resolved(id, receiver);
        tokio::pin!(recorded);

        let exchange = tokio::select! {
            direct = session.wait_for_response(&pattern, timeout) => match direct {
                Ok(exchange) => self.adopt(id, exchange),
                Err(err) if err.is_session_dead() => return Err(err.into()),
                Err(err) => {
                    tracing::debug!(exchange = %id, error = %err, "direct wait failed; using recorded response");
                    (&mut recorded).await
                }
            },
            exchange = &mut recorded => exchange,
        };

        self.consume(id, &exchange);
        Ok(exchange)
    }

    async fn next_resolved(
        &self,
        id: ExchangeId,
        mut receiver: broadcast::Receiver<Arc<NetworkExchange>>,
    ) -> Arc<NetworkExchange> {
        loop {
            if let Some(exchange) = self.peek(id) {
                return exchange;
            }
            match receiver.recv().await {
                Ok(exchange) => return exchange,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                // The sender lives in the slot, so this cannot close while `self` is alive.
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }

    /// Share one `Arc` per request between the direct and recorded paths.
    fn adopt(&self, id: ExchangeId, exchange: NetworkExchange) -> Arc<NetworkExchange> {
        let mut inner = self.slot(id).lock();
        if let SlotState::Resolved(held) = &inner.state {
            if held.request_id == exchange.request_id {
                return Arc::clone(held);
            }
        }
        if let Some(consumed) = &inner.last_consumed {
            if consumed.request_id == exchange.request_id {
                return Arc::clone(consumed);
            }
        }
        let exchange = Arc::new(exchange);
        inner.state = SlotState::Resolved(Arc::clone(&exchange));
        exchange
    }

    fn consume(&self, id: ExchangeId, exchange: &Arc<NetworkExchange>) {
        let mut inner = self.slot(id).lock();
        if let SlotState::Resolved(held) = &inner.state {
            if Arc::ptr_eq(held, exchange) {
                inner.state = SlotState::Unset;
            }
        }
        inner.last_consumed = Some(Arc::clone(exchange));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSession;

    const BASE: &str = "https://drivetest.ca/booking/v1";
    const LOCATIONS: &str = "https://drivetest.ca/booking/v1/location";
    const DATES: &str = "https://drivetest.ca/booking/v1/booking/9587?month=5&year=2026";

    fn correlator() -> Arc<ResponseCorrelator> {
        Arc::new(ResponseCorrelator::new(ExchangeRoutes::new(BASE)))
    }

    #[test]
    fn response_resolves_only_the_matching_pending_request() {
        let c = correlator();
        c.record_request("r1", LOCATIONS);
        c.record_request("r2", LOCATIONS);
        // r1 was overwritten by r2.
        assert_eq!(
            c.record_response(NetworkExchange {
                request_id: "r1".into(),
                url: LOCATIONS.into(),
                status: 200,
                body: "{}".into(),
            }),
            None
        );
        assert!(c.peek(ExchangeId::LocationList).is_none());
        assert_eq!(
            c.record_response(NetworkExchange {
                request_id: "r2".into(),
                url: LOCATIONS.into(),
                status: 200,
                body: "{}".into(),
            }),
            Some(ExchangeId::LocationList)
        );
        assert_eq!(c.peek(ExchangeId::LocationList).unwrap().request_id, "r2");
    }

    #[test]
    fn unrecognised_requests_are_ignored() {
        let c = correlator();
        assert_eq!(c.record_request("r1", "https://drivetest.ca/app.js"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_wait_wins_when_response_arrives_in_time() {
        let fake = FakeSession::new();
        let c = correlator();
        let _listener = c.spawn_listener(fake.as_ref(), CancellationToken::new());

        let waiter = {
            let (c, fake) = (Arc::clone(&c), Arc::clone(&fake));
            tokio::spawn(async move {
                c.wait_for(fake.as_ref(), ExchangeId::LocationList, Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;
        fake.emit(LOCATIONS, 200, r#"{"driveTestCentres": []}"#);

        let exchange = waiter.await.unwrap().unwrap();
        assert_eq!(exchange.url, LOCATIONS);
    }

    #[tokio::test(start_paused = true)]
    async fn early_response_is_served_from_the_slot() {
        let fake = FakeSession::new();
        let c = correlator();
        let _listener = c.spawn_listener(fake.as_ref(), CancellationToken::new());

        let sent = fake.emit(DATES, 200, "{}");
        tokio::task::yield_now().await;
        assert!(c.peek(ExchangeId::BookingDatesForMonth).is_some());

        let start = tokio::time::Instant::now();
        let exchange = c
            .wait_for(fake.as_ref(), ExchangeId::BookingDatesForMonth, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(exchange.request_id, sent.request_id);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(c.peek(ExchangeId::BookingDatesForMonth).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_slot_after_direct_timeout() {
        let fake = FakeSession::new();
        fake.set_direct_waits_time_out(true);
        let c = correlator();
        let _listener = c.spawn_listener(fake.as_ref(), CancellationToken::new());

        let waiter = {
            let (c, fake) = (Arc::clone(&c), Arc::clone(&fake));
            tokio::spawn(async move {
                c.wait_for(fake.as_ref(), ExchangeId::LocationList, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(!waiter.is_finished());

        fake.emit(LOCATIONS, 200, "{}");
        let exchange = waiter.await.unwrap().unwrap();
        assert_eq!(exchange.url, LOCATIONS);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_attached_while_pending_gets_the_late_response() {
        let fake = FakeSession::new();
        fake.set_direct_waits_time_out(true);
        let c = correlator();
        let _listener = c.spawn_listener(fake.as_ref(), CancellationToken::new());

        let request_id = fake.emit_request(DATES);
        tokio::task::yield_now().await;
        assert!(c.peek(ExchangeId::BookingDatesForMonth).is_none());

        let waiter = {
            let (c, fake) = (Arc::clone(&c), Arc::clone(&fake));
            tokio::spawn(async move {
                c.wait_for(fake.as_ref(), ExchangeId::BookingDatesForMonth, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(!waiter.is_finished());

        // A response to some other request leaves the slot pending.
        fake.emit_response("req-stale", DATES, 200, "{}");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        fake.emit_response(&request_id, DATES, 200, r#"{"statusCode": 0}"#);
        let exchange = waiter.await.unwrap().unwrap();
        assert_eq!(exchange.request_id, request_id);
        assert_eq!(exchange.body, r#"{"statusCode": 0}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_share_one_exchange() {
        let fake = FakeSession::new();
        fake.set_direct_waits_time_out(true);
        let c = correlator();
        let _listener = c.spawn_listener(fake.as_ref(), CancellationToken::new());

        let spawn_waiter = || {
            let (c, fake) = (Arc::clone(&c), Arc::clone(&fake));
            tokio::spawn(async move {
                c.wait_for(fake.as_ref(), ExchangeId::LocationList, Duration::from_secs(5))
                    .await
            })
        };
        let first = spawn_waiter();
        let second = spawn_waiter();
        tokio::task::yield_now().await;

        fake.emit(LOCATIONS, 200, "{}");
        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test(start_paused = true)]
    async fn consumed_exchange_is_not_served_again() {
        let fake = FakeSession::new();
        fake.set_direct_waits_time_out(true);
        let c = correlator();
        let _listener = c.spawn_listener(fake.as_ref(), CancellationToken::new());

        fake.emit(LOCATIONS, 200, "{}");
        tokio::task::yield_now().await;
        c.wait_for(fake.as_ref(), ExchangeId::LocationList, Duration::from_secs(5))
            .await
            .unwrap();

        let late = {
            let (c, fake) = (Arc::clone(&c), Arc::clone(&fake));
            tokio::spawn(async move {
                c.wait_for(fake.as_ref(), ExchangeId::LocationList, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!late.is_finished(), "must not observe the consumed exchange");

        let newer = fake.emit(LOCATIONS, 200, r#"{"driveTestCentres": []}"#);
        let exchange = late.await.unwrap().unwrap();
        assert_eq!(exchange.request_id, newer.request_id);
    }

    #[test]
    fn reset_keeps_a_newer_pending_request() {
        let c = correlator();
        c.record_request("r1", LOCATIONS);
        c.record_response(NetworkExchange {
            request_id: "r1".into(),
            url: LOCATIONS.into(),
            status: 200,
            body: "{}".into(),
        });
        let resolved = c.peek(ExchangeId::LocationList).unwrap();
        c.record_request("r2", LOCATIONS);
        c.consume(ExchangeId::LocationList, &resolved);

        let inner = c.slot(ExchangeId::LocationList).lock();
        assert!(matches!(&inner.state, SlotState::Pending { request_id } if request_id == "r2"));
    }

    #[tokio::test(start_paused = true)]
    async fn session_dead_direct_failure_propagates() {
        let fake = FakeSession::new();
        fake.close().await.unwrap();
        let c = correlator();
        let err = c
            .wait_for(fake.as_ref(), ExchangeId::LocationList, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_session_dead());
    }

    #[tokio::test(start_paused = true)]
    async fn listener_stops_on_cancel() {
        let fake = FakeSession::new();
        let c = correlator();
        let cancel = CancellationToken::new();
        let listener = c.spawn_listener(fake.as_ref(), cancel.clone());
        cancel.cancel();
        listener.await.unwrap();
        fake.emit(LOCATIONS, 200, "{}");
        assert!(c.peek(ExchangeId::LocationList).is_none());
    }
}
