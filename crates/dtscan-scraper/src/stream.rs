//! Live feed of a scan's progress.
//!
//! A producer task runs the scan and pushes [`AvailabilityEvent`]s into a
//! bounded channel; the consumer pulls them with
//! [`AvailabilityStream::next`] (or as a [`futures::Stream`]). Found slots
//! are folded into a [`RunSummary`] as they are handed out.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::browser::BrowserSession;
use crate::error::ScraperError;
use crate::events::{AvailabilityEvent, RunSummary};

const EVENT_BUFFER: usize = 64;

/// How a run ended.
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    /// Number of `Found` events handed out.
    pub found: usize,
    pub result: Result<(), ScraperError>,
}

pub struct AvailabilityStream {
    events: mpsc::Receiver<AvailabilityEvent>,
    summary: RunSummary,
    found: usize,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    producer: JoinHandle<Result<(), ScraperError>>,
}

impl AvailabilityStream {
    /// Start `produce` on its own task.
    ///
    /// If `cancel` fires first, the producer is dropped at its next
    /// suspension point and `session` is closed.
    pub fn spawn<F, Fut>(session: Arc<dyn BrowserSession>, cancel: CancellationToken, produce: F) -> Self
    where
        F: FnOnce(mpsc::Sender<AvailabilityEvent>) -> Fut,
        Fut: Future<Output = Result<(), ScraperError>> + Send + 'static,
    {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let (done_tx, done) = watch::channel(false);
        let run = produce(tx);
        let token = cancel.clone();
        let producer = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = token.cancelled() => Err(ScraperError::Cancelled),
                result = run => result,
            };
            if token.is_cancelled() {
                tracing::info!("search cancelled; closing browser");
                if let Err(err) = session.close().await {
                    tracing::warn!(error = %err, "failed to close browser session");
                }
            }
            match &result {
                Ok(()) => tracing::debug!("search complete"),
                Err(ScraperError::Cancelled) => {}
                Err(err) => tracing::error!(error = %err, "search stopped"),
            }
            done_tx.send_replace(true);
            result
        });
        Self {
            events,
            summary: RunSummary::default(),
            found: 0,
            cancel,
            done,
            producer,
        }
    }

    /// Next event, or `None` once the run has ended.
    pub async fn next(&mut self) -> Option<AvailabilityEvent> {
        let event = self.events.recv().await?;
        self.observe(&event);
        Some(event)
    }

    fn observe(&mut self, event: &AvailabilityEvent) {
        if matches!(event, AvailabilityEvent::Found { .. }) {
            self.found += 1;
        }
        self.summary.record(event);
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Flips to `true` when the producer has finished, for whatever reason.
    #[must_use]
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    /// Slots seen so far.
    #[must_use]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Drain the remaining events and wait for the producer.
    pub async fn finish(mut self) -> RunOutcome {
        while self.next().await.is_some() {}
        let result = match self.producer.await {
            Ok(result) => result,
            Err(join_err) => Err(ScraperError::Step(format!("search task failed: {join_err}"))),
        };
        RunOutcome {
            summary: self.summary,
            found: self.found,
            result,
        }
    }
}

impl futures::Stream for AvailabilityStream {
    type Item = AvailabilityEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                this.observe(&event);
                Poll::Ready(Some(event))
            }
            other => other,
        }
    }
}
