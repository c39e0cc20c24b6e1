//! The booking flow: get past the waiting room, log in, pick a licence
//! class, then walk each chosen center's calendar month by month.
//!
//! Data comes from the site's own background API calls (via the
//! [`ResponseCorrelator`]), never from scraping markup. Page interactions
//! are wrapped in [`RetryExecutor`] and the calendar clicks go through the
//! shared [`RateLimiter`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dtscan_core::{AppConfig, LicenseClass, LoginDetails, SearchParameters};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserSession, NetworkExchange, WaitOptions};
use crate::center::{select_centers, Center};
use crate::correlator::ResponseCorrelator;
use crate::error::ScraperError;
use crate::events::{AvailabilityEvent, CenterRef};
use crate::exchange::ExchangeId;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::selectors;
use crate::types::{
    BookingDatesResponse, BookingTimesResponse, DayStatus, LocationListResponse, TimeSlot,
};

/// Attempts for calendar clicks, which fail often while the page animates.
const CALENDAR_ATTEMPTS: u32 = 100;

/// The login call can sit behind the site's queue for a long time.
const LOGIN_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// A month's dates call that has not shown up by now is treated as missed.
const DATES_STALL_TIMEOUT: Duration = Duration::from_secs(30);

const MODAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

const RESCHEDULE_LABEL: &str = "RESCHEDULE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigatorSettings {
    pub response_timeout: Duration,
    pub retry_delay: Duration,
    pub settle_delay: Duration,
    pub max_center_restarts: u32,
    pub rate_limit_login: bool,
}

impl NavigatorSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            max_center_restarts: config.max_center_restarts,
            rate_limit_login: config.rate_limit_login,
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(3, self.retry_delay)
    }
}

impl Default for NavigatorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct BookingNavigator {
    session: Arc<dyn BrowserSession>,
    correlator: Arc<ResponseCorrelator>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    settings: NavigatorSettings,
    cancel: CancellationToken,
}

/// Why a month's dates could not be read; the center scan restarts.
enum MissedMonth {
    Stalled,
    Unreadable(ScraperError),
}

impl BookingNavigator {
    #[must_use]
    pub fn new(
        session: Arc<dyn BrowserSession>,
        correlator: Arc<ResponseCorrelator>,
        limiter: Arc<RateLimiter>,
        settings: NavigatorSettings,
        cancel: CancellationToken,
    ) -> Self {
        let retry = RetryExecutor::new(Arc::clone(&session), cancel.clone());
        Self {
            session,
            correlator,
            limiter,
            retry,
            settings,
            cancel,
        }
    }

    /// Wait for the user to get through the CAPTCHA and the waiting room.
    ///
    /// # Errors
    ///
    /// Fails once the CAPTCHA check has failed on every attempt, or if the
    /// browser session dies.
    pub async fn await_entry(&self) -> Result<(), ScraperError> {
        tracing::info!("Please pass the CAPTCHA to continue...");

        let session = self.session.as_ref();
        let passed = self
            .retry
            .run("passCaptcha", self.settings.policy(), || async move {
                session.wait_for_navigation().await?;
                let passed = tokio::select! {
                    biased;
                    found = session.wait_for_selector(selectors::REGISTRATION_PANEL, WaitOptions::default()) => {
                        found?;
                        true
                    }
                    found = session.wait_for_selector(selectors::HEADER_BAR, WaitOptions::default()) => {
                        found?;
                        false
                    }
                };
                if passed {
                    Ok(())
                } else {
                    Err(ScraperError::CaptchaFailed)
                }
            })
            .await;

        if let Err(err) = passed {
            tracing::info!(
                "The CAPTCHA may have flagged the bundled Chromium as automated. Try a different Chromium-based browser with --chromium-path."
            );
            tracing::info!(
                "Avoid the browser you normally use, or it may get flagged as a bot too."
            );
            tracing::info!(
                "If the CAPTCHA keeps failing with a new browser, delete the site's cookies and try again."
            );
            return Err(err);
        }

        tracing::info!("Waiting to be allowed to leave waiting room...");
        session
            .wait_for_selector(selectors::EMAIL, WaitOptions::default())
            .await?;
        Ok(())
    }

    /// Fill in and submit the login form.
    ///
    /// # Errors
    ///
    /// [`ScraperError::LoginRejected`] on a 4xx and
    /// [`ScraperError::UpstreamOutage`] on a 5xx from the login call; both
    /// are fatal. Otherwise fails once the retry budget is spent.
    pub async fn login(&self, details: &LoginDetails) -> Result<(), ScraperError> {
        let session = self.session.as_ref();
        session
            .wait_for_selector(selectors::EMAIL, WaitOptions::default())
            .await?;
        for (selector, value) in [
            (selectors::EMAIL, details.email.as_str()),
            (selectors::CONFIRM_EMAIL, details.email.as_str()),
            (selectors::LICENSE_NUMBER, details.license_number.as_str()),
            (selectors::LICENSE_EXPIRY, details.license_expiry.as_str()),
        ] {
            if self.settings.rate_limit_login {
                self.limiter.acquire().await;
            }
            session.click(selector).await?;
            session.type_text(selector, value).await?;
        }
        if self.settings.rate_limit_login {
            self.limiter.acquire().await;
        }

        let pattern = self.correlator.routes().login_pattern();
        let submitted = AtomicBool::new(false);
        let (pattern, submitted) = (&pattern, &submitted);
        self.retry
            .run("waitForLogin", self.settings.policy(), || async move {
                let wait = session.wait_for_response(pattern, LOGIN_RESPONSE_TIMEOUT);
                let exchange = if submitted.load(Ordering::SeqCst) {
                    wait.await?
                } else {
                    // Subscribe to the response before the click can trigger it.
                    let (exchange, clicked) =
                        futures::future::join(wait, session.click(selectors::SUBMIT)).await;
                    clicked?;
                    submitted.store(true, Ordering::SeqCst);
                    exchange?
                };
                check_login_response(&exchange)
            })
            .await?;

        self.retry
            .run("waitForNavigation", self.settings.policy(), || async move {
                session.wait_for_navigation().await.map_err(ScraperError::from)
            })
            .await
    }

    /// Pick the licence class. A 412 from the eligibility check means the
    /// driver already holds a booking, which has to be opened for
    /// rescheduling first.
    ///
    /// # Errors
    ///
    /// Propagates browser failures.
    pub async fn select_license_class(&self, class: LicenseClass) -> Result<(), ScraperError> {
        let session = self.session.as_ref();
        let button = selectors::license_button(class.code());
        session.wait_for_selector(&button, WaitOptions::default()).await?;
        session.click(&button).await?;
        session.click(selectors::LICENSE_CONTINUE).await?;

        let eligibility = self
            .correlator
            .wait_for(session, ExchangeId::EligibilityCheck, self.settings.response_timeout)
            .await?;
        if eligibility.status == 412 {
            self.reschedule_existing_booking().await?;
        }
        Ok(())
    }

    async fn reschedule_existing_booking(&self) -> Result<(), ScraperError> {
        tracing::trace!("going through the edit existing booking flow");
        let session = self.session.as_ref();

        session
            .wait_for_selector(selectors::EDIT_BOOKING, WaitOptions::visible())
            .await?;
        session.click(selectors::EDIT_BOOKING).await?;
        session
            .wait_for_selector(selectors::RESCHEDULE_BOOKING, WaitOptions::default())
            .await?;
        session.click(selectors::RESCHEDULE_BOOKING).await?;

        session
            .wait_for_selector(selectors::MODAL_RESCHEDULE, WaitOptions::default())
            .await?;
        let script = selectors::inner_text_script(selectors::MODAL_RESCHEDULE);
        loop {
            if self.cancel.is_cancelled() {
                return Err(ScraperError::Cancelled);
            }
            let text = session.evaluate(&script).await?;
            if text.as_str() == Some(RESCHEDULE_LABEL) {
                break;
            }
            session.sleep(MODAL_POLL_INTERVAL).await?;
        }
        session.click(selectors::MODAL_RESCHEDULE).await?;
        Ok(())
    }

    /// Read the location list the page loaded and keep the centers that
    /// match `params`, nearest first.
    ///
    /// # Errors
    ///
    /// Fails on a non-2xx location response or an unreadable body.
    pub async fn resolve_centers(&self, params: &SearchParameters) -> Result<Vec<Center>, ScraperError> {
        let exchange = self
            .correlator
            .wait_for(
                self.session.as_ref(),
                ExchangeId::LocationList,
                self.settings.response_timeout,
            )
            .await?;
        if !exchange.is_success() {
            return Err(ScraperError::UnexpectedStatus {
                status: exchange.status,
                url: exchange.url.clone(),
            });
        }
        let list: LocationListResponse = exchange.json("location list")?;
        tracing::debug!(count = list.drive_test_centres.len(), "fetched test center locations");
        Ok(select_centers(list.drive_test_centres, params))
    }

    /// Scan every center in order.
    ///
    /// # Errors
    ///
    /// Stops at the first fatal error; per-center problems are reported as
    /// [`AvailabilityEvent::Failed`] instead.
    pub async fn scan_centers(
        &self,
        centers: &[Center],
        months: u32,
        events: &mpsc::Sender<AvailabilityEvent>,
    ) -> Result<(), ScraperError> {
        for center in centers {
            self.scan_center(center, months, events).await?;
        }
        Ok(())
    }

    /// Walk `months + 1` calendar months of one center, reporting every free
    /// slot.
    ///
    /// # Errors
    ///
    /// Fatal errors only.
    pub async fn scan_center(
        &self,
        center: &Center,
        months: u32,
        events: &mpsc::Sender<AvailabilityEvent>,
    ) -> Result<(), ScraperError> {
        let center_ref = CenterRef {
            id: center.id,
            name: center.name.clone(),
        };
        let location = selectors::location_link(center.id);
        let mut next_click: Option<JoinHandle<Result<(), ScraperError>>> = None;
        let mut remaining = months;
        let mut restarts = 0u32;
        // Calendars already reported, counted from the first. After a restart
        // the calendar is paged past them again without repeating events.
        let mut reported = 0u32;

        self.click_location(&location).await?;
        loop {
            let (month, dates) = match self.next_month_dates().await? {
                Ok(read) => read,
                Err(missed) => {
                    restarts += 1;
                    match &missed {
                        MissedMonth::Stalled => tracing::error!(
                            center = %center.name,
                            restarts,
                            "Something happened trying to wait for the request after selecting a location. Trying again..."
                        ),
                        MissedMonth::Unreadable(err) => tracing::error!(
                            center = %center.name,
                            restarts,
                            error = %err,
                            "Couldn't read the calendar after selecting a location. Trying again..."
                        ),
                    }
                    Self::settle_next_click(&mut next_click).await?;
                    if restarts > self.settings.max_center_restarts {
                        emit(
                            events,
                            AvailabilityEvent::Failed {
                                center: center_ref.clone(),
                                code: -1,
                                message: format!("calendar did not load after {restarts} attempts"),
                            },
                        )
                        .await?;
                        return Ok(());
                    }
                    self.click_location(&location).await?;
                    remaining = months;
                    continue;
                }
            };

            if dates.status_code > 0 {
                Self::settle_next_click(&mut next_click).await?;
                emit(
                    events,
                    AvailabilityEvent::Failed {
                        center: center_ref.clone(),
                        code: dates.status_code,
                        message: dates.status_message.unwrap_or_default(),
                    },
                )
                .await?;
                return Ok(());
            }

            let position = months - remaining;
            let fresh = position >= reported;
            if fresh {
                reported = position + 1;
                emit(
                    events,
                    AvailabilityEvent::Searching {
                        center: center_ref.clone(),
                        month,
                    },
                )
                .await?;
            } else {
                tracing::debug!(center = %center.name, month, "month already searched, paging on");
            }

            let open_days = dates
                .available_booking_dates
                .iter()
                .filter(|d| fresh && d.status == DayStatus::Open);
            for day in open_days {
                Self::settle_next_click(&mut next_click).await?;
                for slot in self.read_day(day.day).await? {
                    emit(
                        events,
                        AvailabilityEvent::Found {
                            center: center_ref.clone(),
                            timestamp: slot.timestamp,
                        },
                    )
                    .await?;
                }
                self.pause(self.settings.settle_delay).await?;
            }

            if remaining == 0 {
                break;
            }
            remaining -= 1;
            Self::settle_next_click(&mut next_click).await?;
            next_click = Some(self.spawn_next_month_click());
        }
        Self::settle_next_click(&mut next_click).await
    }

    async fn click_location(&self, location: &str) -> Result<(), ScraperError> {
        let session = self.session.as_ref();
        let limiter = self.limiter.as_ref();
        session.wait_for_selector(location, WaitOptions::default()).await?;
        self.retry
            .run(
                "selectLocation",
                self.settings.policy().attempts(CALENDAR_ATTEMPTS),
                || async move {
                    limiter.acquire().await;
                    tracing::debug!(selector = location, "clicking");
                    session.click(location).await?;
                    tracing::debug!(selector = selectors::LOCATION_CONTINUE, "clicking");
                    session.click(selectors::LOCATION_CONTINUE).await?;
                    Ok(())
                },
            )
            .await
    }

    /// Outer `Err` is fatal; inner `Err` means the scan should restart.
    async fn next_month_dates(
        &self,
    ) -> Result<Result<(u32, BookingDatesResponse), MissedMonth>, ScraperError> {
        tracing::debug!("waiting for response with dates for location");
        let waited = tokio::time::timeout(
            DATES_STALL_TIMEOUT,
            self.correlator.wait_for(
                self.session.as_ref(),
                ExchangeId::BookingDatesForMonth,
                self.settings.response_timeout,
            ),
        )
        .await;
        let exchange = match waited {
            Err(_) => return Ok(Err(MissedMonth::Stalled)),
            Ok(Err(err)) => return Err(err),
            Ok(Ok(exchange)) => exchange,
        };
        Ok(parse_dates(&exchange).map_err(MissedMonth::Unreadable))
    }

    async fn read_day(&self, day: u32) -> Result<Vec<TimeSlot>, ScraperError> {
        let session = self.session.as_ref();
        let limiter = self.limiter.as_ref();
        let correlator = self.correlator.as_ref();
        let timeout = self.settings.response_timeout;
        let day_selector = selectors::calendar_day(day);
        let day_selector = day_selector.as_str();
        self.retry
            .run(
                "selectDate",
                self.settings.policy().attempts(CALENDAR_ATTEMPTS),
                || async move {
                    limiter.acquire().await;
                    tracing::debug!(selector = day_selector, "clicking");
                    session.click(day_selector).await?;
                    tracing::debug!(selector = selectors::CALENDAR_CONTINUE, "clicking");
                    session.click(selectors::CALENDAR_CONTINUE).await?;
                    let exchange = correlator
                        .wait_for(session, ExchangeId::BookingTimesForDate, timeout)
                        .await?;
                    let times: BookingTimesResponse = exchange.json("booking times")?;
                    Ok(times.available_booking_times)
                },
            )
            .await
    }

    /// Click "next month" in the background. The following dates wait is
    /// what actually synchronises with the page.
    fn spawn_next_month_click(&self) -> JoinHandle<Result<(), ScraperError>> {
        let session = Arc::clone(&self.session);
        let limiter = Arc::clone(&self.limiter);
        let retry = self.retry.clone();
        let policy = self.settings.policy().attempts(CALENDAR_ATTEMPTS);
        tokio::spawn(async move {
            retry
                .run("clickNext", policy, || {
                    let (session, limiter) = (Arc::clone(&session), Arc::clone(&limiter));
                    async move {
                        limiter.acquire().await;
                        tracing::debug!(selector = selectors::NEXT_MONTH, "clicking");
                        session.click(selectors::NEXT_MONTH).await?;
                        Ok(())
                    }
                })
                .await
        })
    }

    /// Wait out a background next-month click so clicks never overlap.
    /// Only fatal failures of that click matter here.
    async fn settle_next_click(
        pending: &mut Option<JoinHandle<Result<(), ScraperError>>>,
    ) -> Result<(), ScraperError> {
        let Some(handle) = pending.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if err.is_fatal() => Err(err),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "next month click failed");
                Ok(())
            }
            Err(join_err) => Err(ScraperError::Step(format!(
                "next month click task failed: {join_err}"
            ))),
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), ScraperError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ScraperError::Cancelled),
            slept = self.session.sleep(duration) => slept.map_err(ScraperError::from),
        }
    }
}

fn check_login_response(exchange: &NetworkExchange) -> Result<(), ScraperError> {
    match exchange.status {
        200..=299 => Ok(()),
        status @ 400..=499 => {
            tracing::error!(
                status,
                "Failed to log you in automatically. Clear all cookies, refresh the page and log in manually. If you see this again, you may need to wait a few hours before trying to log in again."
            );
            Err(ScraperError::LoginRejected { status })
        }
        status @ 500.. => {
            tracing::error!(
                status,
                "DriveTest doesn't seem to be working right now, try again in a few minutes."
            );
            Err(ScraperError::UpstreamOutage {
                status,
                url: exchange.url.clone(),
            })
        }
        status => Err(ScraperError::UnexpectedStatus {
            status,
            url: exchange.url.clone(),
        }),
    }
}

/// Decode a month's dates and its zero-based month from the `month` query
/// parameter.
fn parse_dates(exchange: &NetworkExchange) -> Result<(u32, BookingDatesResponse), ScraperError> {
    let month = exchange
        .query_param("month")
        .and_then(|m| m.parse::<u32>().ok())
        .and_then(|m| m.checked_sub(1))
        .ok_or_else(|| ScraperError::Step(format!("no month in dates URL {}", exchange.url)))?;
    let dates: BookingDatesResponse = exchange.json("booking dates")?;
    Ok((month, dates))
}

async fn emit(
    events: &mpsc::Sender<AvailabilityEvent>,
    event: AvailabilityEvent,
) -> Result<(), ScraperError> {
    events.send(event).await.map_err(|_| ScraperError::Cancelled)
}

#[cfg(test)]
#[path = "navigator_test.rs"]
mod tests;
