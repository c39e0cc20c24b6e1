use std::sync::{Arc, Mutex, PoisonError};

use dtscan_core::{AppConfig, LoginDetails, ScraperOptions, SearchConfigStore, SearchParameters};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::browser::BrowserSession;
use crate::center::Center;
use crate::correlator::ResponseCorrelator;
use crate::error::ScraperError;
use crate::exchange::ExchangeRoutes;
use crate::navigator::{BookingNavigator, NavigatorSettings};
use crate::rate_limit::RateLimiter;
use crate::stream::AvailabilityStream;

/// Everything one search session shares: options, the browser page, the
/// response correlator, the rate limiter and the cancellation token.
pub struct Engine {
    config: AppConfig,
    store: Arc<SearchConfigStore>,
    session: Arc<dyn BrowserSession>,
    correlator: Arc<ResponseCorrelator>,
    navigator: Arc<BookingNavigator>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    #[must_use]
    pub fn new(config: AppConfig, session: Arc<dyn BrowserSession>) -> Self {
        let cancel = CancellationToken::new();
        let correlator = Arc::new(ResponseCorrelator::new(ExchangeRoutes::new(
            &config.booking_base_url,
        )));
        let limiter = Arc::new(RateLimiter::per_second(config.rate_per_second));
        let navigator = Arc::new(BookingNavigator::new(
            Arc::clone(&session),
            Arc::clone(&correlator),
            limiter,
            NavigatorSettings::from_config(&config),
            cancel.clone(),
        ));
        Self {
            config,
            store: Arc::new(SearchConfigStore::new()),
            session,
            correlator,
            navigator,
            cancel,
            listener: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &SearchConfigStore {
        &self.store
    }

    /// Replace the search options.
    pub fn configure(&self, options: ScraperOptions) {
        tracing::debug!(?options, "search options set");
        self.store.set_options(options);
    }

    /// Open the booking page, get through entry, login and licence
    /// selection, then return the centers to scan.
    ///
    /// # Errors
    ///
    /// Any fatal navigation error, or [`ScraperError::Cancelled`].
    pub async fn start(&self) -> Result<Vec<Center>, ScraperError> {
        self.sign_in().await?;
        let params = self.search_parameters().await?;
        self.navigator.resolve_centers(&params).await
    }

    /// Everything up to and including licence class selection.
    ///
    /// # Errors
    ///
    /// Any fatal navigation error, or [`ScraperError::Cancelled`].
    pub async fn sign_in(&self) -> Result<(), ScraperError> {
        self.ensure_listener();
        self.session.goto(&self.config.entry_url).await?;
        self.navigator.await_entry().await?;

        let details = self.login_details().await?;
        tracing::info!("Logging in...");
        self.navigator.login(&details).await?;

        let params = self.search_parameters().await?;
        tracing::info!(licence_class = %params.license_class, "Finding available times for a {} exam", params.license_class);
        self.navigator.select_license_class(params.license_class).await
    }

    /// Read the location list and pick the centers to scan.
    ///
    /// # Errors
    ///
    /// Fails if the location list cannot be read.
    pub async fn resolve_centers(&self) -> Result<Vec<Center>, ScraperError> {
        self.ensure_listener();
        let params = self.search_parameters().await?;
        self.navigator.resolve_centers(&params).await
    }

    /// Scan `centers` on a background task.
    #[must_use]
    pub fn run(&self, centers: Vec<Center>) -> AvailabilityStream {
        self.ensure_listener();
        let months = self.store.search_parameters().map_or(0, |p| p.months);
        let navigator = Arc::clone(&self.navigator);
        AvailabilityStream::spawn(Arc::clone(&self.session), self.cancel.clone(), move |tx| async move {
            navigator.scan_centers(&centers, months, &tx).await
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the listener and close the browser.
    ///
    /// # Errors
    ///
    /// Returns the session's close error, if any.
    pub async fn shutdown(&self) -> Result<(), ScraperError> {
        self.cancel.cancel();
        self.session.close().await?;
        Ok(())
    }

    fn ensure_listener(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_none() {
            *listener = Some(
                self.correlator
                    .spawn_listener(self.session.as_ref(), self.cancel.clone()),
            );
        }
    }

    async fn login_details(&self) -> Result<LoginDetails, ScraperError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ScraperError::Cancelled),
            details = self.store.first_login_details() => Ok(details),
        }
    }

    async fn search_parameters(&self) -> Result<SearchParameters, ScraperError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ScraperError::Cancelled),
            params = self.store.first_search_parameters() => Ok(params),
        }
    }
}
