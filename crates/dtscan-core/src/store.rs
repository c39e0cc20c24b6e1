//! Last-value-cached store for the run's search options.
//!
//! Readers subscribe to one of two derived views. A view only notifies when
//! the record that was just set has every field the view needs, so
//! subscribers never observe a partially filled form.

use std::path::PathBuf;

use tokio::sync::watch;

use crate::license::LicenseClass;
use crate::options::{LoginDetails, ScraperOptions, SearchParameters};

pub struct SearchConfigStore {
    options: watch::Sender<ScraperOptions>,
    login: watch::Sender<Option<LoginDetails>>,
    search: watch::Sender<Option<SearchParameters>>,
}

impl Default for SearchConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: watch::Sender::new(ScraperOptions::default()),
            login: watch::Sender::new(None),
            search: watch::Sender::new(None),
        }
    }

    /// Replace the whole options record.
    ///
    /// Each view is recomputed. A complete view is published (one
    /// notification per call). An incomplete one is cleared without
    /// notifying, so waiting subscribers keep waiting.
    pub fn set_options(&self, options: ScraperOptions) {
        let login = options.login_details();
        let search = options.search_parameters();
        self.options.send_replace(options);
        publish(&self.login, login);
        publish(&self.search, search);
    }

    #[must_use]
    pub fn options(&self) -> ScraperOptions {
        self.options.borrow().clone()
    }

    /// Current login view, if complete.
    #[must_use]
    pub fn login_details(&self) -> Option<LoginDetails> {
        self.login.borrow().clone()
    }

    /// Current search view, if complete.
    #[must_use]
    pub fn search_parameters(&self) -> Option<SearchParameters> {
        *self.search.borrow()
    }

    #[must_use]
    pub fn subscribe_login_details(&self) -> watch::Receiver<Option<LoginDetails>> {
        self.login.subscribe()
    }

    #[must_use]
    pub fn subscribe_search_parameters(&self) -> watch::Receiver<Option<SearchParameters>> {
        self.search.subscribe()
    }

    /// Wait until complete login details have been set.
    pub async fn first_login_details(&self) -> LoginDetails {
        let mut rx = self.login.subscribe();
        loop {
            if let Some(details) = rx.borrow_and_update().clone() {
                return details;
            }
            // The sender lives in `self`, so the channel cannot close while we wait.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Wait until complete search parameters have been set.
    pub async fn first_search_parameters(&self) -> SearchParameters {
        let mut rx = self.search.subscribe();
        loop {
            if let Some(params) = *rx.borrow_and_update() {
                return params;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    #[must_use]
    pub fn license_class(&self) -> Option<LicenseClass> {
        self.options.borrow().license_class
    }

    #[must_use]
    pub fn months(&self) -> Option<u32> {
        self.options.borrow().months
    }

    #[must_use]
    pub fn chromium_path(&self) -> Option<PathBuf> {
        self.options.borrow().chromium_path.clone()
    }

    #[must_use]
    pub fn continuous(&self) -> bool {
        self.options.borrow().continuous
    }
}

fn publish<T>(sender: &watch::Sender<Option<T>>, value: Option<T>) {
    match value {
        Some(v) => {
            sender.send_replace(Some(v));
        }
        None => {
            sender.send_if_modified(|current| {
                *current = None;
                false
            });
        }
    }
}
