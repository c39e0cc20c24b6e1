pub mod browser;
pub mod center;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod events;
pub mod exchange;
pub mod navigator;
pub mod rate_limit;
pub mod retry;
pub mod selectors;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use browser::{BrowserSession, NetworkEvent, NetworkExchange, UrlPattern, WaitOptions};
pub use center::{select_centers, Center};
pub use correlator::ResponseCorrelator;
pub use engine::Engine;
pub use error::{BrowserError, ScraperError};
pub use events::{AvailabilityEvent, CenterRef, FoundSlot, RunSummary};
pub use exchange::{ExchangeId, ExchangeRoutes};
pub use navigator::BookingNavigator;
pub use rate_limit::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy};
pub use stream::{AvailabilityStream, RunOutcome};
