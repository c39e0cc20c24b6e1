/// Default root of the booking service's background API.
pub const DEFAULT_BOOKING_BASE_URL: &str = "https://drivetest.ca/booking/v1";

/// Page the browser opens to start a booking session.
pub const DEFAULT_ENTRY_URL: &str = "https://drivetest.ca/book-a-road-test/booking.html";

/// Redirecting URL that resolves to the newest published release tag.
pub const DEFAULT_RELEASE_URL: &str =
    "https://github.com/silverAndroid/drivetest-ca-availabilities/releases/latest";

/// Runtime settings read from `DTSCAN_*` environment variables.
///
/// Search options (who to log in as, where to look) live in
/// [`crate::ScraperOptions`]; this struct only carries the knobs that tune
/// how the engine talks to the booking site.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub log_level: String,
    pub booking_base_url: String,
    pub entry_url: String,
    pub release_url: String,
    /// Port Chromium exposes DevTools on when the CLI launches it.
    pub devtools_port: u16,
    /// UI actions allowed per second by the shared rate limiter.
    pub rate_per_second: u32,
    /// Whether login form actions go through the rate limiter too.
    pub rate_limit_login: bool,
    pub retry_delay_ms: u64,
    /// How long a direct response wait runs before falling back to the
    /// background listener.
    pub response_timeout_ms: u64,
    /// Pause after reading a day's time slots while the calendar scrolls.
    pub settle_delay_ms: u64,
    pub continuous_pause_secs: u64,
    /// Times a center's scan restarts after a missed month response before
    /// the center is reported as failed.
    pub max_center_restarts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            booking_base_url: DEFAULT_BOOKING_BASE_URL.to_string(),
            entry_url: DEFAULT_ENTRY_URL.to_string(),
            release_url: DEFAULT_RELEASE_URL.to_string(),
            devtools_port: 9222,
            rate_per_second: 15,
            rate_limit_login: false,
            retry_delay_ms: 1_000,
            response_timeout_ms: 5_000,
            settle_delay_ms: 2_000,
            continuous_pause_secs: 3,
            max_center_restarts: 10,
        }
    }
}
