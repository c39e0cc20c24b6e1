mod options;
mod report;
mod search;
mod update;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dtscan_browser::{resolve_ws_url, CdpSession};
use dtscan_core::{
    parse_bounded_int, parse_location, validate_expiry_date, validate_license_number, AppConfig,
    Coordinates, LicenseClass, ScraperOptions,
};
use dtscan_scraper::{BrowserSession, Engine};
use tracing_subscriber::EnvFilter;

use crate::search::SearchEnd;
use crate::update::UpdateStatus;

/// Browser launched when neither `--chromium-path` nor the options file names one.
const DEFAULT_CHROMIUM: &str = "chromium";

#[derive(Debug, Parser)]
#[command(name = "dtscan", version)]
#[command(about = "Find open DriveTest road-test slots near you")]
struct Cli {
    /// Search radius in kilometres from your location [default: 20]
    #[arg(short, long, value_parser = |s: &str| parse_bounded_int(s, "radius", None))]
    radius: Option<u32>,

    /// Your location as "latitude,longitude" (e.g. 43.6426445,-79.3871645)
    #[arg(short, long, value_parser = |s: &str| parse_location(s), allow_hyphen_values = true)]
    location: Option<Coordinates>,

    /// Number of months to look ahead, at most 12 [default: 6]
    #[arg(short, long, value_parser = |s: &str| parse_bounded_int(s, "months", Some(dtscan_core::options::MAX_MONTHS)))]
    months: Option<u32>,

    /// Licence class exam to search for (e.g. G2)
    #[arg(long, alias = "licenseType")]
    license_type: Option<LicenseClass>,

    /// Email to log in with
    #[arg(long)]
    email: Option<String>,

    /// Licence number to log in with (A1234-12345-12345)
    #[arg(long, alias = "licenseNumber", value_parser = |s: &str| validate_license_number(s))]
    license_number: Option<String>,

    /// Licence expiry date to log in with (YYYY/MM/DD)
    #[arg(long, alias = "licenseExpiry", value_parser = |s: &str| validate_expiry_date(s))]
    license_expiry: Option<String>,

    /// Keep searching after each pass until you stop it
    #[arg(long, alias = "enableContinuousSearching")]
    continuous: bool,

    /// Chromium-based browser to launch. Avoid the browser you normally use;
    /// the captcha may flag it.
    #[arg(long, alias = "chromiumPath", env = "DTSCAN_CHROMIUM_PATH")]
    chromium_path: Option<PathBuf>,

    /// Options file with defaults for any flag above
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Attach to an already running browser instead of launching one
    /// (`http://127.0.0.1:9222` or a page `ws://` URL)
    #[arg(long)]
    devtools_url: Option<String>,

    /// Don't check for a newer release before searching
    #[arg(long)]
    skip_update_check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = dtscan_core::load_app_config()?;
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let options = options::resolve(&cli)?;

    if !cli.skip_update_check && !update_allows_search(&config).await {
        return Ok(());
    }

    let session = open_session(&config, &cli, &options).await?;
    let engine = Arc::new(Engine::new(config.clone(), session));
    engine.configure(options.clone());

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stopping search...");
            token.cancel();
        }
    });

    let pause = Duration::from_secs(config.continuous_pause_secs);
    match search::run(&engine, options.continuous, pause).await {
        Ok(SearchEnd::Close) => {
            engine.shutdown().await?;
            Ok(())
        }
        Ok(SearchEnd::KeepOpen) => {
            tracing::info!("Leaving the browser open so you can book");
            Ok(())
        }
        Err(err) => {
            if let Err(close_err) = engine.shutdown().await {
                tracing::debug!(error = %close_err, "browser already closed");
            }
            if search::is_cancelled(&err) {
                tracing::info!("Search cancelled");
                return Ok(());
            }
            Err(err)
        }
    }
}

/// Check for a newer release. Returns `false` when the run should stop so
/// the user can update.
async fn update_allows_search(config: &AppConfig) -> bool {
    tracing::info!("Checking for updates...");
    let current = env!("CARGO_PKG_VERSION");
    let status = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(http) => update::check_for_update(&http, &config.release_url, current).await,
        Err(err) => Err(err.into()),
    };

    match status {
        Ok(UpdateStatus::UpToDate) => {
            tracing::info!("No new updates found, current version {current}");
            true
        }
        Ok(UpdateStatus::Available { url, major: true, .. }) => {
            tracing::info!("There's a new major version of this tool. Go to {url} if you want to see what's changed!");
            tracing::warn!("There won't be any more updates unless you update to the new version!");
            tokio::time::sleep(Duration::from_secs(3)).await;
            true
        }
        Ok(UpdateStatus::Available { url, .. }) => {
            tracing::info!("Found new update at {url}! Please update to the latest version.");
            false
        }
        Err(err) => {
            tracing::warn!(error = %err, "update check failed; continuing");
            true
        }
    }
}

async fn open_session(
    config: &AppConfig,
    cli: &Cli,
    options: &ScraperOptions,
) -> anyhow::Result<Arc<dyn BrowserSession>> {
    let session = if let Some(url) = &cli.devtools_url {
        let ws_url = resolve_ws_url(url).await?;
        tracing::info!(%ws_url, "attaching to running browser");
        CdpSession::connect(&ws_url).await?
    } else {
        let path = options
            .chromium_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHROMIUM));
        CdpSession::launch(&path, config.devtools_port).await?
    };
    Ok(Arc::new(session))
}
