use crate::app_config::AppConfig;
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is set but cannot be parsed.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is set but cannot be parsed.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Every variable is optional; unset ones fall back to [`AppConfig::default`].
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let defaults = AppConfig::default();

    let or_default =
        |var: &str, default: &str| -> String { lookup(var).unwrap_or_else(|_| default.to_string()) };

    let parse_u64 = |var: &str, default: u64| -> Result<u64, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    };

    let parse_u32 = |var: &str, default: u32| -> Result<u32, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    };

    let parse_u16 = |var: &str, default: u16| -> Result<u16, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    };

    let parse_bool = |var: &str, default: bool| -> Result<bool, ConfigError> {
        match lookup(var) {
            Ok(raw) => parse_flag(&raw).ok_or_else(|| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: format!("expected true/false, got \"{raw}\""),
            }),
            Err(_) => Ok(default),
        }
    };

    let log_level = or_default("DTSCAN_LOG_LEVEL", &defaults.log_level);
    let booking_base_url = or_default("DTSCAN_BOOKING_BASE_URL", &defaults.booking_base_url)
        .trim_end_matches('/')
        .to_string();
    let entry_url = or_default("DTSCAN_ENTRY_URL", &defaults.entry_url);
    let release_url = or_default("DTSCAN_RELEASE_URL", &defaults.release_url);
    let devtools_port = parse_u16("DTSCAN_DEVTOOLS_PORT", defaults.devtools_port)?;

    let rate_per_second = parse_u32("DTSCAN_RATE_PER_SECOND", defaults.rate_per_second)?;
    if rate_per_second == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "DTSCAN_RATE_PER_SECOND".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    let rate_limit_login = parse_bool("DTSCAN_RATE_LIMIT_LOGIN", defaults.rate_limit_login)?;

    let retry_delay_ms = parse_u64("DTSCAN_RETRY_DELAY_MS", defaults.retry_delay_ms)?;
    let response_timeout_ms = parse_u64("DTSCAN_RESPONSE_TIMEOUT_MS", defaults.response_timeout_ms)?;
    let settle_delay_ms = parse_u64("DTSCAN_SETTLE_DELAY_MS", defaults.settle_delay_ms)?;
    let continuous_pause_secs =
        parse_u64("DTSCAN_CONTINUOUS_PAUSE_SECS", defaults.continuous_pause_secs)?;
    let max_center_restarts =
        parse_u32("DTSCAN_MAX_CENTER_RESTARTS", defaults.max_center_restarts)?;

    Ok(AppConfig {
        log_level,
        booking_base_url,
        entry_url,
        release_url,
        devtools_port,
        rate_per_second,
        rate_limit_login,
        retry_delay_ms,
        response_timeout_ms,
        settle_delay_ms,
        continuous_pause_secs,
        max_center_restarts,
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
