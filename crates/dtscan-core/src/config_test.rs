use std::collections::HashMap;
use std::env::VarError;

use super::*;

fn lookup_from_map<'a>(
    map: &'a HashMap<&'a str, &'a str>,
) -> impl Fn(&str) -> Result<String, VarError> + 'a {
    move |key| {
        map.get(key)
            .map(|v| (*v).to_string())
            .ok_or(VarError::NotPresent)
    }
}

#[test]
fn build_app_config_uses_defaults_when_env_is_empty() {
    let map: HashMap<&str, &str> = HashMap::new();
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert_eq!(cfg, AppConfig::default());
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.booking_base_url, "https://drivetest.ca/booking/v1");
    assert_eq!(cfg.rate_per_second, 15);
    assert!(!cfg.rate_limit_login);
    assert_eq!(cfg.retry_delay_ms, 1_000);
    assert_eq!(cfg.response_timeout_ms, 5_000);
    assert_eq!(cfg.settle_delay_ms, 2_000);
    assert_eq!(cfg.continuous_pause_secs, 3);
    assert_eq!(cfg.max_center_restarts, 10);
    assert_eq!(cfg.devtools_port, 9222);
}

#[test]
fn booking_base_url_override_strips_trailing_slash() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_BOOKING_BASE_URL", "http://127.0.0.1:8080/booking/v1/");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert_eq!(cfg.booking_base_url, "http://127.0.0.1:8080/booking/v1");
}

#[test]
fn rate_per_second_override() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_RATE_PER_SECOND", "4");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert_eq!(cfg.rate_per_second, 4);
}

#[test]
fn rate_per_second_zero_is_rejected() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_RATE_PER_SECOND", "0");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "DTSCAN_RATE_PER_SECOND"),
        "expected InvalidEnvVar(DTSCAN_RATE_PER_SECOND), got: {result:?}"
    );
}

#[test]
fn rate_per_second_invalid() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_RATE_PER_SECOND", "fast");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "DTSCAN_RATE_PER_SECOND"),
        "expected InvalidEnvVar(DTSCAN_RATE_PER_SECOND), got: {result:?}"
    );
}

#[test]
fn rate_limit_login_accepts_common_flag_spellings() {
    for raw in ["true", "1", "YES", "on"] {
        let mut map = HashMap::new();
        map.insert("DTSCAN_RATE_LIMIT_LOGIN", raw);
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        assert!(cfg.rate_limit_login, "{raw} should enable login rate limiting");
    }
}

#[test]
fn rate_limit_login_invalid() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_RATE_LIMIT_LOGIN", "maybe");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "DTSCAN_RATE_LIMIT_LOGIN"),
        "expected InvalidEnvVar(DTSCAN_RATE_LIMIT_LOGIN), got: {result:?}"
    );
}

#[test]
fn response_timeout_override() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_RESPONSE_TIMEOUT_MS", "750");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert_eq!(cfg.response_timeout_ms, 750);
}

#[test]
fn settle_delay_invalid() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_SETTLE_DELAY_MS", "-5");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "DTSCAN_SETTLE_DELAY_MS"),
        "expected InvalidEnvVar(DTSCAN_SETTLE_DELAY_MS), got: {result:?}"
    );
}

#[test]
fn max_center_restarts_override() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_MAX_CENTER_RESTARTS", "2");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert_eq!(cfg.max_center_restarts, 2);
}

#[test]
fn devtools_port_out_of_range() {
    let mut map = HashMap::new();
    map.insert("DTSCAN_DEVTOOLS_PORT", "70000");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "DTSCAN_DEVTOOLS_PORT"),
        "expected InvalidEnvVar(DTSCAN_DEVTOOLS_PORT), got: {result:?}"
    );
}
