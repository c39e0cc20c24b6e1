//! Merging command-line flags over the options file.

use anyhow::Context;
use dtscan_core::{
    load_options_file, parse_location, validate_expiry_date, validate_license_number,
    ConfigError, LicenseClass, OptionsFile, ScraperOptions,
};

use crate::Cli;

const DEFAULT_RADIUS_KM: f64 = 20.0;

/// Build the full option set: flags win over the options file, which wins
/// over built-in defaults.
///
/// # Errors
///
/// Fails if the options file exists but cannot be read, a value from it is
/// malformed, or a required option is missing from both sources.
pub(crate) fn resolve(cli: &Cli) -> anyhow::Result<ScraperOptions> {
    let file = if cli.config.exists() {
        load_options_file(&cli.config)
            .with_context(|| format!("reading {}", cli.config.display()))?
    } else {
        tracing::warn!(path = %cli.config.display(), "options file not found; using flags only");
        OptionsFile::default()
    };
    merge(cli, file)
}

pub(crate) fn merge(cli: &Cli, file: OptionsFile) -> anyhow::Result<ScraperOptions> {
    let origin = match (cli.location, file.location.as_deref()) {
        (Some(origin), _) => origin,
        (None, Some(raw)) => parse_location(raw)?,
        (None, None) => anyhow::bail!(
            "a location is required: pass --location <latitude,longitude> or set \"location\" in {}",
            cli.config.display()
        ),
    };

    let license_class: LicenseClass = cli.license_type.or(file.license_type).ok_or_else(|| {
        anyhow::anyhow!(
            "a licence type is required: pass --license-type or set \"licenseType\" in {}",
            cli.config.display()
        )
    })?;

    let email = cli.email.clone().or(file.email);
    let license_number = cli
        .license_number
        .clone()
        .or(file.license_number)
        .map(|n| validate_license_number(&n))
        .transpose()?;
    let license_expiry = cli
        .license_expiry
        .clone()
        .or(file.license_expiry)
        .map(|d| validate_expiry_date(&d))
        .transpose()?;

    let radius_km = cli
        .radius
        .map(f64::from)
        .or(file.radius)
        .unwrap_or(DEFAULT_RADIUS_KM);
    let months = cli
        .months
        .or(file.months)
        .unwrap_or(dtscan_core::options::DEFAULT_MONTHS)
        .min(dtscan_core::options::MAX_MONTHS);

    let options = ScraperOptions {
        email,
        license_number,
        license_expiry,
        license_class: Some(license_class),
        radius_km: Some(radius_km),
        origin: Some(origin),
        months: Some(months),
        chromium_path: cli.chromium_path.clone().or(file.chromium_path),
        continuous: cli.continuous,
    };

    if options.login_details().is_none() {
        return Err(ConfigError::Validation(format!(
            "email, licence number and licence expiry must all be set, by flag or in {}",
            cli.config.display()
        ))
        .into());
    }
    Ok(options)
}
