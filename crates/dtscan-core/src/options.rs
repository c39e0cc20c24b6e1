//! Search options: the record the CLI hands to the engine, the two views the
//! engine reads from it, and the validators applied to user input.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;
use crate::license::LicenseClass;
use crate::ConfigError;

/// Furthest ahead the booking calendar can be paged.
pub const MAX_MONTHS: u32 = 12;

/// Months searched past the current one when none are configured.
pub const DEFAULT_MONTHS: u32 = 6;

static LICENSE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][0-9]{4}-[0-9]{5}-[0-9]{5}$").expect("valid regex"));

static EXPIRY_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}/(0?[1-9]|1[012])/(0?[1-9]|[12][0-9]|3[01])$").expect("valid regex")
});

/// Everything a run needs, as set in one call to
/// [`crate::SearchConfigStore::set_options`].
///
/// Fields are optional so a half-filled record can exist while the CLI merges
/// the options file with flags; the store only publishes its views once the
/// relevant fields are all present.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScraperOptions {
    pub email: Option<String>,
    pub license_number: Option<String>,
    pub license_expiry: Option<String>,
    pub license_class: Option<LicenseClass>,
    pub radius_km: Option<f64>,
    pub origin: Option<Coordinates>,
    pub months: Option<u32>,
    pub chromium_path: Option<PathBuf>,
    pub continuous: bool,
}

impl std::fmt::Debug for ScraperOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperOptions")
            .field("email", &self.email.as_ref().map(|_| "[redacted]"))
            .field(
                "license_number",
                &self.license_number.as_ref().map(|_| "[redacted]"),
            )
            .field(
                "license_expiry",
                &self.license_expiry.as_ref().map(|_| "[redacted]"),
            )
            .field("license_class", &self.license_class)
            .field("radius_km", &self.radius_km)
            .field("origin", &self.origin)
            .field("months", &self.months)
            .field("chromium_path", &self.chromium_path)
            .field("continuous", &self.continuous)
            .finish()
    }
}

impl ScraperOptions {
    /// The login view, if every credential is present and non-empty.
    #[must_use]
    pub fn login_details(&self) -> Option<LoginDetails> {
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).map(str::to_owned);
        Some(LoginDetails {
            email: non_empty(&self.email)?,
            license_number: non_empty(&self.license_number)?,
            license_expiry: non_empty(&self.license_expiry)?,
        })
    }

    /// The search view, if licence class, radius and origin are all set.
    ///
    /// A non-positive radius counts as missing. Unset months fall back to
    /// [`DEFAULT_MONTHS`].
    #[must_use]
    pub fn search_parameters(&self) -> Option<SearchParameters> {
        let radius_km = self.radius_km.filter(|r| *r > 0.0)?;
        Some(SearchParameters {
            license_class: self.license_class?,
            radius_km,
            origin: self.origin?,
            months: self.months.unwrap_or(DEFAULT_MONTHS).min(MAX_MONTHS),
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct LoginDetails {
    pub email: String,
    pub license_number: String,
    pub license_expiry: String,
}

impl std::fmt::Debug for LoginDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginDetails")
            .field("email", &"[redacted]")
            .field("license_number", &"[redacted]")
            .field("license_expiry", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParameters {
    pub license_class: LicenseClass,
    pub radius_km: f64,
    pub origin: Coordinates,
    /// Months to scan beyond the current one.
    pub months: u32,
}

/// Defaults read from `config.json` (or YAML) next to the binary.
///
/// Keys use the camelCase names the original config file used.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsFile {
    pub email: Option<String>,
    pub license_number: Option<String>,
    pub license_expiry: Option<String>,
    pub license_type: Option<LicenseClass>,
    pub radius: Option<f64>,
    pub location: Option<String>,
    pub months: Option<u32>,
    pub chromium_path: Option<PathBuf>,
}

/// Load the options file. JSON is read through the YAML parser, which
/// accepts it as a subset.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_options_file(path: &Path) -> Result<OptionsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::OptionsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_str(&content).map_err(ConfigError::OptionsFileParse)
}

/// Check a driver's licence number has the `A1234-12345-12345` shape.
///
/// # Errors
///
/// Returns `ConfigError::Validation` if the format does not match.
pub fn validate_license_number(value: &str) -> Result<String, ConfigError> {
    if LICENSE_NUMBER_RE.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(ConfigError::Validation(
            "licence number must look like A1234-12345-12345".to_string(),
        ))
    }
}

/// Check a licence expiry date is written `YYYY/MM/DD`.
///
/// # Errors
///
/// Returns `ConfigError::Validation` if the format does not match.
pub fn validate_expiry_date(value: &str) -> Result<String, ConfigError> {
    if EXPIRY_DATE_RE.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(ConfigError::Validation(
            "date must follow format YYYY/MM/DD".to_string(),
        ))
    }
}

/// Parse `"latitude,longitude"`, e.g. `43.6426445,-79.3871645`.
///
/// # Errors
///
/// Returns `ConfigError::Validation` unless there are at least two numeric parts.
pub fn parse_location(value: &str) -> Result<Coordinates, ConfigError> {
    let invalid =
        || ConfigError::Validation("location must follow format <latitude>,<longitude>".to_string());
    let numbers = value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    match numbers.as_slice() {
        [latitude, longitude, ..] if latitude.is_finite() && longitude.is_finite() => {
            Ok(Coordinates::new(*latitude, *longitude))
        }
        _ => Err(invalid()),
    }
}

/// Parse an integer flag, clamping it to `max` when one is given.
///
/// # Errors
///
/// Returns `ConfigError::Validation` naming `name` if `value` is not a number.
pub fn parse_bounded_int(value: &str, name: &str, max: Option<u32>) -> Result<u32, ConfigError> {
    let parsed = value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::Validation(format!("{name} is not a number")))?;
    Ok(max.map_or(parsed, |m| parsed.min(m)))
}
