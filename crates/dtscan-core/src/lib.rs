pub mod app_config;
pub mod config;
pub mod geo;
pub mod license;
pub mod options;
pub mod store;

use thiserror::Error;

pub use app_config::AppConfig;
pub use config::{load_app_config, load_app_config_from_env};
pub use geo::{distance_km, is_in_license_range, Coordinates};
pub use license::LicenseClass;
pub use options::{
    load_options_file, parse_bounded_int, parse_location, validate_expiry_date,
    validate_license_number, LoginDetails, OptionsFile, ScraperOptions, SearchParameters,
};
pub use store::SearchConfigStore;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read options file {path}: {source}")]
    OptionsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse options file: {0}")]
    OptionsFileParse(#[source] serde_yaml::Error),

    #[error("invalid option: {0}")]
    Validation(String),
}
