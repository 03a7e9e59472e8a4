use thiserror::Error;

/// Startup configuration failures. These are fatal: both binaries exit 1
/// when configuration does not validate.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Returned when a string is not a recognized severity level.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown severity: {0}")]
pub struct SeverityParseError(pub String);
