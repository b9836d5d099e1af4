//! Error types for the exporter
//!
//! Configuration errors are fatal at startup. Everything raised while talking
//! to OpenCost or applying its data is recoverable: the current scrape cycle
//! aborts and the next tick retries.

use thiserror::Error;

/// Result alias used across the exporter library
pub type Result<T> = std::result::Result<T, ExporterError>;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("{0} is required")]
    MissingSetting(&'static str),

    #[error("{0} is set but empty")]
    EmptyList(&'static str),

    #[error("invalid {key} {value:?}: {source}")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid {key} {value:?}: {reason}")]
    InvalidSetting {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid OPENCOST_URL {value:?}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to read configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} http status {status}")]
    HttpStatus {
        endpoint: &'static str,
        status: u16,
    },

    #[error("{endpoint} response code {code}")]
    ResponseCode { endpoint: &'static str, code: i64 },

    #[error("{endpoint} response decode failed: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid day {day:?} for {family}: {source}")]
    InvalidDay {
        day: String,
        family: &'static str,
        #[source]
        source: chrono::ParseError,
    },

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ExporterError {
    /// Errors that should stop the process instead of failing a single cycle
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExporterError::MissingSetting(_)
                | ExporterError::EmptyList(_)
                | ExporterError::InvalidDuration { .. }
                | ExporterError::InvalidSetting { .. }
                | ExporterError::InvalidUrl { .. }
                | ExporterError::Config(_)
                | ExporterError::Metrics(_)
        )
    }
}
