//! Error types for settings handling.

use thiserror::Error;

/// Errors raised while loading or validating [`crate::Settings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Config source could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(String),

    /// A setting has an out-of-range value
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for SettingsError {
    fn from(err: config::ConfigError) -> Self {
        SettingsError::Config(err.to_string())
    }
}
