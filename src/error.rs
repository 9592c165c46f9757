//! Custom error types for the application.
//!
//! This module defines the primary error type, `DashError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures a track board can hit, from configuration issues to
//! GPIO, RFID and Bigtable problems.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   TOML file or environment overrides.
//! - **`Configuration`**: Semantic errors that pass parsing but are logically wrong
//!   (duplicate pins, zero timing windows, missing project id).
//! - **`Hardware`** / **`Rfid`**: Failures reading a GPIO pin or talking to the reader.
//! - **`Http`** / **`Api`**: Transport failures and non-success responses from Bigtable.
//! - **`Registry`**: Malformed side assignments in the address registry.
//!
//! None of these are caught inside the polling loop. The first error ends the run,
//! pins are released, and the process exits.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type DashResult<T> = std::result::Result<T, DashError>;

/// Errors produced by the beam-break bridge.
#[derive(Error, Debug)]
pub enum DashError {
    /// Configuration could not be loaded or extracted
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O error from the operating system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// GPIO pin could not be configured or read
    #[error("Hardware error on pin {pin}: {message}")]
    Hardware {
        /// BCM pin number
        pin: u8,
        /// Underlying failure
        message: String,
    },

    /// RFID reader failure
    #[error("RFID reader error: {0}")]
    Rfid(String),

    /// HTTP transport failure talking to Bigtable
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Bigtable answered with a non-success status
    #[error("Bigtable API error ({status}) on {table}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Table the request targeted
        table: String,
        /// Response body
        message: String,
    },

    /// A response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Registry row holds something other than a side index
    #[error("Registry error for '{key}': {message}")]
    Registry {
        /// Registry row key
        key: String,
        /// What was wrong
        message: String,
    },
}

impl From<figment::Error> for DashError {
    fn from(value: figment::Error) -> Self {
        DashError::Config(Box::new(value))
    }
}

impl From<base64::DecodeError> for DashError {
    fn from(value: base64::DecodeError) -> Self {
        DashError::Decode(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_mentions_table_and_status() {
        let err = DashError::Api {
            status: 404,
            table: "races".into(),
            message: "table not found".into(),
        };
        let text = err.to_string();
        assert!(text.contains("404"));
        assert!(text.contains("races"));
    }

    #[test]
    fn hardware_error_mentions_pin() {
        let err = DashError::Hardware {
            pin: 19,
            message: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "Hardware error on pin 19: permission denied"
        );
    }

    #[test]
    fn base64_errors_become_decode_errors() {
        use base64::Engine;
        let err = base64::engine::general_purpose::STANDARD
            .decode("not base64!!")
            .unwrap_err();
        let dash: DashError = err.into();
        assert!(matches!(dash, DashError::Decode(_)));
    }
}
