//! Error types for body capture.
//!
//! Only configuration loading and explicit rendering surface these errors.
//! The capture paths driven by intercepted I/O never return them to the
//! instrumented code; they are logged and the body is simply not captured.

use thiserror::Error;

/// Errors produced by the capture engine.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Configuration values are inconsistent.
    #[error("Invalid data capture config: {details}")]
    Config {
        /// What was wrong
        details: String,
    },

    /// Config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    ConfigIo {
        /// Path that was read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config document could not be parsed.
    #[error("Config parse error: {details}")]
    ConfigParse {
        /// Parser message
        details: String,
    },

    /// Captured bytes are not valid in the resolved charset.
    #[error("Cannot decode captured body as {charset}: {reason}")]
    Decode {
        /// Charset name used for decoding
        charset: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Reading the remainder of a stream during a forced drain failed.
    #[error("Forced drain failed: {0}")]
    Drain(#[from] std::io::Error),
}

impl CaptureError {
    /// Short label used for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Config { .. } => "config",
            CaptureError::ConfigIo { .. } => "config_io",
            CaptureError::ConfigParse { .. } => "config_parse",
            CaptureError::Decode { .. } => "decode",
            CaptureError::Drain(_) => "drain",
        }
    }
}

/// Convenience alias for results carrying [`CaptureError`].
pub type Result<T> = std::result::Result<T, CaptureError>;
