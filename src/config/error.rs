use std::path::PathBuf;

use thiserror::Error;

use super::loader::Format;
use crate::content::TransformError;
use crate::endpoint::EndpointKind;
use crate::retry::PersistError;

/// Configuration loading or validation error.
///
/// Any of these aborts the load; no partial configuration is installed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} configuration: {message}")]
    Parse { format: Format, message: String },

    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(String),

    #[error("pattern {index} failed to compile: {source}")]
    PatternCompile {
        index: usize,
        #[source]
        source: regex::Error,
    },

    #[error("mapping for '{number}' references endpoint {endpoint}, but only {count} endpoints are configured")]
    InvalidMapping {
        number: String,
        endpoint: usize,
        count: usize,
    },

    #[error("destination '{0}' is mapped more than once")]
    DuplicateMapping(String),

    #[error("endpoint {index}: no custom endpoint registered as '{name}'")]
    UnknownCustomEndpoint { index: usize, name: String },

    #[error("endpoint {index}: no queue message factory registered as '{name}'")]
    UnknownMessageFactory { index: usize, name: String },

    #[error("endpoint {index}: {kind} endpoints are not supported by this build")]
    UnsupportedEndpoint { index: usize, kind: EndpointKind },

    #[error("endpoint {index}: invalid retry directory: {source}")]
    RetryDir {
        index: usize,
        #[source]
        source: PersistError,
    },

    #[error("invalid content configuration: {0}")]
    Content(#[source] TransformError),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
