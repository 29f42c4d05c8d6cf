use std::fmt;
use std::fs;
use std::path::Path;

use chrono_tz::Tz;
use tracing::{debug, info};

use super::error::ConfigError;
use super::types::{DispatchConfig, RendererConfig, TransportConfig};
use crate::dispatch::HandleCode;
use crate::retry::MAX_RETRY_INTERVAL;
use crate::router::{PatternMatcher, RouteTable};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(Format::Yaml),
            Some("json") => Ok(Format::Json),
            Some(other) => Err(ConfigError::UnsupportedFormat(other.to_string())),
            None => Err(ConfigError::UnsupportedFormat(String::new())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Yaml => f.write_str("YAML"),
            Format::Json => f.write_str("JSON"),
        }
    }
}

impl DispatchConfig {
    /// Load and validate configuration from a YAML or JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML or JSON file without validating it
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = Format::from_path(path)?;

        debug!(path = %path.display(), %format, "loading configuration");

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::decode(&contents, format)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str, format: Format) -> Result<Self, ConfigError> {
        let config = Self::decode(contents, format)?;
        config.validate()?;
        Ok(config)
    }

    fn decode(contents: &str, format: Format) -> Result<Self, ConfigError> {
        match format {
            Format::Yaml => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format,
                message: e.to_string(),
            }),
            Format::Json => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format,
                message: e.to_string(),
            }),
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse(yaml, Format::Yaml)
    }

    /// Validate configuration without touching the filesystem or network
    pub fn validate(&self) -> Result<(), ConfigError> {
        HandleCode::try_from(self.return_value)?;

        if self.retry_root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("retry_root", "must not be empty"));
        }

        PatternMatcher::compile(&self.patterns)?;

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let field = |name: &str| format!("endpoints[{index}].{name}");

            if endpoint.retry_interval.is_zero() {
                return Err(ConfigError::invalid(field("retry_interval"), "must be positive"));
            }
            if endpoint.retry_interval > MAX_RETRY_INTERVAL {
                return Err(ConfigError::invalid(
                    field("retry_interval"),
                    format!(
                        "must not exceed {}",
                        humantime::format_duration(MAX_RETRY_INTERVAL)
                    ),
                ));
            }

            match &endpoint.transport {
                TransportConfig::Log(log) => {
                    if !(0.0..=1.0).contains(&log.fail_rate) {
                        return Err(ConfigError::invalid(
                            field("fail_rate"),
                            format!("{} is outside 0..=1", log.fail_rate),
                        ));
                    }
                }
                TransportConfig::Queue(queue) => {
                    if queue.uri.is_empty() {
                        return Err(ConfigError::invalid(field("uri"), "must not be empty"));
                    }
                    if queue.queue.is_empty() {
                        return Err(ConfigError::invalid(field("queue"), "must not be empty"));
                    }
                    if queue.message_factory.is_empty() {
                        return Err(ConfigError::invalid(
                            field("message_factory"),
                            "must not be empty",
                        ));
                    }
                }
                TransportConfig::Web(web) => {
                    if !(web.url.starts_with("http://") || web.url.starts_with("https://")) {
                        return Err(ConfigError::invalid(
                            field("url"),
                            format!("'{}' is not an http(s) URL", web.url),
                        ));
                    }
                    if reqwest::Method::from_bytes(web.method.as_bytes()).is_err() {
                        return Err(ConfigError::invalid(
                            field("method"),
                            format!("'{}' is not an HTTP method", web.method),
                        ));
                    }
                }
                TransportConfig::Custom(custom) => {
                    if custom.name.is_empty() {
                        return Err(ConfigError::invalid(field("name"), "must not be empty"));
                    }
                }
            }
        }

        RouteTable::build(&self.mappings, self.endpoints.len())?;

        if self.content.timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::invalid(
                "content.timezone",
                format!("unknown zone '{}'", self.content.timezone),
            ));
        }

        if let RendererConfig::Template {
            template,
            path,
            url,
        } = &self.content.renderer
        {
            let sources =
                template.is_some() as usize + path.is_some() as usize + url.is_some() as usize;
            if sources != 1 {
                return Err(ConfigError::invalid(
                    "content",
                    "exactly one of template, path or url is required",
                ));
            }
        }

        info!(
            patterns = self.patterns.len(),
            endpoints = self.endpoints.len(),
            mappings = self.mappings.len(),
            "configuration validated successfully"
        );
        Ok(())
    }
}
