//! Content rendering.
//!
//! Every inbound message is first turned into a [`CanonicalDocument`]; a
//! [`ContentRenderer`] then produces the payload string handed to the
//! endpoint. Without a configured renderer the canonical XML is the payload.

mod document;
mod template;

pub use document::{escape_xml, CanonicalDocument};
pub use template::{Template, TemplateRenderer, TemplateSource};

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, RendererConfig};

/// Failure to turn a document into a payload.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("template parse error at byte {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("unknown template field '{0}'")]
    UnknownField(String),

    #[error("unknown template filter '{0}'")]
    UnknownFilter(String),

    #[error("template has not been loaded")]
    NotReady,

    #[error("failed to read template {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch template from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Converts a canonical document into a delivery payload.
#[async_trait]
pub trait ContentRenderer: Send + Sync + Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Acquire remote resources (for example a template URL). Called once.
    async fn init_network_resources(&self) -> Result<(), TransformError> {
        Ok(())
    }

    fn render(&self, doc: &CanonicalDocument) -> Result<String, TransformError>;
}

/// Emits the canonical XML unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRenderer;

#[async_trait]
impl ContentRenderer for IdentityRenderer {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn render(&self, doc: &CanonicalDocument) -> Result<String, TransformError> {
        Ok(doc.to_xml())
    }
}

/// Emits the document as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRenderer;

#[async_trait]
impl ContentRenderer for JsonRenderer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn render(&self, doc: &CanonicalDocument) -> Result<String, TransformError> {
        Ok(serde_json::to_string(doc)?)
    }
}

/// Build the renderer described by configuration.
pub fn build_renderer(config: &RendererConfig) -> Result<Arc<dyn ContentRenderer>, ConfigError> {
    let renderer: Arc<dyn ContentRenderer> = match config {
        RendererConfig::Identity => Arc::new(IdentityRenderer),
        RendererConfig::Json => Arc::new(JsonRenderer),
        RendererConfig::Template {
            template,
            path,
            url,
        } => {
            let source = match (template, path, url) {
                (Some(text), None, None) => TemplateSource::Inline(text.clone()),
                (None, Some(path), None) => TemplateSource::File(path.clone()),
                (None, None, Some(url)) => TemplateSource::Url(url.clone()),
                _ => {
                    return Err(ConfigError::invalid(
                        "content",
                        "exactly one of template, path or url is required",
                    ))
                }
            };
            Arc::new(TemplateRenderer::new(source).map_err(ConfigError::Content)?)
        }
    };
    Ok(renderer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ShortMessage;
    use chrono::Utc;
    use chrono_tz::Tz;

    fn doc() -> CanonicalDocument {
        let msg = ShortMessage::new("1617", "1603", "HELP");
        CanonicalDocument::from_message(&msg, Utc::now(), Tz::UTC)
    }

    #[test]
    fn test_identity_is_canonical_xml() {
        let doc = doc();
        assert_eq!(IdentityRenderer.render(&doc).unwrap(), doc.to_xml());
    }

    #[test]
    fn test_json_renderer() {
        let out = JsonRenderer.render(&doc()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["message"], "HELP");
        assert_eq!(value["destination_address"], "1603");
    }

    #[test]
    fn test_build_template_needs_one_source() {
        let config = RendererConfig::Template {
            template: Some("x".into()),
            path: None,
            url: Some("http://localhost/x".into()),
        };
        assert!(build_renderer(&config).is_err());

        let config = RendererConfig::Template {
            template: None,
            path: None,
            url: None,
        };
        assert!(build_renderer(&config).is_err());
    }

    #[test]
    fn test_build_inline_template() {
        let config = RendererConfig::Template {
            template: Some("{{ message }}!".into()),
            path: None,
            url: None,
        };
        let renderer = build_renderer(&config).unwrap();
        assert_eq!(renderer.name(), "template");
        assert_eq!(renderer.render(&doc()).unwrap(), "HELP!");
    }

    #[test]
    fn test_bad_inline_template_fails_build() {
        let config = RendererConfig::Template {
            template: Some("{{ nope }}".into()),
            path: None,
            url: None,
        };
        assert!(matches!(
            build_renderer(&config),
            Err(ConfigError::Content(TransformError::UnknownField(_)))
        ));
    }
}
