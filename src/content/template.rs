//! Placeholder templates rendered against a [`CanonicalDocument`].
//!
//! Syntax is plain text with `{{ field }}` placeholders. A placeholder may
//! carry one filter:
//!
//! - `{{ message | xml }}` escapes the value for XML content
//! - `{{ message | json }}` emits the value as a quoted JSON string
//!
//! Field names are checked when the template is parsed.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::document::{escape_xml, CanonicalDocument};
use super::{ContentRenderer, TransformError};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Raw,
    Xml,
    Json,
}

impl Filter {
    fn parse(name: &str) -> Result<Self, TransformError> {
        match name {
            "xml" => Ok(Filter::Xml),
            "json" => Ok(Filter::Json),
            other => Err(TransformError::UnknownFilter(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { name: String, filter: Filter },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text.
    pub fn parse(source: &str) -> Result<Self, TransformError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }

            let body = &rest[start + 2..];
            let end = body.find("}}").ok_or_else(|| TransformError::Parse {
                offset: offset + start,
                reason: "unclosed placeholder".to_string(),
            })?;

            let expr = body[..end].trim();
            let (name, filter) = match expr.split_once('|') {
                Some((name, filter)) => (name.trim(), Filter::parse(filter.trim())?),
                None => (expr, Filter::Raw),
            };

            if name.is_empty() {
                return Err(TransformError::Parse {
                    offset: offset + start,
                    reason: "empty placeholder".to_string(),
                });
            }
            if !CanonicalDocument::has_field(name) {
                return Err(TransformError::UnknownField(name.to_string()));
            }

            segments.push(Segment::Field {
                name: name.to_string(),
                filter,
            });

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Render against a document.
    pub fn render(&self, doc: &CanonicalDocument) -> Result<String, TransformError> {
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { name, filter } => {
                    let value = doc
                        .field(name)
                        .ok_or_else(|| TransformError::UnknownField(name.clone()))?;
                    match filter {
                        Filter::Raw => out.push_str(&value),
                        Filter::Xml => out.push_str(&escape_xml(&value)),
                        Filter::Json => out.push_str(&serde_json::to_string(&value)?),
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Where a template's text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Inline(String),
    File(PathBuf),
    /// Fetched over HTTP(S) during network init.
    Url(String),
}

/// Renderer backed by a [`Template`].
#[derive(Debug)]
pub struct TemplateRenderer {
    source: TemplateSource,
    template: OnceLock<Template>,
}

impl TemplateRenderer {
    /// Create a renderer. Inline and file templates are loaded immediately.
    pub fn new(source: TemplateSource) -> Result<Self, TransformError> {
        let template = OnceLock::new();

        match &source {
            TemplateSource::Inline(text) => {
                let _ = template.set(Template::parse(text)?);
            }
            TemplateSource::File(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| TransformError::Read {
                    path: path.clone(),
                    source: e,
                })?;
                let _ = template.set(Template::parse(&text)?);
                debug!(path = %path.display(), "template loaded");
            }
            TemplateSource::Url(_) => {}
        }

        Ok(Self { source, template })
    }

    /// Whether the template text is available.
    pub fn is_ready(&self) -> bool {
        self.template.get().is_some()
    }
}

#[async_trait]
impl ContentRenderer for TemplateRenderer {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn init_network_resources(&self) -> Result<(), TransformError> {
        let TemplateSource::Url(url) = &self.source else {
            return Ok(());
        };
        if self.is_ready() {
            return Ok(());
        }

        let fetch = |source: reqwest::Error| TransformError::Fetch {
            url: url.clone(),
            source,
        };

        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(fetch)?;
        let text = client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(fetch)?
            .text()
            .await
            .map_err(fetch)?;

        let _ = self.template.set(Template::parse(&text)?);
        info!(url = %url, bytes = text.len(), "template fetched");
        Ok(())
    }

    fn render(&self, doc: &CanonicalDocument) -> Result<String, TransformError> {
        self.template
            .get()
            .ok_or(TransformError::NotReady)?
            .render(doc)
    }
}
