//! HTTP endpoint.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use tracing::{debug, warn};

use super::{DeliveryError, EndpointKind, Transport};
use crate::config::{ConfigError, WebEndpointConfig};

/// Sends each payload as the body of one HTTP request.
///
/// Any 2xx answer counts as delivered.
pub struct WebEndpoint {
    url: String,
    method: Method,
    headers: HeaderMap,
    timeout: Duration,
    client: OnceLock<Client>,
}

impl fmt::Debug for WebEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebEndpoint")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WebEndpoint {
    pub fn new(config: &WebEndpointConfig) -> Result<Self, ConfigError> {
        let method = Method::from_bytes(config.method.as_bytes()).map_err(|_| {
            ConfigError::invalid("method", format!("'{}' is not an HTTP method", config.method))
        })?;

        let mut headers = HeaderMap::new();
        let content_type = HeaderValue::from_str(&config.content_type)
            .map_err(|e| ConfigError::invalid("content_type", e.to_string()))?;
        headers.insert(CONTENT_TYPE, content_type);

        for (key, value) in &config.headers {
            let invalid = |e: &dyn fmt::Display| {
                ConfigError::invalid(format!("headers.{key}"), e.to_string())
            };
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| invalid(&e))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
            headers.insert(name, value);
        }

        Ok(Self {
            url: config.url.clone(),
            method,
            headers,
            timeout: config.timeout,
            client: OnceLock::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Web
    }

    async fn init_network_resources(&self) -> Result<(), DeliveryError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .default_headers(self.headers.clone())
            .build()
            .map_err(|e| DeliveryError::Init(format!("failed to create HTTP client: {e}")))?;

        let _ = self.client.set(client);
        debug!(url = %self.url, "HTTP client ready");
        Ok(())
    }

    async fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        let client = self
            .client
            .get()
            .ok_or_else(|| DeliveryError::NotReady(self.url.clone()))?;

        let response = client
            .request(self.method.clone(), &self.url)
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = %status, "HTTP endpoint rejected payload");
            return Err(DeliveryError::Status {
                status: status.as_u16(),
            });
        }

        debug!(url = %self.url, status = %status, bytes = payload.len(), "delivered over HTTP");
        Ok(())
    }
}
