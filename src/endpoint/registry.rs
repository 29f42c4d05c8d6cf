//! Transport construction, including named custom transports and queue
//! message factories.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{LogEndpoint, Transport, WebEndpoint};
#[cfg(feature = "amqp")]
use super::{MessageFactory, TextMessageFactory, TEXT_MESSAGE_FACTORY};
#[cfg(feature = "amqp")]
use crate::config::QueueEndpointConfig;
use crate::config::{ConfigError, CustomEndpointConfig, TransportConfig};

/// Builds a custom transport from its configuration.
pub type TransportFactory =
    Arc<dyn Fn(&CustomEndpointConfig) -> Result<Arc<dyn Transport>, ConfigError> + Send + Sync>;

/// Builds the message factory a queue endpoint publishes through.
#[cfg(feature = "amqp")]
pub type MessageFactoryBuilder = Arc<
    dyn Fn(&QueueEndpointConfig) -> Result<Arc<dyn MessageFactory>, ConfigError> + Send + Sync,
>;

/// Named factories for `custom` endpoints and queue messages.
///
/// Built-in transports and the `text` message factory need no registration.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    factories: HashMap<String, TransportFactory>,
    #[cfg(feature = "amqp")]
    message_factories: HashMap<String, MessageFactoryBuilder>,
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        let mut debug = f.debug_struct("EndpointRegistry");
        debug.field("custom", &names);
        #[cfg(feature = "amqp")]
        {
            let mut messages: Vec<_> = self.message_factories.keys().collect();
            messages.sort();
            debug.field("message_factories", &messages);
        }
        debug.finish()
    }
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&CustomEndpointConfig) -> Result<Arc<dyn Transport>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        debug!(name = %name, "custom endpoint registered");
        self.factories.insert(name, Arc::new(factory));
        self
    }

    /// Register an existing transport instance under `name`.
    pub fn register_instance(
        &mut self,
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> &mut Self {
        self.register(name, move |_| Ok(transport.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Register a queue message factory under `name`, replacing any previous
    /// one. Registering `text` overrides the built-in.
    #[cfg(feature = "amqp")]
    pub fn register_message_factory<F>(&mut self, name: impl Into<String>, builder: F) -> &mut Self
    where
        F: Fn(&QueueEndpointConfig) -> Result<Arc<dyn MessageFactory>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        debug!(name = %name, "queue message factory registered");
        self.message_factories.insert(name, Arc::new(builder));
        self
    }

    /// Resolve the message factory named by a queue endpoint.
    #[cfg(feature = "amqp")]
    pub fn message_factory(
        &self,
        index: usize,
        config: &QueueEndpointConfig,
    ) -> Result<Arc<dyn MessageFactory>, ConfigError> {
        match self.message_factories.get(&config.message_factory) {
            Some(builder) => builder(config),
            None if config.message_factory == TEXT_MESSAGE_FACTORY => {
                Ok(Arc::new(TextMessageFactory::new(&config.content_type)))
            }
            None => Err(ConfigError::UnknownMessageFactory {
                index,
                name: config.message_factory.clone(),
            }),
        }
    }

    /// Create the transport for endpoint `index`.
    pub fn build_transport(
        &self,
        index: usize,
        config: &TransportConfig,
    ) -> Result<Arc<dyn Transport>, ConfigError> {
        let transport: Arc<dyn Transport> = match config {
            TransportConfig::Log(cfg) => Arc::new(LogEndpoint::new(cfg)),
            TransportConfig::Web(cfg) => Arc::new(WebEndpoint::new(cfg)?),
            #[cfg(feature = "amqp")]
            TransportConfig::Queue(cfg) => {
                Arc::new(super::QueueEndpoint::new(cfg, self.message_factory(index, cfg)?))
            }
            #[cfg(not(feature = "amqp"))]
            TransportConfig::Queue(_) => {
                return Err(ConfigError::UnsupportedEndpoint {
                    index,
                    kind: super::EndpointKind::Queue,
                })
            }
            TransportConfig::Custom(cfg) => {
                let factory = self.factories.get(&cfg.name).ok_or_else(|| {
                    ConfigError::UnknownCustomEndpoint {
                        index,
                        name: cfg.name.clone(),
                    }
                })?;
                factory(cfg)?
            }
        };
        Ok(transport)
    }
}
