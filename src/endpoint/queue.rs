//! AMQP 0-9-1 queue endpoint.
//!
//! One connection is opened during network init and shared; every delivery
//! opens its own channel, publishes with confirms enabled and closes it.
//! The published body and properties come from a [`MessageFactory`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info, warn};

use super::{DeliveryError, EndpointKind, Transport};
use crate::config::QueueEndpointConfig;

const PERSISTENT_DELIVERY: u8 = 2;

/// Name the built-in [`TextMessageFactory`] is selected by.
pub const TEXT_MESSAGE_FACTORY: &str = "text";

/// Body and properties of one publish.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: Vec<u8>,
    pub properties: BasicProperties,
}

/// Turns a rendered payload into the message published for it.
pub trait MessageFactory: Send + Sync + fmt::Debug {
    fn create(&self, payload: &str) -> Result<QueueMessage, DeliveryError>;
}

/// UTF-8 text body tagged with the endpoint's content type.
#[derive(Debug, Clone)]
pub struct TextMessageFactory {
    content_type: String,
}

impl TextMessageFactory {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
        }
    }
}

impl MessageFactory for TextMessageFactory {
    fn create(&self, payload: &str) -> Result<QueueMessage, DeliveryError> {
        Ok(QueueMessage {
            body: payload.as_bytes().to_vec(),
            properties: BasicProperties::default()
                .with_content_type(self.content_type.clone().into()),
        })
    }
}

/// Publishes payloads to a queue through the default exchange.
pub struct QueueEndpoint {
    config: QueueEndpointConfig,
    factory: Arc<dyn MessageFactory>,
    connection: OnceLock<Connection>,
}

impl fmt::Debug for QueueEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEndpoint")
            .field("queue", &self.config.queue)
            .field("persistent", &self.config.persistent)
            .field("message_factory", &self.config.message_factory)
            .field("connected", &self.connection.get().is_some())
            .finish()
    }
}

impl QueueEndpoint {
    pub fn new(config: &QueueEndpointConfig, factory: Arc<dyn MessageFactory>) -> Self {
        Self {
            config: config.clone(),
            factory,
            connection: OnceLock::new(),
        }
    }

    /// Build the message for `payload`; persistence is the endpoint's call.
    fn message(&self, payload: &str) -> Result<QueueMessage, DeliveryError> {
        let mut message = self.factory.create(payload)?;
        if self.config.persistent {
            message.properties = message.properties.with_delivery_mode(PERSISTENT_DELIVERY);
        }
        Ok(message)
    }

    async fn publish(
        &self,
        channel: &Channel,
        message: QueueMessage,
    ) -> Result<Confirmation, DeliveryError> {
        channel.confirm_select(ConfirmSelectOptions::default()).await?;
        let confirmation = channel
            .basic_publish(
                "",
                &self.config.queue,
                BasicPublishOptions::default(),
                &message.body,
                message.properties,
            )
            .await?
            .await?;
        Ok(confirmation)
    }
}

#[async_trait]
impl Transport for QueueEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Queue
    }

    async fn init_network_resources(&self) -> Result<(), DeliveryError> {
        let connection =
            Connection::connect(&self.config.uri, ConnectionProperties::default()).await?;

        if self.config.declare {
            let channel = connection.create_channel().await?;
            let declared = channel
                .queue_declare(
                    &self.config.queue,
                    QueueDeclareOptions {
                        durable: self.config.persistent,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await;
            let closed = channel.close(200, "OK").await;
            declared?;
            closed?;
        }

        if self.connection.set(connection).is_err() {
            debug!(queue = %self.config.queue, "AMQP connection already set");
        }
        info!(queue = %self.config.queue, "AMQP connection established");
        Ok(())
    }

    async fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        let connection = self
            .connection
            .get()
            .ok_or_else(|| DeliveryError::NotReady(format!("queue {}", self.config.queue)))?;

        let message = self.message(payload)?;
        let bytes = message.body.len();

        let channel = connection.create_channel().await?;
        let published = self.publish(&channel, message).await;
        if let Err(e) = channel.close(200, "OK").await {
            warn!(queue = %self.config.queue, error = %e, "failed to close AMQP channel");
        }
        let confirmation = published?;

        if confirmation.is_nack() {
            return Err(DeliveryError::Rejected(format!(
                "broker nacked publish to {}",
                self.config.queue
            )));
        }

        debug!(queue = %self.config.queue, bytes, "published");
        Ok(())
    }
}
