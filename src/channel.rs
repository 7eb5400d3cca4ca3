//! The channel seam between the engine and the AMQP transport.
//!
//! The redelivery engine talks to a [`Channel`] trait object rather than to
//! `lapin` directly, so the decision procedure can be exercised against an
//! in-memory channel in tests. [`AmqpChannel`] is the production
//! implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};

use crate::error::ClientError;
use crate::message::InboundMessage;

/// Stream of deliveries for one consumer registration. Ends when the broker
/// cancels the consumer; a transport fault surfaces as an `Err` item.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<InboundMessage, ClientError>> + Send>>;

/// Messaging primitives required by the consumer and producer.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Caps the number of unacknowledged deliveries in flight.
    async fn set_prefetch(&self, count: u16) -> Result<(), ClientError>;

    /// Acknowledges one delivery.
    async fn ack(&self, message: &InboundMessage) -> Result<(), ClientError>;

    /// Rejects one delivery; `requeue = false` discards it.
    async fn reject(&self, message: &InboundMessage, requeue: bool) -> Result<(), ClientError>;

    /// Publishes a payload with the given headers.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: FieldTable,
    ) -> Result<(), ClientError>;

    /// Declares a durable exchange of the given kind.
    async fn declare_exchange(&self, name: &str, kind: &str) -> Result<(), ClientError>;

    /// Registers a consumer on `queue` and returns its delivery stream.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<MessageStream, ClientError>;
}

/// `lapin`-backed [`Channel`] over one connection and one AMQP channel.
pub struct AmqpChannel {
    // Held so the connection outlives the channel.
    _connection: Connection,
    channel: lapin::Channel,
}

impl AmqpChannel {
    /// Connects to the broker and opens a channel.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        log::info!("connected to AMQP broker at '{url}'");
        Ok(Self { _connection: connection, channel })
    }

    fn exchange_kind(kind: &str) -> ExchangeKind {
        match kind {
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "headers" => ExchangeKind::Headers,
            "topic" => ExchangeKind::Topic,
            custom => ExchangeKind::Custom(custom.to_string()),
        }
    }
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn set_prefetch(&self, count: u16) -> Result<(), ClientError> {
        self.channel.basic_qos(count, BasicQosOptions::default()).await?;
        Ok(())
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), ClientError> {
        self.channel
            .basic_ack(message.delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn reject(&self, message: &InboundMessage, requeue: bool) -> Result<(), ClientError> {
        self.channel
            .basic_nack(
                message.delivery_tag,
                BasicNackOptions { requeue, ..Default::default() },
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: FieldTable,
    ) -> Result<(), ClientError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_headers(headers),
            )
            .await?;
        Ok(())
    }

    async fn declare_exchange(&self, name: &str, kind: &str) -> Result<(), ClientError> {
        self.channel
            .exchange_declare(
                name,
                Self::exchange_kind(kind),
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<MessageStream, ClientError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let stream = consumer
            .map(|delivery| delivery.map(InboundMessage::from).map_err(ClientError::from));
        Ok(Box::pin(stream))
    }
}
