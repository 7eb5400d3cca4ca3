//! Thin producer: declares its exchange and publishes payloads stamped
//! with the initial attempt counter.

use std::sync::Arc;

use lapin::types::{AMQPValue, FieldTable};

use crate::channel::Channel;
use crate::error::ClientError;
use crate::message::X_ATTEMPT;

/// Configuration for a [`Producer`].
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub exchange_name: String,
    /// AMQP exchange kind, e.g. `"topic"` or `"direct"`.
    pub exchange_type: String,
    pub routing_key: String,
}

impl ProducerConfig {
    pub fn new(
        exchange_name: impl Into<String>,
        exchange_type: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            exchange_type: exchange_type.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Publishes messages to one exchange/routing-key pair.
pub struct Producer {
    channel: Arc<dyn Channel>,
    config: ProducerConfig,
}

impl Producer {
    /// Declares the configured exchange and returns a ready producer.
    pub async fn bind(
        channel: Arc<dyn Channel>,
        config: ProducerConfig,
    ) -> Result<Self, ClientError> {
        channel
            .declare_exchange(&config.exchange_name, &config.exchange_type)
            .await?;
        log::info!("exchange '{}' declared", config.exchange_name);
        Ok(Self { channel, config })
    }

    /// Publishes `payload` with `x-attempt = 1`, marking the first delivery.
    pub async fn publish(&self, payload: &[u8]) -> Result<(), ClientError> {
        let mut headers = FieldTable::default();
        headers.insert(X_ATTEMPT.into(), AMQPValue::LongLongInt(1));
        self.channel
            .publish(
                &self.config.exchange_name,
                &self.config.routing_key,
                payload,
                headers,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageStream;
    use crate::message::InboundMessage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubChannel {
        declared: Mutex<Vec<(String, String)>>,
        published: Mutex<Vec<(String, String, Vec<u8>, FieldTable)>>,
    }

    #[async_trait]
    impl Channel for StubChannel {
        async fn set_prefetch(&self, _count: u16) -> Result<(), ClientError> {
            Ok(())
        }

        async fn ack(&self, _message: &InboundMessage) -> Result<(), ClientError> {
            Ok(())
        }

        async fn reject(&self, _message: &InboundMessage, _requeue: bool) -> Result<(), ClientError> {
            Ok(())
        }

        async fn publish(
            &self,
            exchange: &str,
            routing_key: &str,
            payload: &[u8],
            headers: FieldTable,
        ) -> Result<(), ClientError> {
            self.published.lock().unwrap().push((
                exchange.to_string(),
                routing_key.to_string(),
                payload.to_vec(),
                headers,
            ));
            Ok(())
        }

        async fn declare_exchange(&self, name: &str, kind: &str) -> Result<(), ClientError> {
            self.declared.lock().unwrap().push((name.to_string(), kind.to_string()));
            Ok(())
        }

        async fn consume(&self, _queue: &str, _tag: &str) -> Result<MessageStream, ClientError> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
    }

    #[tokio::test]
    async fn bind_declares_the_exchange_and_publish_stamps_the_first_attempt() {
        let channel = Arc::new(StubChannel::default());
        let config = ProducerConfig::new("orders", "topic", "orders.created");

        let producer = Producer::bind(channel.clone(), config).await.unwrap();
        producer.publish(b"order #42").await.unwrap();

        assert_eq!(
            *channel.declared.lock().unwrap(),
            vec![("orders".to_string(), "topic".to_string())]
        );

        let published = channel.published.lock().unwrap();
        let (exchange, routing_key, payload, headers) = &published[0];
        assert_eq!(exchange, "orders");
        assert_eq!(routing_key, "orders.created");
        assert_eq!(payload, b"order #42");
        assert_eq!(headers.inner().get(X_ATTEMPT), Some(&AMQPValue::LongLongInt(1)));
    }
}
