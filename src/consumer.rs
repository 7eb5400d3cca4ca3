//! The redelivery engine: consumes a queue and decides, per delivery,
//! among acknowledge, discard, and retry-via-republish.

use std::future::Future;
use std::sync::Arc;

use futures_util::TryStreamExt;
use tokio::task::JoinHandle;

use crate::channel::Channel;
use crate::error::ClientError;
use crate::handler::{HandlerError, MessageHandler};
use crate::message::InboundMessage;
use crate::retry::{DelayPolicy, RetryPolicy, RetryTarget};

/// Configuration for a [`Consumer`].
///
/// Use the `ConsumerConfig::builder()` method to construct this struct.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum number of unacknowledged deliveries in flight (QoS prefetch).
    pub prefetch: u16,
    /// Consumer tag registered with the broker. Empty means server-assigned.
    pub consumer_tag: String,
    /// Redelivery rules applied to failed messages.
    pub retry: RetryPolicy,
}

impl ConsumerConfig {
    /// Creates a new `ConsumerConfigBuilder` with defaults: prefetch 10,
    /// server-assigned tag, retry disabled.
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new()
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: 10,
            consumer_tag: String::new(),
            retry: RetryPolicy::default(),
        }
    }
}

/// A builder for creating `ConsumerConfig` instances.
pub struct ConsumerConfigBuilder {
    prefetch: Option<u16>,
    consumer_tag: Option<String>,
    retry: RetryPolicy,
}

impl ConsumerConfigBuilder {
    fn new() -> Self {
        Self {
            prefetch: None,
            consumer_tag: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the QoS prefetch count. Defaults to 10.
    ///
    /// **Warning:** any value greater than 1 means your [`MessageHandler`]
    /// may be called concurrently. Ensure your handler is thread-safe.
    pub fn prefetch(mut self, count: u16) -> Self {
        self.prefetch = Some(count);
        self
    }

    /// Sets a custom consumer tag. Defaults to server-assigned.
    pub fn consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    /// Enables or disables the retry path. Disabled by default.
    pub fn retry_enabled(mut self, enabled: bool) -> Self {
        self.retry.enabled = enabled;
        self
    }

    /// Sets the attempt budget. Defaults to 1 (no retry beyond the first
    /// failure).
    pub fn retry_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    /// Sets the exchange and routing key failed messages are republished to.
    pub fn retry_target(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.retry.target = Some(RetryTarget::new(exchange, routing_key));
        self
    }

    /// Sets the header keys copied from the original message into a retry.
    pub fn retry_headers(mut self, allowlist: Vec<String>) -> Self {
        self.retry.header_allowlist = allowlist;
        self
    }

    /// Overrides the delay policy. Defaults to [`DelayPolicy::Default`].
    pub fn retry_delay(mut self, delay: DelayPolicy) -> Self {
        self.retry.delay = delay;
        self
    }

    /// Installs an admission check consulted before every retry. Returning
    /// `false` discards the message even with attempts remaining.
    pub fn retry_check<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn(&HandlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.retry.admission_check = Some(Arc::new(
            move |error: &HandlerError| -> futures_util::future::BoxFuture<'static, bool> {
                Box::pin(check(error))
            },
        ));
        self
    }

    /// Builds the final `ConsumerConfig`, validating the retry policy.
    ///
    /// An enabled retry policy without a target would make every retry a
    /// dead end, so it is rejected here rather than discovered one failed
    /// message at a time.
    pub fn build(self) -> Result<ConsumerConfig, ClientError> {
        if self.retry.enabled && self.retry.target.is_none() {
            return Err("retry is enabled but no retry target is configured".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry_max_attempts must be at least 1".into());
        }
        Ok(ConsumerConfig {
            prefetch: self.prefetch.unwrap_or(10),
            consumer_tag: self.consumer_tag.unwrap_or_default(),
            retry: self.retry,
        })
    }
}

/// Consumes a queue and applies the redelivery decision procedure to every
/// delivered message.
pub struct Consumer {
    channel: Arc<dyn Channel>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(channel: Arc<dyn Channel>, config: ConsumerConfig) -> Self {
        Self { channel, config }
    }

    /// Subscribes to `queue` and processes deliveries with `handler`.
    ///
    /// Returns once the subscription is established; processing continues on
    /// a spawned task. Awaiting the returned handle observes the end of the
    /// consume loop: `Ok(())` when the broker cancels the consumer, or the
    /// first transport error (a failed ack/reject/publish), which aborts the
    /// loop. Handler failures never end the loop.
    ///
    /// Deliveries are processed concurrently; the in-flight bound is the
    /// prefetch window enforced by the broker, not by the engine.
    pub async fn consume<H>(
        &self,
        queue: &str,
        handler: H,
    ) -> Result<JoinHandle<Result<(), ClientError>>, ClientError>
    where
        H: MessageHandler + 'static,
    {
        self.channel.set_prefetch(self.config.prefetch).await?;
        let deliveries = self.channel.consume(queue, &self.config.consumer_tag).await?;
        log::info!(
            "consumer '{}' started on queue '{queue}' (prefetch {})",
            handler.handler_name(),
            self.config.prefetch
        );

        let channel = Arc::clone(&self.channel);
        let config = self.config.clone();
        let handler = Arc::new(handler);
        Ok(tokio::spawn(async move {
            deliveries
                .try_for_each_concurrent(None, move |message| {
                    let channel = Arc::clone(&channel);
                    let config = config.clone();
                    let handler = Arc::clone(&handler);
                    async move {
                        process_delivery(channel.as_ref(), &config, handler.as_ref(), message)
                            .await
                    }
                })
                .await
        }))
    }
}

/// Runs the per-message decision procedure. Returns `Err` only for
/// transport failures; handler failures are resolved into a terminal
/// ack/reject/republish here.
async fn process_delivery<H: MessageHandler + ?Sized>(
    channel: &dyn Channel,
    config: &ConsumerConfig,
    handler: &H,
    message: InboundMessage,
) -> Result<(), ClientError> {
    let attempt = message.attempt();
    if config.retry.enabled {
        log::info!("[attempt:{attempt}] processing delivery {}", message.delivery_tag);
    }

    match handler.handle(&message).await {
        Ok(()) => channel.ack(&message).await,
        Err(error) => handle_failure(channel, &config.retry, &message, attempt, error).await,
    }
}

/// Resolves a failed delivery into exactly one terminal action, evaluating
/// the short-circuiting checks in order: retry switch, admission check,
/// attempt budget, target presence, then the republish itself.
async fn handle_failure(
    channel: &dyn Channel,
    retry: &RetryPolicy,
    message: &InboundMessage,
    attempt: u32,
    error: HandlerError,
) -> Result<(), ClientError> {
    if !retry.enabled {
        log::error!("[discard]: {error}");
        return channel.reject(message, false).await;
    }

    if let Some(check) = &retry.admission_check {
        if !check(&error).await {
            log::error!("[retry-check] [discard]: {error}");
            return channel.reject(message, false).await;
        }
    }

    if attempt >= retry.max_attempts {
        log::error!("[attempt:{attempt}] [discard]: {error}");
        return channel.reject(message, false).await;
    }

    let Some(target) = &retry.target else {
        // Builder validation rules this out; a literally-constructed policy
        // can still hit it. Discard instead of leaving the delivery in limbo.
        log::warn!(
            "retry target not configured, discarding delivery {}",
            message.delivery_tag
        );
        return channel.reject(message, false).await;
    };

    // The retry is a fresh publish replacing this delivery, so the original
    // is acked, not requeued.
    channel.ack(message).await?;

    let next_attempt = attempt + 1;
    let delay_ms = retry.delay.resolve(next_attempt, &error).await;
    let headers = retry.retry_headers(message, next_attempt, delay_ms);
    channel
        .publish(&target.exchange, &target.routing_key, &message.payload, headers)
        .await?;
    log::error!("[attempt:{attempt}] [requeue]: {error}");
    Ok(())
}
