//! Retry configuration: attempt budget, delay policy, and admission gate.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use lapin::types::{AMQPValue, FieldTable};

use crate::handler::HandlerError;
use crate::message::{InboundMessage, X_ATTEMPT, X_DELAY};

/// Base delay applied by [`DelayPolicy::Default`], scaled by the attempt
/// number of the retried message.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10_000;

/// Caller-supplied asynchronous predicate that can veto a retry
/// independently of the attempt budget. `false` forces a discard.
pub type AdmissionCheck = Arc<dyn Fn(&HandlerError) -> BoxFuture<'static, bool> + Send + Sync>;

/// Async delay computation backing [`DelayPolicy::Computed`].
pub type DelayFn = Arc<dyn Fn(&HandlerError) -> BoxFuture<'static, u64> + Send + Sync>;

/// The exchange/routing-key pair failed messages are republished to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTarget {
    pub exchange: String,
    pub routing_key: String,
}

impl RetryTarget {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self { exchange: exchange.into(), routing_key: routing_key.into() }
    }
}

/// Rule producing the `x-delay` hint attached to a retried message.
#[derive(Clone)]
pub enum DelayPolicy {
    /// `10_000 * next_attempt` milliseconds.
    Default,
    /// A constant delay in milliseconds.
    Fixed(u64),
    /// An asynchronous function of the handler error.
    Computed(DelayFn),
}

impl DelayPolicy {
    /// Wraps an async closure as a computed delay policy.
    pub fn computed<F, Fut>(f: F) -> Self
    where
        F: Fn(&HandlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = u64> + Send + 'static,
    {
        DelayPolicy::Computed(Arc::new(
            move |error: &HandlerError| -> BoxFuture<'static, u64> { Box::pin(f(error)) },
        ))
    }

    /// Resolves the delay in milliseconds for a retry that will be delivered
    /// as attempt `next_attempt`.
    pub async fn resolve(&self, next_attempt: u32, error: &HandlerError) -> u64 {
        match self {
            DelayPolicy::Default => DEFAULT_RETRY_DELAY_MS * u64::from(next_attempt),
            DelayPolicy::Fixed(ms) => *ms,
            DelayPolicy::Computed(f) => f(error).await,
        }
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        DelayPolicy::Default
    }
}

impl fmt::Debug for DelayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayPolicy::Default => f.write_str("Default"),
            DelayPolicy::Fixed(ms) => f.debug_tuple("Fixed").field(ms).finish(),
            DelayPolicy::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Redelivery rules for one consumer, immutable for the engine's lifetime.
///
/// Usually assembled through `ConsumerConfig::builder()`, which also
/// validates that an enabled policy carries a target.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Master switch for the retry path.
    pub enabled: bool,
    /// Attempt budget: a delivery whose attempt count has reached this
    /// value is discarded instead of retried.
    pub max_attempts: u32,
    /// Where retries are republished. Retries are impossible without it.
    pub target: Option<RetryTarget>,
    /// Header keys copied forward from the original into the retry.
    pub header_allowlist: Vec<String>,
    pub delay: DelayPolicy,
    pub admission_check: Option<AdmissionCheck>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            target: None,
            header_allowlist: Vec::new(),
            delay: DelayPolicy::default(),
            admission_check: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("enabled", &self.enabled)
            .field("max_attempts", &self.max_attempts)
            .field("target", &self.target)
            .field("header_allowlist", &self.header_allowlist)
            .field("delay", &self.delay)
            .field("admission_check", &self.admission_check.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Builds the header table for a republished message: allowlisted
    /// headers present on the original, then `x-attempt` and `x-delay`.
    /// The reserved keys always win over allowlisted copies.
    pub(crate) fn retry_headers(
        &self,
        original: &InboundMessage,
        next_attempt: u32,
        delay_ms: u64,
    ) -> FieldTable {
        let mut headers = FieldTable::default();
        for key in &self.header_allowlist {
            if let Some(value) = original.header(key) {
                headers.insert(key.as_str().into(), value.clone());
            }
        }
        headers.insert(X_ATTEMPT.into(), AMQPValue::LongLongInt(i64::from(next_attempt)));
        headers.insert(X_DELAY.into(), AMQPValue::LongLongInt(delay_ms as i64));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boom() -> HandlerError {
        "boom".into()
    }

    #[tokio::test]
    async fn default_delay_scales_with_attempt() {
        let policy = DelayPolicy::default();
        assert_eq!(policy.resolve(2, &boom()).await, 20_000);
        assert_eq!(policy.resolve(5, &boom()).await, 50_000);
    }

    #[tokio::test]
    async fn fixed_delay_ignores_attempt() {
        let policy = DelayPolicy::Fixed(1_500);
        assert_eq!(policy.resolve(2, &boom()).await, 1_500);
        assert_eq!(policy.resolve(9, &boom()).await, 1_500);
    }

    #[tokio::test]
    async fn computed_delay_sees_the_error() {
        let policy = DelayPolicy::computed(|error: &HandlerError| {
            let slow = error.to_string().contains("slow");
            async move { if slow { 60_000 } else { 100 } }
        });
        assert_eq!(policy.resolve(2, &"slow down".into()).await, 60_000);
        assert_eq!(policy.resolve(2, &boom()).await, 100);
    }

    #[test]
    fn retry_headers_copy_only_allowlisted_keys() {
        let mut original_headers = FieldTable::default();
        original_headers.insert("x-correlation-id".into(), AMQPValue::LongString("abc".into()));
        original_headers.insert("x-secret".into(), AMQPValue::LongString("hidden".into()));
        let original = InboundMessage::new(7, b"p".to_vec(), original_headers);

        let policy = RetryPolicy {
            header_allowlist: vec!["x-correlation-id".into(), "x-missing".into()],
            ..RetryPolicy::default()
        };
        let headers = policy.retry_headers(&original, 2, 20_000);
        let inner = headers.inner();

        assert_eq!(
            inner.get("x-correlation-id"),
            Some(&AMQPValue::LongString("abc".into()))
        );
        assert!(inner.get("x-secret").is_none());
        assert!(inner.get("x-missing").is_none());
        assert_eq!(inner.get(X_ATTEMPT), Some(&AMQPValue::LongLongInt(2)));
        assert_eq!(inner.get(X_DELAY), Some(&AMQPValue::LongLongInt(20_000)));
        assert_eq!(inner.len(), 3);
    }

    #[test]
    fn reserved_keys_override_allowlisted_copies() {
        let mut original_headers = FieldTable::default();
        original_headers.insert(X_ATTEMPT.into(), AMQPValue::LongLongInt(1));
        let original = InboundMessage::new(7, b"p".to_vec(), original_headers);

        let policy = RetryPolicy {
            header_allowlist: vec![X_ATTEMPT.to_string()],
            ..RetryPolicy::default()
        };
        let headers = policy.retry_headers(&original, 2, 100);
        assert_eq!(headers.inner().get(X_ATTEMPT), Some(&AMQPValue::LongLongInt(2)));
    }
}
