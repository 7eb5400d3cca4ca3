//! Inbound message representation and reserved-header access.

use lapin::message::Delivery;
use lapin::types::{AMQPValue, FieldTable};

/// Header carrying the delivery attempt counter. Absent on first delivery.
pub const X_ATTEMPT: &str = "x-attempt";

/// Header carrying the redelivery delay hint in milliseconds. Set by the
/// engine on retries, consumed by the broker's delayed-message exchange.
pub const X_DELAY: &str = "x-delay";

/// A message delivered by the channel, alive for one delivery callback.
///
/// Retry progress travels exclusively inside `headers`; the engine keeps no
/// per-message state of its own.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Broker-assigned tag identifying this delivery on its channel.
    pub delivery_tag: u64,
    /// Opaque payload bytes. The engine never inspects them.
    pub payload: Vec<u8>,
    /// AMQP headers as delivered.
    pub headers: FieldTable,
}

impl InboundMessage {
    pub fn new(delivery_tag: u64, payload: Vec<u8>, headers: FieldTable) -> Self {
        Self { delivery_tag, payload, headers }
    }

    /// Returns the raw value of a header, if present.
    pub fn header(&self, key: &str) -> Option<&AMQPValue> {
        self.headers.inner().get(key)
    }

    /// Number of deliveries attempted so far, including this one.
    ///
    /// Reads `x-attempt` accepting any signed-integer AMQP encoding;
    /// a missing, malformed, or non-positive value counts as the first
    /// delivery.
    pub fn attempt(&self) -> u32 {
        let value = match self.header(X_ATTEMPT) {
            Some(AMQPValue::LongLongInt(n)) => *n,
            Some(AMQPValue::LongInt(n)) => i64::from(*n),
            Some(AMQPValue::ShortInt(n)) => i64::from(*n),
            Some(AMQPValue::ShortShortInt(n)) => i64::from(*n),
            _ => return 1,
        };
        u32::try_from(value).ok().filter(|n| *n >= 1).unwrap_or(1)
    }
}

impl From<Delivery> for InboundMessage {
    fn from(delivery: Delivery) -> Self {
        let headers = delivery.properties.headers().clone().unwrap_or_default();
        Self {
            delivery_tag: delivery.delivery_tag,
            payload: delivery.data,
            headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(headers: FieldTable) -> InboundMessage {
        InboundMessage::new(1, b"payload".to_vec(), headers)
    }

    #[test]
    fn attempt_defaults_to_one_when_header_absent() {
        assert_eq!(message_with(FieldTable::default()).attempt(), 1);
    }

    #[test]
    fn attempt_reads_integer_encodings() {
        let mut headers = FieldTable::default();
        headers.insert(X_ATTEMPT.into(), AMQPValue::LongLongInt(4));
        assert_eq!(message_with(headers).attempt(), 4);

        let mut headers = FieldTable::default();
        headers.insert(X_ATTEMPT.into(), AMQPValue::LongInt(3));
        assert_eq!(message_with(headers).attempt(), 3);

        let mut headers = FieldTable::default();
        headers.insert(X_ATTEMPT.into(), AMQPValue::ShortInt(2));
        assert_eq!(message_with(headers).attempt(), 2);
    }

    #[test]
    fn attempt_falls_back_on_garbage_values() {
        let mut headers = FieldTable::default();
        headers.insert(X_ATTEMPT.into(), AMQPValue::LongString("seven".into()));
        assert_eq!(message_with(headers).attempt(), 1);

        let mut headers = FieldTable::default();
        headers.insert(X_ATTEMPT.into(), AMQPValue::LongLongInt(-2));
        assert_eq!(message_with(headers).attempt(), 1);
    }
}
