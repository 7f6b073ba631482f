//! Channel publisher
//!
//! Wraps one broker producer bound to one channel. A publisher is valid from
//! construction until a send fails or the broker reports an asynchronous
//! error; after that it is never used again and the connection manager
//! replaces it.

use crate::broker::{Broker, ExceptionListener, Producer, Receipt};
use crate::error::GatewayError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Live connection/session/producer triple for one channel
pub struct ChannelPublisher {
    channel: String,
    /// Sends are serialized; broker sessions are not assumed to be thread-safe
    producer: Mutex<Box<dyn Producer>>,
    valid: Arc<AtomicBool>,
    call_timeout: Duration,
    opened_at: Instant,
}

impl std::fmt::Debug for ChannelPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPublisher")
            .field("channel", &self.channel)
            .field("valid", &self.is_valid())
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

impl ChannelPublisher {
    /// Run the broker connect sequence for `channel`.
    ///
    /// The open runs under `call_timeout`; the broker releases anything it
    /// created when it fails.
    pub async fn open(
        broker: &dyn Broker,
        factory: &str,
        channel: &str,
        call_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let valid = Arc::new(AtomicBool::new(true));
        let listener = ExceptionListener::new(channel, Arc::clone(&valid));

        let producer = tokio::time::timeout(call_timeout, broker.open(factory, channel, listener))
            .await
            .map_err(|_| GatewayError::BrokerTimeout {
                channel: channel.to_string(),
                operation: "open",
                timeout_ms: call_timeout.as_millis() as u64,
            })??;

        debug!(channel, broker = broker.kind(), "Channel publisher opened");

        Ok(Self {
            channel: channel.to_string(),
            producer: Mutex::new(producer),
            valid,
            call_timeout,
            opened_at: Instant::now(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Mark this publisher permanently unusable
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Send one message. Any failure invalidates the publisher; retrying is
    /// the caller's job.
    pub async fn publish(&self, call_id: u64, message: &str) -> Result<Receipt, GatewayError> {
        let mut producer = self.producer.lock().await;

        // Checked under the lock so a send queued behind a failed one is refused
        if !self.is_valid() {
            return Err(GatewayError::BrokerAsyncError {
                channel: self.channel.clone(),
                reason: "publisher invalidated".to_string(),
            });
        }

        let result = match tokio::time::timeout(self.call_timeout, producer.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::BrokerTimeout {
                channel: self.channel.clone(),
                operation: "send",
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        };

        if let Err(ref e) = result {
            self.invalidate();
            warn!(call_id, channel = %self.channel, error = %e, "Send failed, publisher invalidated");
            crate::metrics::record_error(e);
        }

        result
    }

    /// Close session and connection. Close errors are logged, never returned.
    pub async fn close(&self) {
        self.invalidate();

        let mut producer = self.producer.lock().await;
        match tokio::time::timeout(self.call_timeout, producer.close()).await {
            Ok(Ok(())) => debug!(channel = %self.channel, "Channel publisher closed"),
            Ok(Err(e)) => warn!(channel = %self.channel, error = %e, "Error closing channel publisher"),
            Err(_) => warn!(channel = %self.channel, "Timed out closing channel publisher"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use tokio_test::{assert_err, assert_ok};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_open_and_publish() {
        let broker = MemoryBroker::new();
        let publisher = ChannelPublisher::open(&broker, "factory", "orders.created", TIMEOUT)
            .await
            .unwrap();

        assert!(publisher.is_valid());
        let receipt = assert_ok!(publisher.publish(1, "hello").await);
        assert_eq!(receipt.message_id.as_deref(), Some("1"));
        assert_eq!(broker.delivered("orders.created"), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_open_failure_is_error() {
        let broker = MemoryBroker::new();
        broker.fail_next_opens(1);

        let err = ChannelPublisher::open(&broker, "factory", "a", TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.error_type_label(), "broker_connect");
    }

    #[tokio::test]
    async fn test_send_failure_invalidates_permanently() {
        let broker = MemoryBroker::new();
        let publisher = ChannelPublisher::open(&broker, "factory", "a", TIMEOUT)
            .await
            .unwrap();
        broker.fail_next_send(None);

        assert_err!(publisher.publish(1, "first").await);
        assert!(!publisher.is_valid());

        // Broker would accept now, but the publisher stays dead
        assert_err!(publisher.publish(2, "second").await);
        assert!(broker.delivered("a").is_empty());
    }

    #[tokio::test]
    async fn test_async_error_rejects_next_publish() {
        let broker = MemoryBroker::new();
        let publisher = ChannelPublisher::open(&broker, "factory", "a", TIMEOUT)
            .await
            .unwrap();

        broker.raise_async_error("a", "connection reset");

        assert!(!publisher.is_valid());
        let err = publisher.publish(1, "m").await.unwrap_err();
        assert_eq!(err.error_type_label(), "broker_async");
    }

    #[tokio::test]
    async fn test_close_invalidates() {
        let broker = MemoryBroker::new();
        let publisher = ChannelPublisher::open(&broker, "factory", "a", TIMEOUT)
            .await
            .unwrap();

        publisher.close().await;
        assert!(!publisher.is_valid());
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_serialized() {
        let broker = MemoryBroker::new();
        let publisher = Arc::new(
            ChannelPublisher::open(&broker, "factory", "a", TIMEOUT)
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..16u64 {
            let publisher = Arc::clone(&publisher);
            handles.push(tokio::spawn(async move {
                publisher.publish(i, &format!("m{i}")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(broker.delivered("a").len(), 16);
    }
}
