//! Broker connectivity boundary
//!
//! A broker resolves a connection factory by name, opens a connection,
//! session and producer bound to one channel, and reports connection-level
//! failures out of band through an [`ExceptionListener`].
//!
//! Two implementations exist: NATS JetStream for production and an
//! in-process memory broker for local mode and tests. The lookup context
//! selects between them (`memory://...` vs. a NATS server list).

mod memory;
mod nats;

pub use memory::MemoryBroker;
pub use nats::NatsBroker;

use crate::error::GatewayError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Outcome of a single accepted send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Broker-assigned message id, when the broker supplies one
    pub message_id: Option<String>,
}

/// A broker reachable through a lookup context
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short name of the backend, used in logs
    fn kind(&self) -> &'static str;

    /// Verify that the lookup context resolves. Called once at startup.
    async fn check_context(&self) -> Result<(), GatewayError>;

    /// Run the full connect sequence for `channel`: factory lookup,
    /// connection, session, producer bind.
    ///
    /// Anything partially created must be released before an error is
    /// returned. `listener` receives asynchronous connection errors for as
    /// long as the returned producer lives.
    async fn open(
        &self,
        factory: &str,
        channel: &str,
        listener: ExceptionListener,
    ) -> Result<Box<dyn Producer>, GatewayError>;
}

/// Producer bound to one channel
#[async_trait]
pub trait Producer: Send {
    /// Send one text message
    async fn send(&mut self, message: &str) -> Result<Receipt, GatewayError>;

    /// Close session and connection
    async fn close(&mut self) -> Result<(), GatewayError>;
}

/// Out-of-band error hook handed to the broker on open.
///
/// Flips the owning publisher's validity flag; the flag never goes back to
/// valid.
#[derive(Debug, Clone)]
pub struct ExceptionListener {
    channel: Arc<str>,
    valid: Arc<AtomicBool>,
}

impl ExceptionListener {
    pub fn new(channel: &str, valid: Arc<AtomicBool>) -> Self {
        Self {
            channel: Arc::from(channel),
            valid,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Report an asynchronous broker error for this channel
    pub fn on_exception(&self, reason: impl Into<String>) {
        let err = GatewayError::BrokerAsyncError {
            channel: self.channel.to_string(),
            reason: reason.into(),
        };

        warn!(channel = %self.channel, error = %err, "Broker connection error");
        crate::metrics::record_error(&err);

        self.valid.store(false, Ordering::SeqCst);
    }
}

/// Select the broker backend named by the lookup context
pub fn from_context(context: &str) -> Arc<dyn Broker> {
    if context.starts_with(memory::SCHEME) {
        Arc::new(MemoryBroker::new())
    } else {
        Arc::new(NatsBroker::new(context))
    }
}
