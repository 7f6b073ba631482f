//! Connection manager
//!
//! Owns the connection table (channel → [`ChannelPublisher`]) and the
//! bounded connect/publish retry loops.
//!
//! The table is an immutable map behind an [`ArcSwap`]. Publishes read it
//! without locking; `connect` copies it, inserts the new publisher and swaps
//! the copy in. Connects are serialized manager-wide, which keeps the
//! copy-then-swap free of lost updates.

use crate::broker::Broker;
use crate::config::GatewayConfig;
use crate::connection::publisher::ChannelPublisher;
use crate::error::GatewayError;
use crate::retry::RetryPolicy;

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Snapshot of channel → publisher; replaced wholesale, never mutated
pub type ConnectionTable = HashMap<String, Arc<ChannelPublisher>>;

/// Result of one publish call as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub success: bool,
    pub code: String,
    pub mqid: String,
}

impl PublishOutcome {
    /// Code reported on success
    pub const SUCCESS_CODE: &'static str = "0";
    /// Code reported on failure when the broker supplied none
    pub const FAILURE_CODE: &'static str = "-11";
    /// Message id reported when the broker supplied none
    pub const NO_MESSAGE_ID: &'static str = "0";

    fn succeeded(message_id: Option<String>) -> Self {
        Self {
            success: true,
            code: Self::SUCCESS_CODE.to_string(),
            mqid: message_id.unwrap_or_else(|| Self::NO_MESSAGE_ID.to_string()),
        }
    }

    fn failed(code: Option<String>) -> Self {
        Self {
            success: false,
            code: code.unwrap_or_else(|| Self::FAILURE_CODE.to_string()),
            mqid: Self::NO_MESSAGE_ID.to_string(),
        }
    }
}

/// Per-channel broker connection lifecycle
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    factory: String,
    connect_policy: RetryPolicy,
    publish_policy: RetryPolicy,
    call_timeout: Duration,
    table: ArcSwap<ConnectionTable>,
    connect_lock: Mutex<()>,
    shut_down: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager with explicit tunables
    pub fn new(
        broker: Arc<dyn Broker>,
        factory: impl Into<String>,
        connect_policy: RetryPolicy,
        publish_policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            factory: factory.into(),
            connect_policy,
            publish_policy,
            call_timeout,
            table: ArcSwap::from_pointee(ConnectionTable::new()),
            connect_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Create a manager from the gateway configuration
    pub fn from_config(config: &GatewayConfig, broker: Arc<dyn Broker>) -> Self {
        Self::new(
            broker,
            config.broker_factory_name.clone(),
            config.connect_policy(),
            config.publish_policy(),
            config.broker_call_timeout,
        )
    }

    /// Resolve the broker lookup context. Failure is fatal at startup.
    pub async fn init(&self) -> Result<(), GatewayError> {
        self.broker.check_context().await?;
        info!(broker = self.broker.kind(), factory = %self.factory, "Broker context resolved");
        Ok(())
    }

    /// Current publisher for `channel`, if any (lock-free)
    pub fn current(&self, channel: &str) -> Option<Arc<ChannelPublisher>> {
        self.table.load().get(channel).cloned()
    }

    /// True when a valid publisher is current for `channel`
    pub fn is_connected(&self, channel: &str) -> bool {
        self.current(channel).is_some_and(|p| p.is_valid())
    }

    /// Number of channels in the table
    pub fn channel_count(&self) -> usize {
        self.table.load().len()
    }

    /// Number of channels whose current publisher is still valid
    pub fn valid_publishers(&self) -> usize {
        self.table.load().values().filter(|p| p.is_valid()).count()
    }

    /// False once shutdown has started
    pub fn is_accepting(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst)
    }

    /// Publish `message` on `channel`, connecting as needed.
    ///
    /// Makes up to `publish_limit` attempts and returns on the first
    /// accepted send.
    pub async fn publish(&self, call_id: u64, message: &str, channel: &str) -> PublishOutcome {
        let start = Instant::now();
        let mut broker_code = None;

        if !self.is_accepting() {
            warn!(call_id, channel, "Publish refused, gateway shutting down");
            return PublishOutcome::failed(None);
        }

        if self.connect_policy.limit() == 0 && !self.is_connected(channel) {
            warn!(call_id, channel, "Channel not connected and connects are disabled");
            crate::metrics::record_publish(false, start.elapsed());
            return PublishOutcome::failed(None);
        }

        for attempt in self.publish_policy.attempts() {
            debug!(call_id, channel, attempt = attempt + 1, "Publish attempt");
            crate::metrics::record_publish_attempt();

            if !self.is_connected(channel) {
                warn!(call_id, channel, "Channel not connected");

                if let Err(e) = self.connect(call_id, channel).await {
                    error!(call_id, channel, error = %e, "Could not connect");
                    self.publish_policy.pause_after(attempt).await;
                    continue;
                }
            }

            // A racing connect may have swapped the table since the first read
            let Some(publisher) = self.current(channel) else {
                self.publish_policy.pause_after(attempt).await;
                continue;
            };

            match publisher.publish(call_id, message).await {
                Ok(receipt) => {
                    info!(
                        call_id,
                        channel,
                        attempt = attempt + 1,
                        message_id = receipt.message_id.as_deref().unwrap_or(PublishOutcome::NO_MESSAGE_ID),
                        "Published"
                    );
                    crate::metrics::record_publish(true, start.elapsed());
                    return PublishOutcome::succeeded(receipt.message_id);
                }
                Err(e) => {
                    if let Some(code) = e.broker_code() {
                        broker_code = Some(code.to_string());
                    }
                    warn!(call_id, channel, attempt = attempt + 1, error = %e, "Could not publish");
                    self.publish_policy.pause_after(attempt).await;
                }
            }
        }

        let err = GatewayError::PublishFailed {
            channel: channel.to_string(),
            attempts: self.publish_policy.limit(),
        };
        error!(call_id, error = %err, "Publish attempts exhausted");
        crate::metrics::record_error(&err);
        crate::metrics::record_publish(false, start.elapsed());

        PublishOutcome::failed(broker_code)
    }

    /// Create or recreate the publisher for `channel`.
    ///
    /// Serialized across all channels. Returns immediately when a racing
    /// connect already installed a valid publisher.
    pub async fn connect(&self, call_id: u64, channel: &str) -> Result<(), GatewayError> {
        let _guard = self.connect_lock.lock().await;

        // shutdown() takes the same lock, so nothing installed past this point escapes its close
        if !self.is_accepting() {
            return Err(GatewayError::BrokerConnectFailed {
                channel: channel.to_string(),
                source: "gateway shutting down".into(),
            });
        }

        // Only connect writes the table, so this snapshot stays current while the lock is held
        let table = self.table.load_full();
        let previous = table.get(channel).cloned();

        if previous.as_ref().is_some_and(|p| p.is_valid()) {
            debug!(call_id, channel, "Already connected");
            return Ok(());
        }

        info!(call_id, channel, "Connecting");

        let mut last_error = None;

        for attempt in self.connect_policy.attempts() {
            crate::metrics::record_connect_attempt();

            match ChannelPublisher::open(
                self.broker.as_ref(),
                &self.factory,
                channel,
                self.call_timeout,
            )
            .await
            {
                Ok(publisher) => {
                    let mut next = ConnectionTable::clone(&table);
                    next.insert(channel.to_string(), Arc::new(publisher));
                    self.table.store(Arc::new(next));

                    info!(call_id, channel, attempt = attempt + 1, "Got valid publisher");
                    self.record_table_gauges();

                    if let Some(stale) = previous {
                        tokio::spawn(async move { stale.close().await });
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(call_id, channel, attempt = attempt + 1, error = %e, "Connect attempt failed");
                    crate::metrics::record_error(&e);
                    last_error = Some(e);
                }
            }

            self.connect_policy.pause_after(attempt).await;
        }

        error!(call_id, channel, "Could not get valid publisher");

        Err(last_error.unwrap_or_else(|| GatewayError::BrokerConnectFailed {
            channel: channel.to_string(),
            source: "no connect attempts permitted".into(),
        }))
    }

    /// Stop accepting publishes and connects; `/ready` reports 503 from here on
    pub fn begin_shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("Connection manager draining");
        }
    }

    /// Close every publisher and stop accepting publishes
    pub async fn shutdown(&self) {
        self.begin_shutdown();

        let _guard = self.connect_lock.lock().await;
        let table = self.table.swap(Arc::new(ConnectionTable::new()));

        for publisher in table.values() {
            publisher.close().await;
        }

        info!(channels = table.len(), "Connection manager shut down");
        self.record_table_gauges();
    }

    fn record_table_gauges(&self) {
        crate::metrics::set_publishers(self.channel_count(), self.valid_publishers());
    }
}
