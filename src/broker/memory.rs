//! In-process broker
//!
//! Keeps the most recent delivered messages per channel in memory and
//! assigns sequential message ids. Used when the lookup context is
//! `memory://...` and as the broker double in tests, so it also supports
//! fault injection.
//!
//! Delivery and open-attempt history are bounded; listeners are dropped as
//! soon as their producer closes or is dropped.

use super::{Broker, ExceptionListener, Producer, Receipt};
use crate::error::GatewayError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::debug;

/// Lookup context prefix selecting this broker
pub const SCHEME: &str = "memory://";

/// Messages (and open attempts) remembered per broker by default
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

#[derive(Debug)]
struct MemoryState {
    history_limit: usize,
    context_unreachable: AtomicBool,
    failing_opens: AtomicU32,
    failing_sends: Mutex<VecDeque<Option<String>>>,
    next_message_id: AtomicU64,
    next_producer_id: AtomicU64,
    open_count: AtomicUsize,
    open_attempts: Mutex<VecDeque<(String, Instant)>>,
    delivered: Mutex<HashMap<String, VecDeque<String>>>,
    listeners: Mutex<HashMap<String, Vec<(u64, ExceptionListener)>>>,
}

impl MemoryState {
    fn new(history_limit: usize) -> Self {
        Self {
            history_limit,
            context_unreachable: AtomicBool::new(false),
            failing_opens: AtomicU32::new(0),
            failing_sends: Mutex::new(VecDeque::new()),
            next_message_id: AtomicU64::new(0),
            next_producer_id: AtomicU64::new(0),
            open_count: AtomicUsize::new(0),
            open_attempts: Mutex::new(VecDeque::new()),
            delivered: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn unregister(&self, channel: &str, producer_id: u64) {
        let mut listeners = lock(&self.listeners);
        if let Some(entries) = listeners.get_mut(channel) {
            entries.retain(|(id, _)| *id != producer_id);
            if entries.is_empty() {
                listeners.remove(channel);
            }
        }
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, item: T, limit: usize) {
    if limit == 0 {
        return;
    }
    while history.len() >= limit {
        history.pop_front();
    }
    history.push_back(item);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory broker; clones share the same state
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<MemoryState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker remembering at most `limit` delivered messages per channel and
    /// `limit` open attempts overall. Zero keeps no history.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(MemoryState::new(limit)),
        }
    }

    /// Make `check_context` fail
    pub fn set_context_unreachable(&self, unreachable: bool) {
        self.state
            .context_unreachable
            .store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` open calls
    pub fn fail_next_opens(&self, count: u32) {
        self.state.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Fail the next send on any channel, optionally with a broker status code
    pub fn fail_next_send(&self, code: Option<&str>) {
        lock(&self.state.failing_sends).push_back(code.map(str::to_owned));
    }

    /// Deliver an asynchronous connection error to every live listener on
    /// `channel`. Returns how many listeners were notified.
    pub fn raise_async_error(&self, channel: &str, reason: &str) -> usize {
        let listeners: Vec<ExceptionListener> = lock(&self.state.listeners)
            .get(channel)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener.on_exception(reason);
        }
        listeners.len()
    }

    /// Total open attempts across all channels
    pub fn open_count(&self) -> usize {
        self.state.open_count.load(Ordering::SeqCst)
    }

    /// Producers currently registered for `channel`
    pub fn live_producers(&self, channel: &str) -> usize {
        lock(&self.state.listeners).get(channel).map_or(0, Vec::len)
    }

    /// Instants of the remembered open attempts made for `channel`
    pub fn open_attempts(&self, channel: &str) -> Vec<Instant> {
        lock(&self.state.open_attempts)
            .iter()
            .filter(|(name, _)| name == channel)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Remembered messages delivered to `channel`, in send order
    pub fn delivered(&self, channel: &str) -> Vec<String> {
        lock(&self.state.delivered)
            .get(channel)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn check_context(&self) -> Result<(), GatewayError> {
        if self.state.context_unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectionInvalid {
                context: SCHEME.to_string(),
                source: Box::new(io::Error::new(
                    io::ErrorKind::NotFound,
                    "memory broker context unavailable",
                )),
            });
        }
        Ok(())
    }

    async fn open(
        &self,
        factory: &str,
        channel: &str,
        listener: ExceptionListener,
    ) -> Result<Box<dyn Producer>, GatewayError> {
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        push_bounded(
            &mut *lock(&self.state.open_attempts),
            (channel.to_string(), Instant::now()),
            self.state.history_limit,
        );

        if factory.trim().is_empty() {
            return Err(GatewayError::BrokerConnectFailed {
                channel: channel.to_string(),
                source: "connection factory name is blank".into(),
            });
        }

        let injected_failure = self
            .state
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if injected_failure {
            return Err(GatewayError::BrokerConnectFailed {
                channel: channel.to_string(),
                source: Box::new(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "memory broker refused connection",
                )),
            });
        }

        let id = self.state.next_producer_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.listeners)
            .entry(channel.to_string())
            .or_default()
            .push((id, listener));

        debug!(factory, channel, producer = id, "Memory producer opened");

        Ok(Box::new(MemoryProducer {
            id,
            channel: channel.to_string(),
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MemoryProducer {
    id: u64,
    channel: String,
    state: Arc<MemoryState>,
    closed: bool,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn send(&mut self, message: &str) -> Result<Receipt, GatewayError> {
        if self.closed {
            return Err(GatewayError::BrokerSendFailed {
                channel: self.channel.clone(),
                code: None,
                source: "producer is closed".into(),
            });
        }

        if let Some(code) = lock(&self.state.failing_sends).pop_front() {
            return Err(GatewayError::BrokerSendFailed {
                channel: self.channel.clone(),
                code,
                source: Box::new(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "memory broker rejected message",
                )),
            });
        }

        push_bounded(
            lock(&self.state.delivered)
                .entry(self.channel.clone())
                .or_default(),
            message.to_string(),
            self.state.history_limit,
        );

        let id = self.state.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(Receipt {
            message_id: Some(id.to_string()),
        })
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.closed = true;
        self.state.unregister(&self.channel, self.id);
        Ok(())
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        self.state.unregister(&self.channel, self.id);
    }
}
