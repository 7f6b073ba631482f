//! Publish Gateway
//!
//! Accepts authenticated, field-encrypted publish requests over HTTP and
//! relays each message onto a named broker channel:
//! - Decrypts and authenticates every request (RSA private key, one accepted credential pair)
//! - Keeps one broker publisher per channel in a lock-free, copy-then-swap table
//! - Reconnects and retries with bounded linear backoff
//! - Exposes health/ready endpoints and Prometheus metrics

pub mod broker;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod resource;
pub mod retry;
pub mod security;

pub use config::GatewayConfig;
pub use connection::{ConnectionManager, PublishOutcome};
pub use error::GatewayError;
pub use gateway::Gateway;
pub use security::SecurityContext;
