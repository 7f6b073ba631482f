//! Broker connection management
//!
//! One [`ChannelPublisher`] per channel, resolved lock-free and recreated
//! with bounded retry by the [`ConnectionManager`].

mod manager;
mod publisher;

pub use manager::{ConnectionManager, ConnectionTable, PublishOutcome};
pub use publisher::ChannelPublisher;
