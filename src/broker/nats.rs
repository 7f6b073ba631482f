//! NATS JetStream broker
//!
//! The lookup context is a comma-separated NATS server list. The factory
//! name becomes the client connection name, the JetStream context plays the
//! session, and the producer is the channel's subject.

use super::{Broker, ExceptionListener, Producer, Receipt};
use crate::error::GatewayError;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::{Client, ConnectOptions, Event, ServerAddr};
use async_trait::async_trait;
use tracing::{debug, info};

/// NATS-backed broker
#[derive(Debug, Clone)]
pub struct NatsBroker {
    servers: String,
}

impl NatsBroker {
    pub fn new(servers: impl Into<String>) -> Self {
        Self {
            servers: servers.into(),
        }
    }

    /// Parse the server list, returning it normalized for `connect`
    fn server_list(&self) -> Result<String, GatewayError> {
        let addrs = self
            .servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<ServerAddr>().map(|_| s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::ConnectionInvalid {
                context: self.servers.clone(),
                source: Box::new(e),
            })?;

        if addrs.is_empty() {
            return Err(GatewayError::ConnectionInvalid {
                context: self.servers.clone(),
                source: "no NATS servers listed".into(),
            });
        }
        Ok(addrs.join(","))
    }
}

/// Subjects are dot-separated tokens; none may be empty.
fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split('.')
            .all(|token| !token.is_empty() && !token.contains(char::is_whitespace))
}

#[async_trait]
impl Broker for NatsBroker {
    fn kind(&self) -> &'static str {
        "nats"
    }

    async fn check_context(&self) -> Result<(), GatewayError> {
        let servers = self.server_list()?;
        info!(servers, "NATS lookup context resolved");
        Ok(())
    }

    async fn open(
        &self,
        factory: &str,
        channel: &str,
        listener: ExceptionListener,
    ) -> Result<Box<dyn Producer>, GatewayError> {
        let servers = self.server_list()?;

        if !is_valid_subject(channel) {
            return Err(GatewayError::BrokerConnectFailed {
                channel: channel.to_string(),
                source: format!("'{channel}' is not a valid NATS subject").into(),
            });
        }

        let client = ConnectOptions::new()
            .name(factory)
            .event_callback(move |event| {
                let listener = listener.clone();
                async move {
                    match event {
                        Event::Disconnected => listener.on_exception("disconnected"),
                        Event::Closed => listener.on_exception("connection closed"),
                        Event::ServerError(e) => listener.on_exception(e.to_string()),
                        Event::ClientError(e) => listener.on_exception(e.to_string()),
                        other => debug!(channel = listener.channel(), event = ?other, "NATS event"),
                    }
                }
            })
            .connect(servers.as_str())
            .await
            .map_err(|e| GatewayError::BrokerConnectFailed {
                channel: channel.to_string(),
                source: Box::new(e),
            })?;

        let jetstream = jetstream::new(client.clone());

        info!(factory, channel, "NATS producer bound");

        Ok(Box::new(NatsProducer {
            client,
            jetstream,
            subject: channel.to_string(),
        }))
    }
}

struct NatsProducer {
    client: Client,
    jetstream: JsContext,
    subject: String,
}

impl NatsProducer {
    fn send_error(&self, source: Box<dyn std::error::Error + Send + Sync>) -> GatewayError {
        // NATS reports no numeric status for rejected publishes
        GatewayError::BrokerSendFailed {
            channel: self.subject.clone(),
            code: None,
            source,
        }
    }
}

#[async_trait]
impl Producer for NatsProducer {
    async fn send(&mut self, message: &str) -> Result<Receipt, GatewayError> {
        let ack = self
            .jetstream
            .publish(self.subject.clone(), message.to_owned().into())
            .await
            .map_err(|e| self.send_error(Box::new(e)))?
            .await
            .map_err(|e| self.send_error(Box::new(e)))?;

        debug!(
            subject = %self.subject,
            stream = %ack.stream,
            seq = ack.sequence,
            "Message acknowledged"
        );

        Ok(Receipt {
            message_id: Some(format!("{}:{}", ack.stream, ack.sequence)),
        })
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        // async-nats tears the connection down once the last client handle drops
        self.client
            .flush()
            .await
            .map_err(|e| GatewayError::BrokerSendFailed {
                channel: self.subject.clone(),
                code: None,
                source: Box::new(e),
            })
    }
}
