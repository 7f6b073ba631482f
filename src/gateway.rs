//! Publish gateway engine
//!
//! Ties the credential layer to the connection manager: decrypt every
//! request field, check credentials, validate the channel, publish, and
//! form-encode the reply.

use crate::channel::Channel;
use crate::connection::{ConnectionManager, PublishOutcome};
use crate::error::GatewayError;
use crate::security::SecurityContext;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Request and response field names
pub mod fields {
    pub const HEADER: &str = "header";
    pub const USER: &str = "user";
    pub const PASSWORD: &str = "password";
    pub const CHANNEL: &str = "channel";
    pub const MESSAGE: &str = "message";
    pub const PID: &str = "pid";

    pub const ID: &str = "id";
    pub const CODE: &str = "code";
    pub const REMOTE: &str = "remote";
    pub const MQID: &str = "mqid";

    /// Fields every publish request must carry, each encrypted
    pub const REQUEST: [&str; 6] = [HEADER, USER, PASSWORD, CHANNEL, MESSAGE, PID];
}

/// Decrypted publish request
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub header: String,
    pub user: String,
    pub password: String,
    pub channel: String,
    pub message: String,
    pub pid: String,
}

/// Reply to a publish request that passed validation
#[derive(Debug, Clone)]
pub struct PublishReply {
    pub call_id: u64,
    pub outcome: PublishOutcome,
    /// Form-encoded response body
    pub body: String,
}

/// The authenticated publish bridge
pub struct Gateway {
    security: Arc<SecurityContext>,
    connections: Arc<ConnectionManager>,
    next_call_id: AtomicU64,
}

impl Gateway {
    pub fn new(security: Arc<SecurityContext>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            security,
            connections,
            next_call_id: AtomicU64::new(0),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Decrypt all required fields.
    ///
    /// Every field is checked so each problem is logged; the first one is
    /// returned.
    pub fn decrypt_request(
        &self,
        call_id: u64,
        raw: &HashMap<String, String>,
        remote: &str,
    ) -> Result<PublishRequest, GatewayError> {
        let mut values = HashMap::with_capacity(fields::REQUEST.len());
        let mut first_error = None;

        for field in fields::REQUEST {
            let result = match raw.get(field).filter(|v| !v.trim().is_empty()) {
                Some(cipher) => self.security.decrypt_field(field, cipher),
                None => Err(GatewayError::RequestMalformed {
                    field: field.to_string(),
                }),
            };

            match result {
                Ok(text) => {
                    values.insert(field, text);
                }
                Err(e) => {
                    warn!(call_id, remote, field, "Request missing or mangled field");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let mut take = |field: &str| values.remove(field).unwrap_or_default();
        Ok(PublishRequest {
            header: take(fields::HEADER),
            user: take(fields::USER),
            password: take(fields::PASSWORD),
            channel: take(fields::CHANNEL),
            message: take(fields::MESSAGE),
            pid: take(fields::PID),
        })
    }

    /// Handle one publish call from `remote`.
    ///
    /// Rejections come back as errors; a publish that exhausted its retries
    /// is still a reply, carrying the failure code.
    pub async fn handle(
        &self,
        raw: &HashMap<String, String>,
        remote: &str,
    ) -> Result<PublishReply, GatewayError> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::SeqCst);

        let request = self.decrypt_request(call_id, raw, remote)?;

        if !self
            .security
            .validate_credentials(&request.user, &request.password)
        {
            warn!(call_id, remote, "Invalid credentials for user");
            return Err(GatewayError::AuthFailed { user: request.user });
        }

        let channel = Channel::parse(&request.channel).inspect_err(|_| {
            warn!(call_id, remote, "Invalid channel name format");
        })?;

        info!(call_id, remote, pid = %request.pid, channel = %channel, "Publish requested");

        let outcome = self
            .connections
            .publish(call_id, &request.message, channel.as_str())
            .await;

        let id = call_id.to_string();
        let body = self.security.encode_response_payload(&[
            (fields::HEADER, request.header.as_str()),
            (fields::ID, id.as_str()),
            (fields::CODE, outcome.code.as_str()),
            (fields::REMOTE, remote),
            (fields::MQID, outcome.mqid.as_str()),
        ]);

        Ok(PublishReply {
            call_id,
            outcome,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::retry::RetryPolicy;
    use crate::security::test_keys::private_key;
    use crate::security::Credentials;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use rsa::Pkcs1v15Encrypt;
    use std::time::Duration;

    fn encrypt(plain: &str) -> String {
        let cipher = private_key()
            .to_public_key()
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, plain.as_bytes())
            .unwrap();
        STANDARD.encode(cipher)
    }

    fn gateway(broker: &MemoryBroker) -> Gateway {
        let security = SecurityContext::new(private_key().clone(), Credentials::new("alice", "s3cret"));
        let connections = ConnectionManager::new(
            Arc::new(broker.clone()),
            "ConnectionFactory",
            RetryPolicy::new(2, Duration::from_millis(10)),
            RetryPolicy::new(2, Duration::from_millis(10)),
            Duration::from_secs(5),
        );
        Gateway::new(Arc::new(security), Arc::new(connections))
    }

    fn request(user: &str, password: &str, channel: &str) -> HashMap<String, String> {
        [
            (fields::HEADER, "hdr-1"),
            (fields::USER, user),
            (fields::PASSWORD, password),
            (fields::CHANNEL, channel),
            (fields::MESSAGE, "payload"),
            (fields::PID, "4242"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), encrypt(v)))
        .collect()
    }

    #[tokio::test]
    async fn test_publish_reply_fields() {
        let broker = MemoryBroker::new();
        let gateway = gateway(&broker);

        let reply = gateway
            .handle(&request("alice", "s3cret", "orders.created"), "10.0.0.7")
            .await
            .unwrap();

        assert!(reply.outcome.success);
        assert_eq!(reply.call_id, 0);
        assert_eq!(reply.body, "header=hdr-1&id=0&code=0&remote=10.0.0.7&mqid=1");
        assert_eq!(broker.delivered("orders.created"), vec!["payload"]);
    }

    #[tokio::test]
    async fn test_call_ids_are_monotonic() {
        let broker = MemoryBroker::new();
        let gateway = gateway(&broker);
        let raw = request("alice", "s3cret", "a");

        for expected in 0..3 {
            let reply = gateway.handle(&raw, "r").await.unwrap();
            assert_eq!(reply.call_id, expected);
        }
    }

    #[tokio::test]
    async fn test_missing_field_rejected() {
        let broker = MemoryBroker::new();
        let gateway = gateway(&broker);
        let mut raw = request("alice", "s3cret", "a");
        raw.remove(fields::PID);

        let err = gateway.handle(&raw, "r").await.unwrap_err();
        assert!(matches!(err, GatewayError::RequestMalformed { ref field } if field == "pid"));
        assert_eq!(broker.open_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let broker = MemoryBroker::new();
        let gateway = gateway(&broker);

        let err = gateway
            .handle(&request("alice", "guess", "a"), "r")
            .await
            .unwrap_err();
        assert_eq!(err.error_type_label(), "auth_failed");
        assert_eq!(broker.open_count(), 0);
    }

    #[tokio::test]
    async fn test_traversal_channel_rejected_before_broker() {
        let broker = MemoryBroker::new();
        let gateway = gateway(&broker);

        let err = gateway
            .handle(&request("alice", "s3cret", "../etc/passwd"), "r")
            .await
            .unwrap_err();

        assert_eq!(err.error_type_label(), "channel_invalid");
        assert_eq!(broker.open_count(), 0);
        assert_eq!(gateway.connections().channel_count(), 0);
    }
}
