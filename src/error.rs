//! Domain error types for the publish gateway
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All application code returns Result<T, GatewayError>.

use thiserror::Error;

/// Gateway domain errors
///
/// Startup variants (`ConfigInvalid`, `SecurityInvalid`, `ConnectionInvalid`)
/// are fatal to the process. Everything else is scoped to a single call or a
/// single channel publisher and must never leak its detail to the caller;
/// use [`GatewayError::caller_message`] for anything written to a response.
///
/// Example log output:
/// ```text
/// GatewayError::PublishFailed { channel: "orders.created", attempts: 3 }
/// → "publish to channel 'orders.created' failed after 3 attempts"
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error (key missing or malformed)
    #[error("configuration error: {0}")]
    ConfigInvalid(String),

    /// Private key or credential resource could not be loaded or parsed
    #[error("security initialization failed: {reason}")]
    SecurityInvalid { reason: String },

    /// Broker lookup context could not be resolved at startup
    #[error("broker lookup context '{context}' is not usable")]
    ConnectionInvalid {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Request field missing, blank, or not decryptable
    #[error("request field '{field}' is missing or malformed")]
    RequestMalformed { field: String },

    /// Supplied credentials do not match the accepted pair
    #[error("credentials rejected for user '{user}'")]
    AuthFailed { user: String },

    /// Channel name failed validation
    #[error("channel name '{channel}' is not allowed")]
    ChannelInvalid { channel: String },

    /// All publish attempts exhausted
    #[error("publish to channel '{channel}' failed after {attempts} attempts")]
    PublishFailed { channel: String, attempts: u32 },

    /// Out-of-band error reported by the broker for a live connection
    #[error("broker reported asynchronous error on channel '{channel}': {reason}")]
    BrokerAsyncError { channel: String, reason: String },

    /// Opening connection/session/producer for a channel failed
    #[error("broker connect failed for channel '{channel}'")]
    BrokerConnectFailed {
        channel: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Sending a message on an open producer failed
    #[error("broker send failed for channel '{channel}'")]
    BrokerSendFailed {
        channel: String,
        /// Status code supplied by the broker, if any
        code: Option<String>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A single broker call exceeded the configured deadline
    #[error("broker {operation} on channel '{channel}' timed out after {timeout_ms}ms")]
    BrokerTimeout {
        channel: String,
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl GatewayError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `gateway_errors_total`.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config",
            Self::SecurityInvalid { .. } => "security",
            Self::ConnectionInvalid { .. } => "connection",
            Self::RequestMalformed { .. } => "request_malformed",
            Self::AuthFailed { .. } => "auth_failed",
            Self::ChannelInvalid { .. } => "channel_invalid",
            Self::PublishFailed { .. } => "publish_failed",
            Self::BrokerAsyncError { .. } => "broker_async",
            Self::BrokerConnectFailed { .. } => "broker_connect",
            Self::BrokerSendFailed { .. } => "broker_send",
            Self::BrokerTimeout { .. } => "broker_timeout",
        }
    }

    /// Fixed text that may be shown to a caller, or `None` when the error
    /// must stay internal.
    pub fn caller_message(&self) -> Option<&'static str> {
        match self {
            Self::RequestMalformed { .. } => Some("invalid fields in request"),
            Self::AuthFailed { .. } => Some("invalid credentials"),
            Self::ChannelInvalid { .. } => Some("invalid channel name format"),
            Self::PublishFailed { .. } => Some("publish failed"),
            _ => None,
        }
    }

    /// Broker-supplied status code carried by the error, if any.
    pub fn broker_code(&self) -> Option<&str> {
        match self {
            Self::BrokerSendFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
