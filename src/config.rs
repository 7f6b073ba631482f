//! Gateway configuration module
//!
//! Loads the gateway tunables from the environment (`GATEWAY_*` variables,
//! `.env` supported) layered over an optional config file named by
//! `GATEWAY_CONFIG_FILE`. The result is immutable for the process lifetime.

use crate::error::GatewayError;
use crate::retry::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment prefix for every configuration key
pub const ENV_PREFIX: &str = "GATEWAY";

/// Environment variable naming an optional config file (toml/yaml/json)
pub const CONFIG_FILE_VAR: &str = "GATEWAY_CONFIG_FILE";

/// Configuration keys
pub mod keys {
    pub const CONNECT_LIMIT: &str = "connect_limit";
    pub const CONNECT_INTERVAL: &str = "connect_interval";
    pub const PUBLISH_LIMIT: &str = "publish_limit";
    pub const PUBLISH_INTERVAL: &str = "publish_interval";
    pub const BROKER_LOOKUP_CONTEXT: &str = "broker_lookup_context";
    pub const BROKER_FACTORY_NAME: &str = "broker_factory_name";
    pub const PRIVATE_KEY_LOCATION: &str = "private_key_location";
    pub const CREDENTIALS_LOCATION: &str = "credentials_location";
    pub const BROKER_CALL_TIMEOUT: &str = "broker_call_timeout";
    pub const HTTP_PORT: &str = "http_port";
    pub const LOG_LEVEL: &str = "log_level";
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Max connect attempts per connect call
    pub connect_limit: u32,

    /// Pause between connect attempts
    pub connect_interval: Duration,

    /// Max publish attempts per call
    pub publish_limit: u32,

    /// Pause between publish attempts
    pub publish_interval: Duration,

    /// Broker lookup context (NATS server list, or `memory://...`)
    pub broker_lookup_context: String,

    /// Connection factory name looked up in the broker context
    pub broker_factory_name: String,

    /// PEM file holding the server's PKCS#8 RSA private key
    pub private_key_location: PathBuf,

    /// File holding the encrypted `user\npassword` pair
    pub credentials_location: PathBuf,

    /// Deadline for a single broker call (open or send)
    pub broker_call_timeout: Duration,

    /// HTTP listen port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl GatewayConfig {
    /// Load configuration from the environment and optional config file
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        if let Ok(path) = env::var(CONFIG_FILE_VAR) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let source = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .map_err(|e| GatewayError::ConfigInvalid(format!("could not read configuration: {e}")))?;

        Self::from_source(&source)
    }

    /// Build configuration from an already-assembled key/value source.
    ///
    /// Every required key is checked so that a single startup log line names
    /// all of the problems at once.
    pub fn from_source(source: &config::Config) -> Result<Self, GatewayError> {
        let mut problems = Vec::new();

        let connect_limit = required::<u32>(source, keys::CONNECT_LIMIT, &mut problems);
        let connect_interval = required::<u64>(source, keys::CONNECT_INTERVAL, &mut problems);
        let publish_limit = required::<u32>(source, keys::PUBLISH_LIMIT, &mut problems);
        let publish_interval = required::<u64>(source, keys::PUBLISH_INTERVAL, &mut problems);
        let broker_lookup_context =
            required::<String>(source, keys::BROKER_LOOKUP_CONTEXT, &mut problems);
        let broker_factory_name =
            required::<String>(source, keys::BROKER_FACTORY_NAME, &mut problems);
        let private_key_location =
            required::<PathBuf>(source, keys::PRIVATE_KEY_LOCATION, &mut problems);
        let credentials_location =
            required::<PathBuf>(source, keys::CREDENTIALS_LOCATION, &mut problems);

        let broker_call_timeout =
            optional::<u64>(source, keys::BROKER_CALL_TIMEOUT, 10_000, &mut problems);
        let http_port = optional::<u16>(source, keys::HTTP_PORT, 8080, &mut problems);
        let log_level = optional::<String>(source, keys::LOG_LEVEL, "info".to_string(), &mut problems);

        if broker_call_timeout == 0 {
            problems.push(format!("{} must be greater than zero", keys::BROKER_CALL_TIMEOUT));
        }

        if !problems.is_empty() {
            return Err(GatewayError::ConfigInvalid(problems.join("; ")));
        }

        // Every required value is Some once `problems` is empty
        match (
            connect_limit,
            connect_interval,
            publish_limit,
            publish_interval,
            broker_lookup_context,
            broker_factory_name,
            private_key_location,
            credentials_location,
        ) {
            (
                Some(connect_limit),
                Some(connect_interval),
                Some(publish_limit),
                Some(publish_interval),
                Some(broker_lookup_context),
                Some(broker_factory_name),
                Some(private_key_location),
                Some(credentials_location),
            ) => Ok(Self {
                connect_limit,
                connect_interval: Duration::from_millis(connect_interval),
                publish_limit,
                publish_interval: Duration::from_millis(publish_interval),
                broker_lookup_context,
                broker_factory_name,
                private_key_location,
                credentials_location,
                broker_call_timeout: Duration::from_millis(broker_call_timeout),
                http_port,
                log_level,
            }),
            _ => Err(GatewayError::ConfigInvalid(
                "incomplete configuration".to_string(),
            )),
        }
    }

    /// Retry policy for the connect phase
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.connect_limit, self.connect_interval)
    }

    /// Retry policy for the publish phase
    pub fn publish_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.publish_limit, self.publish_interval)
    }
}

fn lookup(source: &config::Config, key: &str) -> Option<String> {
    source
        .get_string(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required<T>(source: &config::Config, key: &str, problems: &mut Vec<String>) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(source, key) else {
        problems.push(format!("{key} must be set"));
        return None;
    };

    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            problems.push(format!("{key} is invalid: {e}"));
            None
        }
    }
}

fn optional<T>(source: &config::Config, key: &str, default: T, problems: &mut Vec<String>) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(source, key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            problems.push(format!("{key} is invalid: {e}"));
            default
        }),
    }
}
