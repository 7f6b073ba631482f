//! Shared fixtures for integration tests
#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use publish_gateway::broker::MemoryBroker;
use publish_gateway::config::{keys, GatewayConfig};
use publish_gateway::gateway::fields;
use publish_gateway::retry::RetryPolicy;
use publish_gateway::{ConnectionManager, Gateway, SecurityContext};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::NamedTempFile;

pub const USER: &str = "gateway-client";
pub const PASSWORD: &str = "Correct-Horse-9";

/// One key per test binary
pub fn private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate key"))
}

/// Encrypt with the server public key and base64-encode, as a client would
pub fn encrypt(plain: &str) -> String {
    let cipher = private_key()
        .to_public_key()
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, plain.as_bytes())
        .expect("encrypt");
    STANDARD.encode(cipher)
}

/// Key and credential resources on disk
pub struct Resources {
    pub private_key: NamedTempFile,
    pub credentials: NamedTempFile,
}

pub fn write_resources() -> Resources {
    let mut key_file = NamedTempFile::new().expect("temp key file");
    let pem = private_key().to_pkcs8_pem(LineEnding::LF).expect("pem");
    key_file.write_all(pem.as_bytes()).expect("write key");

    let mut credentials = NamedTempFile::new().expect("temp credentials file");
    writeln!(credentials, "{}", encrypt(&format!("{USER}\n{PASSWORD}"))).expect("write credentials");

    Resources {
        private_key: key_file,
        credentials,
    }
}

/// Configuration pointing at `resources` and a memory broker
pub fn config(resources: &Resources, connect_limit: u32, publish_limit: u32) -> GatewayConfig {
    let source = config::Config::builder()
        .set_override(keys::CONNECT_LIMIT, connect_limit.to_string())
        .unwrap()
        .set_override(keys::CONNECT_INTERVAL, "200")
        .unwrap()
        .set_override(keys::PUBLISH_LIMIT, publish_limit.to_string())
        .unwrap()
        .set_override(keys::PUBLISH_INTERVAL, "100")
        .unwrap()
        .set_override(keys::BROKER_LOOKUP_CONTEXT, "memory://local")
        .unwrap()
        .set_override(keys::BROKER_FACTORY_NAME, "ConnectionFactory")
        .unwrap()
        .set_override(
            keys::PRIVATE_KEY_LOCATION,
            resources.private_key.path().display().to_string(),
        )
        .unwrap()
        .set_override(
            keys::CREDENTIALS_LOCATION,
            resources.credentials.path().display().to_string(),
        )
        .unwrap()
        .build()
        .unwrap();

    GatewayConfig::from_source(&source).expect("valid config")
}

/// Manager over `broker` with the given limits
pub fn manager(broker: &MemoryBroker, connect: RetryPolicy, publish: RetryPolicy) -> ConnectionManager {
    ConnectionManager::new(
        Arc::new(broker.clone()),
        "ConnectionFactory",
        connect,
        publish,
        Duration::from_secs(5),
    )
}

/// Gateway wired to a memory broker, loaded through the real config path
pub async fn gateway(broker: &MemoryBroker) -> Gateway {
    let resources = write_resources();
    let config = config(&resources, 3, 3);

    let security = SecurityContext::load(&config).await.expect("security loads");
    let connections = ConnectionManager::from_config(&config, Arc::new(broker.clone()));
    connections.init().await.expect("broker context");

    Gateway::new(Arc::new(security), Arc::new(connections))
}

/// Encrypted request fields
pub fn request(user: &str, password: &str, channel: &str, message: &str) -> HashMap<String, String> {
    [
        (fields::HEADER, "client-header"),
        (fields::USER, user),
        (fields::PASSWORD, password),
        (fields::CHANNEL, channel),
        (fields::MESSAGE, message),
        (fields::PID, "31337"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), encrypt(v)))
    .collect()
}
