//! Request authentication and field crypto
//!
//! Every inbound field is RSA-encrypted (PKCS#1 v1.5) with the server's
//! public key and base64-encoded. [`SecurityContext`] holds the private key
//! and the single accepted credential pair. A context only exists once both
//! were loaded successfully; a failed load is fatal to the gateway.

mod credentials;
mod keys;

pub use credentials::Credentials;
pub use keys::{decode_key, decode_private_key, KeyKind, RsaKey};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::resource::load_resource;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use tracing::{info, warn};
use url::form_urlencoded;

/// Loaded server identity: private key plus accepted credentials
pub struct SecurityContext {
    private_key: RsaPrivateKey,
    credentials: Credentials,
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl SecurityContext {
    pub fn new(private_key: RsaPrivateKey, credentials: Credentials) -> Self {
        Self {
            private_key,
            credentials,
        }
    }

    /// Load the private key and credential resources named in the config
    pub async fn load(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let private_pem = load_resource(&config.private_key_location).await?;
        let encrypted_credentials = load_resource(&config.credentials_location).await?;

        let context = Self::from_pem(&private_pem, &encrypted_credentials)?;
        info!(user = context.credentials.user(), "Security context loaded");
        Ok(context)
    }

    /// Build from PEM private key text and the encrypted credentials text
    pub fn from_pem(private_pem: &str, encrypted_credentials: &str) -> Result<Self, GatewayError> {
        let private_key = decode_private_key(private_pem)?;

        let data = encrypted_credentials.trim();
        if data.is_empty() {
            return Err(GatewayError::SecurityInvalid {
                reason: "credentials data is empty".to_string(),
            });
        }

        let plain = decrypt(&private_key, data).map_err(|reason| GatewayError::SecurityInvalid {
            reason: format!("could not decrypt credentials: {reason}"),
        })?;

        let credentials = Credentials::parse(&plain)?;
        Ok(Self::new(private_key, credentials))
    }

    /// Decrypt one base64 request field. Blank plaintext is a failure.
    pub fn decrypt_field(&self, field: &str, cipher_text: &str) -> Result<String, GatewayError> {
        match decrypt(&self.private_key, cipher_text) {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => {
                warn!(field, "Field decrypted to blank text");
                Err(GatewayError::RequestMalformed {
                    field: field.to_string(),
                })
            }
            Err(reason) => {
                warn!(field, reason, "Field could not be decrypted");
                Err(GatewayError::RequestMalformed {
                    field: field.to_string(),
                })
            }
        }
    }

    /// Check a user/password pair against the accepted credentials
    pub fn validate_credentials(&self, user: &str, password: &str) -> bool {
        self.credentials.matches(user, password)
    }

    /// Form-encode response fields as `key=value&key=value`, in order
    pub fn encode_response_payload<K, V>(&self, fields: &[(K, V)]) -> String
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        encode_form(fields)
    }
}

/// Form-encode ordered pairs, percent-encoding keys and values
pub fn encode_form<K, V>(fields: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
        .finish()
}

fn decrypt(key: &RsaPrivateKey, data: &str) -> Result<String, &'static str> {
    let bytes = STANDARD
        .decode(data.trim().as_bytes())
        .map_err(|_| "invalid base64")?;
    let plain = key
        .decrypt(Pkcs1v15Encrypt, &bytes)
        .map_err(|_| "decryption failed")?;
    String::from_utf8(plain).map_err(|_| "plaintext is not UTF-8")
}
