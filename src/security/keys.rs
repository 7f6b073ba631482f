//! PEM key decoding
//!
//! Keys arrive as PEM text. The armor lines for the wanted kind are stripped,
//! the body is base64-decoded and the DER is parsed directly: PKCS#8 for
//! private keys, SubjectPublicKeyInfo for public keys.

use crate::error::GatewayError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

/// Which half of the key pair a PEM document holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Private,
    Public,
}

impl KeyKind {
    fn armor_label(self) -> &'static str {
        match self {
            KeyKind::Private => "PRIVATE",
            KeyKind::Public => "PUBLIC",
        }
    }
}

/// A decoded RSA key
#[derive(Debug, Clone)]
pub enum RsaKey {
    Private(RsaPrivateKey),
    Public(RsaPublicKey),
}

fn invalid(kind: KeyKind, detail: impl std::fmt::Display) -> GatewayError {
    GatewayError::SecurityInvalid {
        reason: format!("malformed {} key: {detail}", kind.armor_label().to_lowercase()),
    }
}

/// Decode PEM text into a key of the wanted kind
pub fn decode_key(pem: &str, kind: KeyKind) -> Result<RsaKey, GatewayError> {
    let label = kind.armor_label();
    let body: String = pem
        .replace(&format!("-----BEGIN {label} KEY-----"), "")
        .replace(&format!("-----END {label} KEY-----"), "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if body.is_empty() {
        return Err(invalid(kind, "empty key body"));
    }

    let der = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| invalid(kind, e))?;

    match kind {
        KeyKind::Private => RsaPrivateKey::from_pkcs8_der(&der)
            .map(RsaKey::Private)
            .map_err(|e| invalid(kind, e)),
        KeyKind::Public => RsaPublicKey::from_public_key_der(&der)
            .map(RsaKey::Public)
            .map_err(|e| invalid(kind, e)),
    }
}

/// Decode a PKCS#8 PEM private key
pub fn decode_private_key(pem: &str) -> Result<RsaPrivateKey, GatewayError> {
    match decode_key(pem, KeyKind::Private)? {
        RsaKey::Private(key) => Ok(key),
        RsaKey::Public(_) => Err(invalid(KeyKind::Private, "public key supplied")),
    }
}
