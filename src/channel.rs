//! Channel name validation
//!
//! A channel is a caller-supplied destination. Names are limited to letters,
//! digits, dot and slash, and may not contain `..`.

use crate::error::GatewayError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[/a-zA-Z0-9.]+$").expect("channel pattern compiles"))
}

/// A validated channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel(String);

impl Channel {
    pub fn parse(name: &str) -> Result<Self, GatewayError> {
        if !pattern().is_match(name) || name.contains("..") {
            return Err(GatewayError::ChannelInvalid {
                channel: name.to_string(),
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_safe_names() {
        for name in ["orders.created", "queue/orders", "A1.b2/C3", "x"] {
            assert_eq!(Channel::parse(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_rejects_unsafe_names() {
        for name in ["", "../etc/passwd", "orders..created", "orders created", "orders*", "a>b", "naïve", "a\nb"] {
            let err = Channel::parse(name).unwrap_err();
            assert_eq!(err.error_type_label(), "channel_invalid", "{name:?} should be rejected");
        }
    }
}
