//! Accepted client credentials
//!
//! The decrypted credentials resource holds exactly two lines: user name,
//! then password.

use crate::error::GatewayError;

/// The single accepted user/password pair
#[derive(Clone)]
pub struct Credentials {
    user: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn invalid(reason: &str) -> GatewayError {
    GatewayError::SecurityInvalid {
        reason: reason.to_string(),
    }
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Parse decrypted `user\npassword` text
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let lines: Vec<&str> = text.trim().split('\n').collect();

        let [user, password] = lines.as_slice() else {
            return Err(invalid("wrong number of lines in credentials"));
        };

        let user = user.trim();
        if user.is_empty() {
            return Err(invalid("user credential empty"));
        }

        let password = password.trim();
        if password.is_empty() {
            return Err(invalid("password credential empty"));
        }

        Ok(Self::new(user, password))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Case-insensitive match of both user and password
    pub fn matches(&self, user: &str, password: &str) -> bool {
        // Evaluate both sides so a user mismatch costs the same as a password mismatch
        let user_ok = eq_ignore_case(user, &self.user);
        let password_ok = eq_ignore_case(password, &self.password);
        user_ok & password_ok
    }
}

/// Unicode case-insensitive equality
fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}
