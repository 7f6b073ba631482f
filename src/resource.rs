//! Resource loading for key and credential files

use crate::error::GatewayError;
use std::path::Path;
use tracing::error;

/// Read a text resource from disk
pub async fn load_resource(location: &Path) -> Result<String, GatewayError> {
    tokio::fs::read_to_string(location).await.map_err(|e| {
        error!(location = %location.display(), error = %e, "Could not load resource");
        GatewayError::SecurityInvalid {
            reason: format!("could not load resource '{}'", location.display()),
        }
    })
}
