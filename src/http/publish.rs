//! Publish endpoint
//!
//! Accepts a form-encoded body of encrypted fields and answers with a
//! form-encoded reply. Rejections carry a fixed short text, never the
//! underlying error.

use super::AppState;
use crate::error::GatewayError;
use super::PUBLISH_PATH;
use axum::{
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request, State},
    http::{request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{error, info};

/// Caller address as seen by the listener
#[derive(Debug, Clone)]
pub struct RemoteAddr(pub String);

impl<S: Send + Sync> FromRequestParts<S> for RemoteAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(addr))
    }
}

fn rejection_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::RequestMalformed { .. } | GatewayError::ChannelInvalid { .. } => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::AuthFailed { .. } => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST handler for the publish endpoint
pub async fn publish_handler(
    State(state): State<AppState>,
    RemoteAddr(remote): RemoteAddr,
    Form(raw): Form<HashMap<String, String>>,
) -> Response {
    respond(&state, &remote, &raw).await
}

async fn respond(state: &AppState, remote: &str, raw: &HashMap<String, String>) -> Response {
    match state.gateway.handle(raw, remote).await {
        Ok(reply) => {
            let result = if reply.outcome.success { "ok" } else { "failed" };
            crate::metrics::record_request(result);
            info!(call_id = reply.call_id, remote, code = %reply.outcome.code, "Publish request complete");
            (StatusCode::OK, reply.body).into_response()
        }
        Err(e) => {
            crate::metrics::record_request(e.error_type_label());
            crate::metrics::record_error(&e);
            error!(remote, error = %e, "Publish request rejected");

            let message = e.caller_message().unwrap_or("internal error");
            (rejection_status(&e), message).into_response()
        }
    }
}

/// GET, PUT and DELETE on the publish endpoint
pub async fn method_disabled(RemoteAddr(remote): RemoteAddr, method: Method) -> Response {
    disabled(&remote, &method)
}

fn disabled(remote: &str, method: &Method) -> Response {
    error!(remote, %method, "Method disabled");
    (StatusCode::NOT_IMPLEMENTED, "method disabled").into_response()
}

/// Requests matching no route.
///
/// GET, PUT and DELETE are disabled everywhere. The publish path matches
/// regardless of case; any other POST is an invalid endpoint.
pub async fn fallback(
    State(state): State<AppState>,
    RemoteAddr(remote): RemoteAddr,
    request: Request,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    if matches!(method, Method::GET | Method::PUT | Method::DELETE) {
        return disabled(&remote, &method);
    }

    if method == Method::POST && path.eq_ignore_ascii_case(PUBLISH_PATH) {
        return match Form::<HashMap<String, String>>::from_request(request, &state).await {
            Ok(Form(raw)) => respond(&state, &remote, &raw).await,
            Err(rejection) => rejection.into_response(),
        };
    }

    error!(remote, %method, path = %path, "Invalid endpoint");
    (StatusCode::METHOD_NOT_ALLOWED, "invalid endpoint").into_response()
}
