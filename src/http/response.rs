//! Response handling.
//!
//! # Responsibilities
//! - Render gateway errors as small JSON bodies with a stable status
//! - Strip hop-by-hop headers from proxied requests and responses
//!
//! # Design Decisions
//! - Bodies carry only the error kind and its display text, never internals
//! - `CircuitOpen` advertises the remaining cooldown in `retry-after`
//! - Streaming responses are passed through without buffering

use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::GatewayError;

const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            GatewayError::CircuitOpen { retry_after, .. } => {
                // Whole seconds, rounded up.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs)
            }
            _ => None,
        };

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Remove connection-scoped headers before a message leaves the gateway.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::TRANSFER_ENCODING);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = GatewayError::NoHealthyInstances("payments".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());

        let json = body_json(response).await;
        assert_eq!(json["error"], "no_healthy_instances");
        assert_eq!(json["message"], "no healthy instances for service 'payments'");
    }

    #[tokio::test]
    async fn test_circuit_open_retry_after_rounds_up() {
        let response = GatewayError::CircuitOpen {
            service: "payments".into(),
            retry_after: Duration::from_millis(12_300),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "13");
        assert_eq!(body_json(response).await["error"], "circuit_open");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::CONTENT_TYPE).is_some());
    }
}
