//! Proxy collaborator.
//!
//! The dispatcher decides *where* a call goes; an [`Upstream`] performs it.
//! [`HttpUpstream`] is the production implementation on top of the
//! hyper-util pooled client. Tests plug in their own.

use std::future::Future;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::http::response::strip_hop_by_hop;
use crate::registry::Instance;

/// A forwarded call that never produced a response.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream uri: {0}")]
    InvalidUri(String),

    #[error("upstream request failed: {0}")]
    Request(String),
}

/// Performs the network exchange with one chosen instance.
///
/// Implementations must not impose their own deadline; the dispatcher
/// bounds every call.
pub trait Upstream: Send + Sync + 'static {
    fn forward(
        &self,
        instance: &Instance,
        service: &ServiceConfig,
        request: Request<Body>,
    ) -> impl Future<Output = Result<Response<Body>, UpstreamError>> + Send;
}

/// HTTP/1.1 + HTTP/2 forwarding through a pooled hyper client.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client<HttpConnector, Body>,
}

impl HttpUpstream {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

impl Upstream for HttpUpstream {
    async fn forward(
        &self,
        instance: &Instance,
        service: &ServiceConfig,
        request: Request<Body>,
    ) -> Result<Response<Body>, UpstreamError> {
        let request = outbound_request(instance, service, request)?;

        let response: Response<Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Rewrite an inbound request for `instance`: target URI, connection-scoped
/// headers dropped, the service's fixed headers applied.
fn outbound_request(
    instance: &Instance,
    service: &ServiceConfig,
    request: Request<Body>,
) -> Result<Request<Body>, UpstreamError> {
    let (mut parts, body) = request.into_parts();

    parts.uri = upstream_uri(instance, &parts.uri)?;
    strip_hop_by_hop(&mut parts.headers);
    // hyper fills Host from the rewritten URI.
    parts.headers.remove(header::HOST);
    if let Some(fixed) = &service.headers {
        for (name, value) in fixed {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    parts.headers.insert(name, value);
                }
                _ => tracing::warn!(
                    service = %service.id,
                    header = %name,
                    "Skipping invalid fixed header"
                ),
            }
        }
    }

    Ok(Request::from_parts(parts, body))
}

/// `base_url` (including any path prefix) followed by the inbound path and query.
fn upstream_uri(instance: &Instance, inbound: &Uri) -> Result<Uri, UpstreamError> {
    let path_and_query = inbound
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!(
        "{}{}",
        instance.base_url().as_str().trim_end_matches('/'),
        path_and_query
    );
    target
        .parse::<Uri>()
        .map_err(|e| UpstreamError::InvalidUri(format!("{}: {}", target, e)))
}
