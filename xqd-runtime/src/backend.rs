//! The `Backend` domain object and the default `BackendHandler` used to dispatch subrequests
//! (§3 "Backend", §4.6).

use std::time::Duration;

use http::request::Parts as RequestParts;
use http::response::Parts as ResponseParts;
use xqd_shared::SslVersion;

use crate::http::body::BodyObj;
use crate::http::request::pending::SendError;

/// The maximum length in characters of a backend name, carried over from the teacher's
/// `fastly::backend` module.
pub const MAX_BACKEND_NAME_LEN: usize = 255;

/// A registered backend: everything the default `HyperBackendHandler` (or a substitute
/// `BackendHandler`) needs in order to dispatch a request.
#[derive(Debug, Clone)]
pub struct Backend {
    pub name: String,
    pub target: String,
    pub override_host: Option<String>,
    pub connect_timeout: Duration,
    pub first_byte_timeout: Duration,
    pub between_bytes_timeout: Duration,
    pub use_ssl: bool,
    pub min_tls_version: Option<SslVersion>,
    pub max_tls_version: Option<SslVersion>,
    pub http_keepalive: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
    pub max_connections: Option<u32>,
    pub is_dynamic: bool,
}

impl Backend {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            override_host: None,
            connect_timeout: Duration::from_millis(1_000),
            first_byte_timeout: Duration::from_millis(15_000),
            between_bytes_timeout: Duration::from_millis(10_000),
            use_ssl: false,
            min_tls_version: None,
            max_tls_version: None,
            http_keepalive: None,
            tcp_keepalive: None,
            max_connections: None,
            is_dynamic: false,
        }
    }
}

/// The capability a registry wires in for subrequest dispatch. Bound `Send + Sync` so a single
/// `Arc<dyn BackendHandler>` can be shared across every instance's tokio tasks.
#[async_trait::async_trait]
pub trait BackendHandler: Send + Sync {
    async fn send(
        &self,
        backend: &Backend,
        parts: RequestParts,
        body: BodyObj,
    ) -> Result<(ResponseParts, BodyObj), SendError>;
}

/// The default `BackendHandler`, backed by `hyper::Client`, shipped for the example binary and
/// integration tests (§4.6). The core itself depends only on the `BackendHandler` trait.
pub struct HyperBackendHandler {
    client: hyper::Client<hyper::client::HttpConnector>,
}

impl Default for HyperBackendHandler {
    fn default() -> Self {
        Self {
            client: hyper::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl BackendHandler for HyperBackendHandler {
    async fn send(
        &self,
        backend: &Backend,
        mut parts: RequestParts,
        body: BodyObj,
    ) -> Result<(ResponseParts, BodyObj), SendError> {
        let body_bytes = match body {
            BodyObj::Buffered(b) => b.as_slice().to_vec(),
            BodyObj::Streaming(_) => Vec::new(),
        };

        let target_uri: http::Uri = backend
            .target
            .parse()
            .map_err(|_| SendError::UnknownBackend(backend.name.clone()))?;
        let authority = target_uri
            .authority()
            .cloned()
            .ok_or_else(|| SendError::UnknownBackend(backend.name.clone()))?;
        let mut uri_parts = parts.uri.into_parts();
        uri_parts.scheme = target_uri.scheme().cloned();
        uri_parts.authority = Some(authority);
        parts.uri = http::Uri::from_parts(uri_parts)
            .map_err(|e| SendError::InvalidResponse(e.to_string()))?;

        let hyper_req = hyper::Request::from_parts(parts, hyper::Body::from(body_bytes));

        let response = tokio::time::timeout(backend.connect_timeout, self.client.request(hyper_req))
            .await
            .map_err(|_| SendError::ConnectTimeout)?
            .map_err(|e| SendError::ConnectionFailed(e.to_string()))?;

        let (resp_parts, hyper_body) = response.into_parts();
        let bytes = tokio::time::timeout(
            backend.first_byte_timeout,
            hyper::body::to_bytes(hyper_body),
        )
        .await
        .map_err(|_| SendError::FirstByteTimeout)?
        .map_err(|e| SendError::InvalidResponse(e.to_string()))?;

        Ok((
            resp_parts,
            BodyObj::Buffered(crate::http::body::BufferedBody::from_bytes(bytes)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_backend_has_sane_default_timeouts() {
        let backend = Backend::new("origin", "https://example.org");
        assert_eq!(backend.connect_timeout, Duration::from_millis(1_000));
        assert!(!backend.is_dynamic);
    }
}
