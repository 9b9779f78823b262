use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use http::header;
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;

use crate::{
    core::handler::{HttpRequest, HttpResponse},
    ports::{RoundTripError, RoundTripResult, RoundTripper},
};

/// Default upstream transport: Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Responsibilities:
/// * Loads native root certificates into a shared TLS client config
/// * Executes the exchange the forwarder prepared, without touching its
///   headers or version
/// * Converts the Hyper response body into the uniform body type
///
/// This adapter is intentionally minimal; retries or circuit breaking belong
/// in a custom [`RoundTripper`] layered on top.
pub struct HttpTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HttpTransport {
    /// Create a transport using native roots for upstream TLS.
    pub fn new() -> Result<Self> {
        Self::with_tls_config(default_tls_config())
    }

    /// Create a transport from an explicit TLS client configuration.
    pub fn with_tls_config(tls_config: std::sync::Arc<rustls::ClientConfig>) -> Result<Self> {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config.as_ref().clone())
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Body>(https_connector);
        Ok(Self { client })
    }
}

/// Build a TLS client configuration backed by the platform trust store.
/// Certificates that fail to load are skipped with a warning.
pub fn default_tls_config() -> std::sync::Arc<rustls::ClientConfig> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut root_cert_store = rustls::RootCertStore::empty();
    let native_certs = load_native_certs();

    for cert in native_certs.certs {
        if root_cert_store.add(cert).is_err() {
            tracing::warn!("failed to add native certificate to the root store");
        }
    }
    if !native_certs.errors.is_empty() {
        tracing::warn!(
            errors = ?native_certs.errors,
            "some native certificates failed to load"
        );
    }

    std::sync::Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth(),
    )
}

#[async_trait]
impl RoundTripper for HttpTransport {
    async fn round_trip(&self, req: HttpRequest) -> RoundTripResult<HttpResponse> {
        if req.uri().host().is_none() {
            return Err(RoundTripError::InvalidRequest(format!(
                "outgoing URI has no host: {}",
                req.uri()
            )));
        }

        let method = req.method().clone();
        let uri = req.uri().clone();

        match self.client.request(req).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();
                // The body arrives decoded; the server side re-frames it.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(http::Response::from_parts(parts, Body::new(hyper_body)))
            }
            Err(e) => Err(RoundTripError::Connection(format!(
                "request to {method} {uri} failed: {e}"
            ))),
        }
    }
}
