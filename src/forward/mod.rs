//! Traffic forwarding: the terminal handlers that actually leave the proxy.
//!
//! A [`Forwarder`] bundles the plain HTTP reverse-proxy path and the
//! websocket relay path and picks between them per request. It is usually
//! installed as a final handler, either directly ([`Forwarder::into_handler`])
//! or bound to a fixed upstream with [`to`].
use std::sync::Arc;

use ::http::uri::{Authority, PathAndQuery, Scheme, Uri};
use ::http::{header, HeaderValue};
use once_cell::sync::Lazy;

use crate::{
    adapters,
    core::handler::{Handler, HttpRequest, HttpResponse},
    error::Error,
    ports::{DefaultErrorHandler, ErrorHandler, Rewriter, RoundTripper},
};

pub mod headers;
mod http;
mod ws;

pub use headers::{remove_hop_by_hop_headers, HeaderRewriter, HOP_BY_HOP_HEADERS};

/// Dual-mode traffic forwarder. Immutable once built; cheap to share.
pub struct Forwarder {
    pub(crate) pass_host_header: bool,
    pub(crate) round_tripper: Arc<dyn RoundTripper>,
    pub(crate) rewriter: Arc<dyn Rewriter>,
    pub(crate) websocket_rewriter: Option<Arc<dyn Rewriter>>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
    pub(crate) tls_config: Arc<rustls::ClientConfig>,
}

/// Options for assembling a [`Forwarder`]. Every field has a default: shared
/// platform TLS roots, the Hyper transport, the `X-Forwarded-*` rewriter and
/// a logging 502 error handler.
#[derive(Default)]
pub struct ForwarderBuilder {
    pass_host_header: bool,
    round_tripper: Option<Arc<dyn RoundTripper>>,
    rewriter: Option<Arc<dyn Rewriter>>,
    websocket_rewriter: Option<Arc<dyn Rewriter>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl ForwarderBuilder {
    /// Delegate the client's `Host` header to the upstream instead of
    /// rewriting it.
    pub fn pass_host_header(mut self, pass: bool) -> Self {
        self.pass_host_header = pass;
        self
    }

    /// Override the upstream transport.
    pub fn round_tripper(mut self, rt: Arc<dyn RoundTripper>) -> Self {
        self.round_tripper = Some(rt);
        self
    }

    /// Override the outbound request rewriter.
    pub fn rewriter(mut self, rw: Arc<dyn Rewriter>) -> Self {
        self.rewriter = Some(rw);
        self
    }

    /// Install a rewriter applied to websocket handshakes only.
    pub fn websocket_rewriter(mut self, rw: Arc<dyn Rewriter>) -> Self {
        self.websocket_rewriter = Some(rw);
        self
    }

    /// Override the sink for transport and hijack failures.
    pub fn error_handler(mut self, eh: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(eh);
        self
    }

    /// TLS client configuration used for `wss` upstreams and, unless a custom
    /// transport is supplied, for HTTPS round-trips.
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    pub fn build(self) -> Result<Forwarder, Error> {
        let tls_config = self
            .tls_config
            .unwrap_or_else(adapters::default_tls_config);
        let round_tripper = match self.round_tripper {
            Some(rt) => rt,
            None => Arc::new(
                adapters::HttpTransport::with_tls_config(tls_config.clone())
                    .map_err(|e| Error::ForwarderSetup(e.to_string()))?,
            ),
        };
        Ok(Forwarder {
            pass_host_header: self.pass_host_header,
            round_tripper,
            rewriter: self
                .rewriter
                .unwrap_or_else(|| Arc::new(HeaderRewriter::default())),
            websocket_rewriter: self.websocket_rewriter,
            error_handler: self
                .error_handler
                .unwrap_or_else(|| Arc::new(DefaultErrorHandler)),
            tls_config,
        })
    }
}

impl Forwarder {
    pub fn builder() -> ForwarderBuilder {
        ForwarderBuilder::default()
    }

    /// Forward one request, choosing the websocket relay for upgrade
    /// handshakes and the HTTP round-trip for everything else.
    pub async fn serve(&self, req: HttpRequest) -> HttpResponse {
        if is_websocket_request(&req) {
            self.serve_ws(req).await
        } else {
            self.serve_http(req).await
        }
    }

    /// Wrap the forwarder into the canonical handler shape.
    pub fn into_handler(self) -> Handler {
        let forwarder = Arc::new(self);
        Arc::new(move |req| -> crate::core::handler::HandlerFuture {
            let forwarder = Arc::clone(&forwarder);
            Box::pin(async move { forwarder.serve(req).await })
        })
    }
}

/// A websocket handshake carries `Connection: upgrade` and
/// `Upgrade: websocket`, matched as case-insensitive list membership. Other
/// upgrade protocols are not claimed and take the HTTP path.
pub fn is_websocket_request(req: &HttpRequest) -> bool {
    contains_header_token(req, header::CONNECTION.as_str(), "upgrade")
        && contains_header_token(req, header::UPGRADE.as_str(), "websocket")
}

fn contains_header_token(req: &HttpRequest, name: &str, token: &str) -> bool {
    req.headers()
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// Build a terminal handler forwarding every request to the server at `uri`.
/// The target is validated here, at registration time.
pub fn to(uri: &str) -> Result<Handler, Error> {
    let target: Uri = uri.parse().map_err(|e: ::http::uri::InvalidUri| {
        Error::InvalidForwardUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        }
    })?;
    let authority = target
        .authority()
        .cloned()
        .ok_or_else(|| Error::InvalidForwardUri {
            uri: uri.to_string(),
            reason: "missing host".to_string(),
        })?;
    let scheme = target.scheme().cloned().unwrap_or(Scheme::HTTP);

    let forwarder = Arc::new(
        Forwarder::builder()
            .pass_host_header(true)
            .build()?,
    );

    Ok(Arc::new(
        move |mut req: HttpRequest| -> crate::core::handler::HandlerFuture {
            let forwarder = Arc::clone(&forwarder);
            retarget(&mut req, &scheme, &authority);
            Box::pin(async move { forwarder.serve(req).await })
        },
    ))
}

/// Point `req` at the fixed upstream: URI scheme and host swapped, `Host`
/// header aligned with the new destination.
fn retarget(req: &mut HttpRequest, scheme: &Scheme, authority: &Authority) {
    let mut parts = req.uri().clone().into_parts();
    parts.scheme = Some(scheme.clone());
    parts.authority = Some(authority.clone());
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    if let Ok(uri) = Uri::from_parts(parts) {
        *req.uri_mut() = uri;
    }
    if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
        req.headers_mut().insert(header::HOST, host);
    }
}

/// Shared default forwarder: delegates the client `Host`, replies
/// `502 Bad Gateway` when the request cannot be routed upstream.
pub fn default_forwarder() -> Handler {
    static DEFAULT: Lazy<Handler> = Lazy::new(|| {
        match Forwarder::builder().pass_host_header(true).build() {
            Ok(forwarder) => forwarder.into_handler(),
            Err(e) => {
                tracing::error!(error = %e, "default forwarder construction failed");
                crate::core::layer::default_final_handler()
            }
        }
    });
    DEFAULT.clone()
}
