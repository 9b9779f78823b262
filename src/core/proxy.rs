//! The top-level proxy: one middleware layer composed with one router.
//!
//! Construction wires the two together: the router's parent is the proxy
//! layer and the router itself sits at the tail of the proxy's request phase,
//! so proxy-wide middleware always runs before route dispatch. The default
//! final handler forwards to wherever the request URI points (delegating the
//! client `Host`); [`Proxy::forward`] rebinds it to a fixed upstream.
use std::{
    convert::Infallible,
    task::{Context as TaskContext, Poll},
    time::Instant,
};

use http::{header, uri::Scheme, Uri};
use tracing::Instrument;

use crate::{
    core::{
        context::{self, Context},
        handler::{Handler, HttpRequest, HttpResponse, Middleware},
        layer::{Layer, REQUEST_PHASE},
        mux::{Matcher, Mux},
        route::Route,
        router::Router,
        stack::Priority,
    },
    error::Error,
    forward, metrics, tracing_setup,
};

/// The proxy façade. Clones are handles to the same proxy.
#[derive(Clone)]
pub struct Proxy {
    layer: Layer,
    router: Router,
}

impl Proxy {
    pub fn new() -> Self {
        let proxy = Self {
            layer: Layer::new(),
            router: Router::new(),
        };
        proxy.router.set_parent(&proxy.layer);
        proxy
            .layer
            .use_priority(REQUEST_PHASE, Priority::Tail, proxy.router.as_middleware());
        proxy.layer.use_final_handler(forward::default_forwarder());
        proxy
    }

    /// The proxy-level middleware layer.
    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// The built-in router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn head(&self, pattern: &str) -> Route {
        self.route("HEAD", pattern)
    }

    pub fn get(&self, pattern: &str) -> Route {
        self.route("GET", pattern)
    }

    pub fn post(&self, pattern: &str) -> Route {
        self.route("POST", pattern)
    }

    pub fn put(&self, pattern: &str) -> Route {
        self.route("PUT", pattern)
    }

    pub fn delete(&self, pattern: &str) -> Route {
        self.route("DELETE", pattern)
    }

    pub fn options(&self, pattern: &str) -> Route {
        self.route("OPTIONS", pattern)
    }

    pub fn patch(&self, pattern: &str) -> Route {
        self.route("PATCH", pattern)
    }

    /// Register a pattern for any HTTP method.
    pub fn all(&self, pattern: &str) -> Route {
        self.route("*", pattern)
    }

    /// Register a route for the given method and pattern.
    pub fn route(&self, method: &str, pattern: &str) -> Route {
        self.router.route(method, pattern)
    }

    /// Forward all unrouted traffic to the server at `uri`.
    pub fn forward(&self, uri: &str) -> Result<&Self, Error> {
        self.layer.use_final_handler(forward::to(uri)?);
        Ok(self)
    }

    /// Attach middleware to the proxy-wide request phase.
    pub fn use_middleware(&self, mw: Middleware) -> &Self {
        self.layer.use_phase(REQUEST_PHASE, mw);
        self
    }

    pub fn use_phase(&self, phase: &str, mw: Middleware) -> &Self {
        self.layer.use_phase(phase, mw);
        self
    }

    pub fn use_final_handler(&self, handler: Handler) -> &Self {
        self.layer.use_final_handler(handler);
        self
    }

    pub fn set_parent(&self, parent: &Layer) -> &Self {
        self.layer.set_parent(parent);
        self
    }

    /// Clear the proxy-wide middleware stacks. Note this also unhooks the
    /// router; it is mainly useful for tearing a proxy down in tests.
    pub fn flush(&self) {
        self.layer.flush();
    }

    /// Create a multiplexer guarded by `matchers` and attach it to the
    /// proxy-wide request phase.
    pub fn mux(&self, matchers: impl IntoIterator<Item = Matcher>) -> Mux {
        let mux = Mux::new();
        for matcher in matchers {
            mux.when(matcher);
        }
        self.layer.plug(&mux);
        mux
    }

    /// Handle one inbound request: record the original `Host`, bind it into
    /// the request URI and run the request phase.
    pub async fn serve(&self, mut req: HttpRequest) -> HttpResponse {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let method = req.method().as_str().to_string();
        let path = req.uri().path().to_string();
        let span = tracing_setup::create_request_span(&method, &path, &request_id);
        metrics::record_request(&method);

        let layer = self.layer.clone();
        async move {
            let ctx = Context::ensure(&mut req);
            if let Some(host) = original_host(&req) {
                ctx.set(context::HOST_KEY, host.clone());
                bind_authority(&mut req, &host);
            }

            let response = layer.run(REQUEST_PHASE, req, None).await;

            let duration = started.elapsed();
            let status = response.status().as_u16();
            tracing::Span::current().record("http.status_code", status);
            tracing::Span::current().record("duration_ms", duration.as_millis() as u64);
            tracing::info!(
                status,
                duration_ms = duration.as_millis() as u64,
                "request completed"
            );
            metrics::record_request_duration(status, duration);
            response
        }
        .instrument(span)
        .await
    }

    /// Wrap the proxy into a `tower::Service` for mounting on any Hyper or
    /// Axum server.
    pub fn into_service(self) -> ProxyService {
        ProxyService { proxy: self }
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new()
    }
}

/// The `Host` the client addressed: header first, URI authority fallback.
fn original_host(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .filter(|host| !host.is_empty())
}

/// Rebind the request URI's authority to `host` so the default forwarder has
/// a destination. Requests already carrying an absolute URI keep theirs.
fn bind_authority(req: &mut HttpRequest, host: &str) {
    let mut parts = req.uri().clone().into_parts();
    let authority = match host.parse() {
        Ok(authority) => authority,
        Err(_) => return,
    };
    parts.authority = Some(authority);
    if parts.scheme.is_none() {
        parts.scheme = Some(Scheme::HTTP);
    }
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(http::uri::PathAndQuery::from_static("/"));
    }
    if let Ok(uri) = Uri::from_parts(parts) {
        *req.uri_mut() = uri;
    }
}

/// `tower::Service` adapter over a [`Proxy`].
#[derive(Clone)]
pub struct ProxyService {
    proxy: Proxy,
}

impl tower::Service<HttpRequest> for ProxyService {
    type Response = HttpResponse;
    type Error = Infallible;
    type Future = futures_util::future::BoxFuture<'static, Result<HttpResponse, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: HttpRequest) -> Self::Future {
        let proxy = self.proxy.clone();
        Box::pin(async move { Ok(proxy.serve(req).await) })
    }
}
