//! A single routable endpoint: pattern, pipeline, terminal handler.
use std::sync::{Arc, PoisonError, RwLock};

use crate::{
    core::{
        handler::{Handler, HandlerFuture, HttpRequest, Middleware},
        layer::{Layer, REQUEST_PHASE},
        pattern::{self, Captures},
    },
    error::Error,
    forward,
};

/// An HTTP route: a URL pattern with its own middleware layer and final
/// handler (typically a forwarder). Clones are handles to the same route.
#[derive(Clone)]
pub struct Route {
    pattern: Arc<str>,
    layer: Layer,
    handler: Arc<RwLock<Option<Handler>>>,
}

impl Route {
    /// Create a new route for the given URL path pattern.
    pub fn new(pattern: impl AsRef<str>) -> Self {
        Self {
            pattern: Arc::from(pattern.as_ref()),
            layer: Layer::new(),
            handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Access the route-level middleware layer.
    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Match an incoming path against the route pattern.
    pub fn matches(&self, path: &str) -> Option<Captures> {
        pattern::matches(&self.pattern, path)
    }

    /// The unmatched suffix of `path` for prefix patterns.
    pub fn tail<'a>(&self, path: &'a str) -> &'a str {
        pattern::tail(&self.pattern, path)
    }

    /// Forward traffic hitting this route to the server at `uri`.
    pub fn forward(&self, uri: &str) -> Result<&Self, Error> {
        self.layer.use_final_handler(forward::to(uri)?);
        Ok(self)
    }

    /// Install a custom terminal handler. Only needed when the route must be
    /// answered in a very specific way.
    pub fn handle(&self, handler: Handler) -> &Self {
        *self.terminal_slot() = Some(handler);
        self
    }

    /// Convenience for [`Route::handle`] over an async closure.
    pub fn handle_fn<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::core::handler::HttpResponse> + Send + 'static,
    {
        self.handle(crate::core::handler::handler_fn(f))
    }

    /// Attach middleware to the route's request phase. Installing middleware
    /// gives the route the shared default forwarder as terminal unless one
    /// was configured already.
    pub fn use_middleware(&self, mw: Middleware) -> &Self {
        {
            let mut terminal = self.terminal_slot();
            if terminal.is_none() {
                *terminal = Some(forward::default_forwarder());
            }
        }
        self.layer.use_phase(REQUEST_PHASE, mw);
        self
    }

    /// Attach middleware to a specific phase of the route pipeline.
    pub fn use_phase(&self, phase: &str, mw: Middleware) -> &Self {
        self.layer.use_phase(phase, mw);
        self
    }

    pub fn use_final_handler(&self, handler: Handler) -> &Self {
        self.layer.use_final_handler(handler);
        self
    }

    /// Install the owning router's layer as parent. Called via inversion of
    /// control during registration.
    pub fn set_parent(&self, parent: &Layer) -> &Self {
        self.layer.set_parent(parent);
        self
    }

    pub fn flush(&self) {
        self.layer.flush();
    }

    /// Run the route pipeline: its own request phase wrapping the terminal
    /// handler (or the layer's final handler when no terminal is set).
    pub fn serve(&self, req: HttpRequest) -> HandlerFuture {
        self.layer.run(REQUEST_PHASE, req, self.terminal())
    }

    /// The route as a canonical handler, e.g. for aliasing registrations.
    pub fn as_handler(&self) -> Handler {
        let route = self.clone();
        Arc::new(move |req| route.serve(req))
    }

    fn terminal(&self) -> Option<Handler> {
        self.terminal_slot().clone()
    }

    fn terminal_slot(&self) -> std::sync::RwLockWriteGuard<'_, Option<Handler>> {
        self.handler.write().unwrap_or_else(PoisonError::into_inner)
    }
}
