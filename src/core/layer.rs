//! Multi-phase middleware pipeline with hierarchical inheritance and fault
//! recovery.
//!
//! A [`Layer`] maps phase names to priority [`Stack`]s and owns a terminal
//! final handler. Two phases are built in: [`REQUEST_PHASE`] for normal flow
//! and [`ERROR_PHASE`] for recovery flow; callers may run any additional
//! named phase.
//!
//! Non-request phases are inherited: when a parent layer is installed, running
//! such a phase executes the parent chain first, with the local chain as its
//! downstream continuation. The request phase stays local — chaining layers
//! for normal traffic is an explicit composition choice.
//!
//! A panic escaping any non-error phase is caught exactly once (by the guard
//! of the outer-most delegated layer), recorded in the request [`Context`]
//! under [`context::ERROR_KEY`], and converted into a single error-phase
//! execution. Since no bytes hit the wire until a response value is produced,
//! the error phase has full control over status and body.
use std::{
    any::Any,
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use axum::body::Body;
use futures_util::FutureExt;
use http::{HeaderMap, Method, StatusCode, Uri, Version};

use crate::core::{
    context::{self, Context},
    handler::{handler_fn, Handler, HandlerFuture, HttpRequest, HttpResponse, Middleware, Registrable},
    stack::{Priority, Stack},
};

/// Phase tag for the normal request flow.
pub const REQUEST_PHASE: &str = "request";

/// Phase tag for the recovery flow.
pub const ERROR_PHASE: &str = "error";

/// Final handler used when a layer has no configured terminal: plain
/// `502 Bad Gateway`.
pub fn default_final_handler() -> Handler {
    handler_fn(|_req| async {
        http::Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(Body::from("Bad Gateway"))
            .unwrap_or_else(|_| HttpResponse::new(Body::empty()))
    })
}

/// Final handler terminating the error phase: plain `500 Proxy Error`.
pub fn default_error_handler() -> Handler {
    handler_fn(|_req| async {
        http::Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("Proxy Error"))
            .unwrap_or_else(|_| HttpResponse::new(Body::empty()))
    })
}

/// One middleware pipeline instance. Clones are handles to the same layer.
///
/// Layers follow a configure-first, serve-later contract: registration is
/// expected to finish before traffic arrives. Mutations are internally
/// serialized, so late registration will not corrupt state, but no ordering
/// guarantee is made towards requests already in flight.
#[derive(Clone, Default)]
pub struct Layer {
    shared: Arc<Shared>,
}

struct Shared {
    pool: RwLock<HashMap<String, Stack>>,
    parent: RwLock<Option<Layer>>,
    final_handler: Mutex<Handler>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            pool: RwLock::new(HashMap::new()),
            parent: RwLock::new(None),
            final_handler: Mutex::new(default_final_handler()),
        }
    }
}

impl Layer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register middleware on `phase` at normal priority.
    pub fn use_phase(&self, phase: &str, mw: Middleware) -> &Self {
        self.use_priority(phase, Priority::Normal, mw)
    }

    /// Register middleware on `phase` at an explicit priority.
    pub fn use_priority(&self, phase: &str, priority: Priority, mw: Middleware) -> &Self {
        let mut pool = self
            .shared
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        pool.entry(phase.to_string())
            .or_insert_with(Stack::new)
            .push(priority, mw);
        self
    }

    /// Let a pluggable entity attach its own handlers to this layer.
    pub fn plug(&self, entity: &dyn Registrable) -> &Self {
        entity.register(self);
        self
    }

    /// Replace the terminal handler invoked when a phase chain falls through.
    pub fn use_final_handler(&self, handler: Handler) -> &Self {
        *self
            .shared
            .final_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
        self
    }

    /// Install a parent layer for hierarchical phase inheritance. The link is
    /// a back-edge only; parents never learn about children.
    pub fn set_parent(&self, parent: &Layer) -> &Self {
        *self
            .shared
            .parent
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(parent.clone());
        self
    }

    /// Drop every registered stack. The final handler is retained.
    pub fn flush(&self) {
        self.shared
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of middleware entries registered for `phase`.
    pub fn phase_len(&self, phase: &str) -> usize {
        self.shared
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(phase)
            .map(Stack::len)
            .unwrap_or(0)
    }

    fn parent(&self) -> Option<Layer> {
        self.shared
            .parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn final_handler(&self) -> Handler {
        self.shared
            .final_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute the pipeline of `phase` for `req`.
    ///
    /// `downstream` is the continuation invoked when the chain falls through;
    /// when `None`, the layer's final handler takes its place.
    pub fn run(&self, phase: &str, req: HttpRequest, downstream: Option<Handler>) -> HandlerFuture {
        // Non-request phases inherit ancestor chains: the parent runs with the
        // local chain as its continuation.
        if phase != REQUEST_PHASE {
            if let Some(parent) = self.parent() {
                let child = self.clone();
                let child_phase = phase.to_string();
                let next: Handler =
                    Arc::new(move |req| child.run_local(&child_phase, req, downstream.clone()));
                return parent.run(phase, req, Some(next));
            }
        }

        if phase == ERROR_PHASE {
            return self.run_local(phase, req, downstream);
        }

        // Recovery guard. Only the layer actually executing chains installs
        // one, so a panic is recovered exactly once.
        let this = self.clone();
        let phase = phase.to_string();
        Box::pin(async move {
            let mut req = req;
            let ctx = Context::ensure(&mut req);
            let head = RequestHead::capture(&req, ctx);
            // Guard both chain construction and execution.
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                this.run_local(&phase, req, downstream)
            })) {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            match outcome {
                Ok(resp) => resp,
                Err(panic) => this.recover(head, panic).await,
            }
        })
    }

    /// Run this layer's own chain for `phase`, without inheritance or guard.
    fn run_local(
        &self,
        phase: &str,
        req: HttpRequest,
        downstream: Option<Handler>,
    ) -> HandlerFuture {
        let handler = downstream.unwrap_or_else(|| self.final_handler());
        let queue = {
            let pool = self
                .shared
                .pool
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            pool.get(phase).map(Stack::join)
        };
        match queue {
            None => handler(req),
            Some(queue) => {
                let mut handler = handler;
                for mw in queue.iter().rev() {
                    handler = mw(handler);
                }
                handler(req)
            }
        }
    }

    /// Convert a recovered panic into one error-phase execution. The local
    /// error chain runs first; its continuation climbs to the parent chain
    /// when one exists, and terminates in the default error responder.
    async fn recover(&self, head: RequestHead, panic: Box<dyn Any + Send>) -> HttpResponse {
        let message = panic_message(panic);
        tracing::error!(panic = %message, "request pipeline panicked, running error phase");
        head.ctx.set(context::ERROR_KEY, message);
        let req = head.into_request();

        let next: Handler = match self.parent() {
            Some(parent) => Arc::new(move |req| {
                parent.run(ERROR_PHASE, req, Some(default_error_handler()))
            }),
            None => default_error_handler(),
        };
        self.run_local(ERROR_PHASE, req, Some(next)).await
    }
}

/// Body-less snapshot of a request, kept outside the guarded future so the
/// error phase has a request to work with after a panic unwinds the original.
struct RequestHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    ctx: Context,
}

impl RequestHead {
    fn capture(req: &HttpRequest, ctx: Context) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
            ctx,
        }
    }

    fn into_request(self) -> HttpRequest {
        let mut req = http::Request::new(Body::empty());
        *req.method_mut() = self.method;
        *req.uri_mut() = self.uri;
        *req.version_mut() = self.version;
        *req.headers_mut() = self.headers;
        req.extensions_mut().insert(self.ctx);
        req
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unhandled panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handler::middleware;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> HttpRequest {
        http::Request::builder()
            .uri("/test")
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(resp: HttpResponse) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn set_header(name: &'static str, value: &'static str) -> Middleware {
        middleware::from_fn(move |req, next: Handler| async move {
            let mut resp = next(req).await;
            resp.headers_mut()
                .insert(name, http::HeaderValue::from_static(value));
            resp
        })
    }

    fn respond(status: u16, body: &'static str) -> Middleware {
        middleware::from_terminal(move |_req| async move {
            http::Response::builder()
                .status(status)
                .body(Body::from(body))
                .unwrap()
        })
    }

    #[tokio::test]
    async fn middleware_wraps_final_handler() {
        let layer = Layer::new();
        layer.use_phase(REQUEST_PHASE, set_header("foo", "bar"));
        assert_eq!(layer.phase_len(REQUEST_PHASE), 1);

        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.headers()["foo"], "bar");
    }

    #[tokio::test]
    async fn empty_layer_replies_bad_gateway() {
        let layer = Layer::new();
        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_string(resp).await, "Bad Gateway");
    }

    #[tokio::test]
    async fn custom_final_handler_terminates_chain() {
        let layer = Layer::new();
        layer.use_final_handler(handler_fn(|_req| async {
            http::Response::builder()
                .status(503)
                .body(Body::from("service unavailable"))
                .unwrap()
        }));
        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.status(), 503);
        assert_eq!(body_string(resp).await, "service unavailable");
    }

    #[tokio::test]
    async fn panic_runs_error_phase_default() {
        let layer = Layer::new();
        layer.use_phase(
            REQUEST_PHASE,
            middleware::from_fn(|_req, _next: Handler| async move {
                panic!("something went wrong");
            }),
        );

        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(resp).await, "Proxy Error");
    }

    #[tokio::test]
    async fn panic_exposes_fault_in_context() {
        let layer = Layer::new();
        layer.use_phase(
            REQUEST_PHASE,
            middleware::from_fn(|_req, _next: Handler| async move {
                panic!("boom");
            }),
        );
        layer.use_phase(
            ERROR_PHASE,
            middleware::from_fn(|req, _next: Handler| async move {
                let fault = Context::of(&req)
                    .and_then(|ctx| ctx.get_string(context::ERROR_KEY))
                    .unwrap_or_default();
                http::Response::builder()
                    .status(500)
                    .body(Body::from(fault))
                    .unwrap()
            }),
        );

        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(body_string(resp).await, "boom");
    }

    #[tokio::test]
    async fn error_phase_runs_exactly_once_per_panic() {
        let layer = Layer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = runs.clone();
        layer.use_phase(
            REQUEST_PHASE,
            middleware::from_fn(|_req, _next: Handler| async move {
                panic!("boom");
            }),
        );
        layer.use_phase(
            ERROR_PHASE,
            middleware::from_fn(move |req, next: Handler| {
                seen.fetch_add(1, Ordering::SeqCst);
                async move { next(req).await }
            }),
        );

        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn phase_isolation() {
        let layer = Layer::new();
        let touched = Arc::new(AtomicUsize::new(0));
        let counter = touched.clone();
        layer.use_phase(
            "audit",
            middleware::from_fn(move |req, next: Handler| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { next(req).await }
            }),
        );
        layer.use_phase(REQUEST_PHASE, respond(200, "ok"));

        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(touched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn custom_phase_runs_parent_chain_first() {
        let parent = Layer::new();
        let child = Layer::new();
        child.set_parent(&parent);

        parent.use_phase("foo", set_header("foo", "foo"));
        child.use_phase("foo", set_header("bar", "bar"));
        child.use_phase("foo", respond(200, "hello world"));

        let resp = child.run("foo", request(), None).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["foo"], "foo");
        assert_eq!(resp.headers()["bar"], "bar");
        assert_eq!(body_string(resp).await, "hello world");
    }

    #[tokio::test]
    async fn parent_short_circuit_skips_child_chain() {
        let parent = Layer::new();
        let child = Layer::new();
        child.set_parent(&parent);

        parent.use_phase("foo", set_header("foo", "foo"));
        parent.use_phase("foo", respond(200, "hello world"));
        child.use_phase("foo", respond(500, "oops"));

        let resp = child.run("foo", request(), None).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["foo"], "foo");
        assert_eq!(body_string(resp).await, "hello world");
    }

    #[tokio::test]
    async fn panic_in_inherited_phase_recovers_in_parent() {
        let parent = Layer::new();
        let child = Layer::new();
        child.set_parent(&parent);

        parent.use_phase(ERROR_PHASE, respond(502, "error"));
        parent.use_phase("foo", set_header("foo", "foo"));
        child.use_phase(
            "foo",
            middleware::from_fn(|_req, _next: Handler| async move {
                panic!("oops");
            }),
        );

        let resp = child.run("foo", request(), None).await;
        assert_eq!(resp.status(), 502);
        assert_eq!(body_string(resp).await, "error");
    }

    #[tokio::test]
    async fn request_phase_panic_climbs_to_parent_error_chain() {
        let parent = Layer::new();
        let child = Layer::new();
        child.set_parent(&parent);

        parent.use_phase(ERROR_PHASE, set_header("handled-by", "parent"));
        child.use_phase(
            REQUEST_PHASE,
            middleware::from_fn(|_req, _next: Handler| async move {
                panic!("oops");
            }),
        );

        let resp = child.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.headers()["handled-by"], "parent");
        assert_eq!(body_string(resp).await, "Proxy Error");
    }

    #[tokio::test]
    async fn flush_clears_stacks_but_keeps_final() {
        let layer = Layer::new();
        layer.use_phase(REQUEST_PHASE, set_header("x", "y"));
        layer.use_final_handler(handler_fn(|_req| async {
            http::Response::builder()
                .status(204)
                .body(Body::empty())
                .unwrap()
        }));
        layer.flush();
        assert_eq!(layer.phase_len(REQUEST_PHASE), 0);

        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.status(), 204);
        assert!(resp.headers().get("x").is_none());
    }

    #[tokio::test]
    async fn plugin_registers_itself() {
        struct HeaderPlugin;
        impl Registrable for HeaderPlugin {
            fn register(&self, layer: &Layer) {
                layer.use_phase(REQUEST_PHASE, set_header("plugged", "in"));
                layer.use_phase(ERROR_PHASE, set_header("plugged-error", "in"));
            }
        }

        let layer = Layer::new();
        layer.plug(&HeaderPlugin);
        assert_eq!(layer.phase_len(REQUEST_PHASE), 1);
        assert_eq!(layer.phase_len(ERROR_PHASE), 1);

        let resp = layer.run(REQUEST_PHASE, request(), None).await;
        assert_eq!(resp.headers()["plugged"], "in");
    }

    #[tokio::test]
    async fn downstream_overrides_final_handler() {
        let layer = Layer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let observe = middleware::from_fn(move |req, next: Handler| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { next(req).await }
        });
        layer.use_phase(REQUEST_PHASE, observe.clone());
        layer.use_phase(REQUEST_PHASE, observe.clone());
        layer.use_phase(REQUEST_PHASE, observe);

        let resp = layer
            .run(
                REQUEST_PHASE,
                request(),
                Some(handler_fn(|_req| async {
                    http::Response::builder()
                        .status(201)
                        .body(Body::empty())
                        .unwrap()
                })),
            )
            .await;
        assert_eq!(resp.status(), 201);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
