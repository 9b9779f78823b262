//! Canonical handler and middleware types.
//!
//! Every way of expressing request-handling logic in this crate is normalized
//! into two shapes:
//!
//! * [`Handler`] — owns the request, produces the response.
//! * [`Middleware`] — wraps a downstream [`Handler`] and yields a new one,
//!   observing or rewriting traffic on the way in and out.
//!
//! The free functions in [`middleware`] are the supported entry points for
//! turning closures and trait objects into the canonical middleware shape.
//! Anything that cannot be expressed through them is rejected by the type
//! system at registration time rather than failing mid-request.
use std::{future::Future, sync::Arc};

use axum::body::Body;
use futures_util::future::BoxFuture;

use crate::core::layer::Layer;

/// The request type flowing through every pipeline.
pub type HttpRequest = http::Request<Body>;

/// The response type produced by every handler.
pub type HttpResponse = http::Response<Body>;

/// Boxed response future returned by handlers.
pub type HandlerFuture = BoxFuture<'static, HttpResponse>;

/// A terminal request handler. Cheap to clone and safe to share between
/// concurrent requests.
pub type Handler = Arc<dyn Fn(HttpRequest) -> HandlerFuture + Send + Sync>;

/// A middleware transformer: downstream handler in, wrapped handler out.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Middleware expressed as an object observing the request and delegating to
/// the downstream handler explicitly.
pub trait HandleHttp: Send + Sync + 'static {
    /// Handle the request, calling `next` to continue the chain.
    fn handle_http(&self, req: HttpRequest, next: Handler) -> HandlerFuture;
}

/// Middleware expressed as partial application: given the downstream handler
/// once, produce the handler that serves every request.
pub trait PartialHandler: Send + Sync + 'static {
    fn handle_http(&self, next: Handler) -> Handler;
}

/// Implemented by entities that know how to attach themselves to a [`Layer`]
/// (typically registering handlers on several phases at once). Consumed by
/// [`Layer::plug`].
pub trait Registrable: Send + Sync {
    fn register(&self, layer: &Layer);
}

/// Build a [`Handler`] from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    Arc::new(move |req| -> HandlerFuture { Box::pin(f(req)) })
}

/// Constructors adapting the supported middleware shapes into [`Middleware`].
pub mod middleware {
    use super::*;

    /// Native shape: a transformer from downstream handler to handler.
    pub fn from_transform<F>(f: F) -> Middleware
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    /// Observe-and-forward shape: an async function receiving the request and
    /// the downstream handler. This is the workhorse constructor.
    pub fn from_fn<F, Fut>(f: F) -> Middleware
    where
        F: Fn(HttpRequest, Handler) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpResponse> + Send + 'static,
    {
        let f = Arc::new(f);
        Arc::new(move |next: Handler| {
            let f = Arc::clone(&f);
            Arc::new(move |req| -> HandlerFuture { Box::pin(f(req, next.clone())) }) as Handler
        })
    }

    /// Terminal shape: an async function that replies on its own. The
    /// downstream handler is ignored.
    pub fn from_terminal<F, Fut>(f: F) -> Middleware
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpResponse> + Send + 'static,
    {
        from_handler(handler_fn(f))
    }

    /// An existing [`Handler`] used as terminal middleware.
    pub fn from_handler(h: Handler) -> Middleware {
        Arc::new(move |_next| h.clone())
    }

    /// An object implementing [`HandleHttp`].
    pub fn from_object(obj: Arc<dyn HandleHttp>) -> Middleware {
        Arc::new(move |next: Handler| {
            let obj = Arc::clone(&obj);
            let next = next.clone();
            Arc::new(move |req| obj.handle_http(req, next.clone())) as Handler
        })
    }

    /// An object implementing [`PartialHandler`]. The object sees the
    /// downstream handler exactly once per adaptation.
    pub fn from_partial(obj: Arc<dyn PartialHandler>) -> Middleware {
        Arc::new(move |next| obj.handle_http(next))
    }
}
