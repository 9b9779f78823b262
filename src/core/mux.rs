//! Conditional middleware multiplexer.
//!
//! A [`Mux`] guards its own middleware pipeline behind a list of request
//! predicates (logical AND). Requests failing any predicate pass straight
//! through to the downstream handler; matching requests run the nested
//! pipeline, with the downstream handler as its continuation.
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::{
    handler::{middleware, Handler, HandlerFuture, HttpRequest, Middleware, Registrable},
    layer::{Layer, REQUEST_PHASE},
    pattern,
};

/// A request predicate.
pub type Matcher = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// Predicate constructors for the common request attributes.
pub mod matcher {
    use super::*;
    use http::header;

    pub fn method(expected: &str) -> Matcher {
        let expected = expected.to_string();
        Arc::new(move |req| req.method().as_str() == expected)
    }

    /// Match the `Host` the client addressed (header first, URI authority as
    /// fallback).
    pub fn host(expected: &str) -> Matcher {
        let expected = expected.to_string();
        Arc::new(move |req| {
            let host = req
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .or_else(|| req.uri().authority().map(|a| a.to_string()));
            host.as_deref() == Some(expected.as_str())
        })
    }

    /// Match the URL path against a capture pattern.
    pub fn path(pattern_str: &str) -> Matcher {
        let pattern_str = pattern_str.to_string();
        Arc::new(move |req| pattern::matches(&pattern_str, req.uri().path()).is_some())
    }

    pub fn scheme(expected: &str) -> Matcher {
        let expected = expected.to_string();
        Arc::new(move |req| req.uri().scheme_str().unwrap_or("http") == expected)
    }

    pub fn header(name: &'static str, expected: &str) -> Matcher {
        let expected = expected.to_string();
        Arc::new(move |req| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == expected)
        })
    }

    pub fn query(key: &str, expected: &str) -> Matcher {
        let key = key.to_string();
        let expected = expected.to_string();
        Arc::new(move |req| {
            url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
                .any(|(k, v)| k == key.as_str() && v == expected.as_str())
        })
    }
}

/// Composable conditional pipeline. Clones are handles to the same mux.
#[derive(Clone, Default)]
pub struct Mux {
    matchers: Arc<RwLock<Vec<Matcher>>>,
    layer: Layer,
}

impl Mux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one or more predicates; all of them must hold for the nested
    /// pipeline to run.
    pub fn when(&self, matcher: Matcher) -> &Self {
        self.matchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(matcher);
        self
    }

    /// Access the nested middleware layer.
    pub fn layer(&self) -> &Layer {
        &self.layer
    }

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

    pub fn flush(&self) {
        self.layer.flush();
    }

    /// Whether every predicate accepts the request.
    pub fn matches(&self, req: &HttpRequest) -> bool {
        self.matchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .all(|matcher| matcher(req))
    }

    /// Run the nested pipeline for matching requests, pass through otherwise.
    pub fn handle(&self, req: HttpRequest, downstream: Handler) -> HandlerFuture {
        if self.matches(&req) {
            self.layer.run(REQUEST_PHASE, req, Some(downstream))
        } else {
            downstream(req)
        }
    }

    /// The mux as request-phase middleware.
    pub fn as_middleware(&self) -> Middleware {
        let mux = self.clone();
        middleware::from_fn(move |req, next: Handler| {
            let mux = mux.clone();
            async move { mux.handle(req, next).await }
        })
    }
}

impl Registrable for Mux {
    fn register(&self, layer: &Layer) {
        layer.use_phase(REQUEST_PHASE, self.as_middleware());
    }
}
