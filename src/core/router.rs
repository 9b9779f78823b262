//! URL pattern router with per-route pipelines.
//!
//! Patterns are matched in registration order, first under the request's own
//! method, then under the `*` wildcard. Captures are merged into the raw
//! query string as colon-prefixed pairs (see [`crate::core::pattern`]), so a
//! handler for `/hello/:name` reads the binding from `:name` in the query.
//!
//! A pattern ending with a slash also registers its non-slash form pointing
//! at the same route, unless that form was registered explicitly first.
//!
//! Misses resolve in a fixed order: the `not_found` handler when set, a
//! `405 Method Not Allowed` answer when forced and another method matches the
//! path, and otherwise the downstream continuation.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use axum::body::Body;
use http::{header, StatusCode};

use crate::{
    core::{
        handler::{middleware, Handler, HandlerFuture, HttpRequest, HttpResponse, Middleware},
        layer::{Layer, REQUEST_PHASE},
        pattern::Captures,
        route::Route,
    },
    error::Error,
    forward,
};

/// Method-indexed route table with its own middleware layer. Clones are
/// handles to the same router.
#[derive(Clone, Default)]
pub struct Router {
    layer: Layer,
    routes: Arc<RwLock<HashMap<String, Vec<Route>>>>,
    not_found: Arc<RwLock<Option<Handler>>>,
    force_method_not_allowed: Arc<AtomicBool>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the router-level middleware layer.
    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Answer `405 Method Not Allowed` (with an `Allow` header) when no route
    /// matches the method but another method does match the path.
    pub fn set_force_method_not_allowed(&self, force: bool) -> &Self {
        self.force_method_not_allowed.store(force, Ordering::SeqCst);
        self
    }

    /// Handler used whenever the request does not match any pattern for its
    /// method. Set before serving any requests.
    pub fn set_not_found(&self, handler: Handler) -> &Self {
        *self
            .not_found
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
        self
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

    /// Register (or fetch) the route for `(method, pattern)`. Registering an
    /// existing pair returns the existing route.
    pub fn route(&self, method: &str, pattern: &str) -> Route {
        self.add(method, pattern, None)
    }

    fn add(&self, method: &str, pattern: &str, handler: Option<Handler>) -> Route {
        let mut routes = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entries = routes.entry(method.to_string()).or_default();
        if let Some(existing) = entries.iter().find(|r| r.pattern() == pattern) {
            return existing.clone();
        }

        let route = Route::new(pattern);
        if let Some(handler) = handler {
            route.handle(handler);
        }
        route.set_parent(&self.layer);
        entries.push(route.clone());
        drop(routes);

        // Trailing-slash patterns answer for the bare form too, through the
        // very same route.
        if let Some(bare) = pattern.strip_suffix('/') {
            if pattern.len() > 1 {
                self.add(method, bare, Some(route.as_handler()));
            }
        }

        route
    }

    /// Find a registered route matching the method and path.
    pub fn find_route(&self, method: &str, path: &str) -> Option<Route> {
        self.match_route(method, path).map(|(_, route)| route)
    }

    fn match_route(&self, method: &str, path: &str) -> Option<(Captures, Route)> {
        let routes = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for key in [method, "*"] {
            if let Some(entries) = routes.get(key) {
                for route in entries {
                    if let Some(captures) = route.matches(path) {
                        return Some((captures, route.clone()));
                    }
                }
            }
        }
        None
    }

    /// Remove the first route of `method` whose pattern matches `path`.
    pub fn remove(&self, method: &str, path: &str) -> bool {
        let mut routes = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = routes.get_mut(method) else {
            return false;
        };
        match entries.iter().position(|r| r.matches(path).is_some()) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Forward unmatched traffic that falls through the router layer to the
    /// server at `uri`.
    pub fn forward(&self, uri: &str) -> Result<&Self, Error> {
        self.layer.use_final_handler(forward::to(uri)?);
        Ok(self)
    }

    /// Attach middleware to the router's request phase.
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

    /// Install a parent middleware layer. Typically called via inversion of
    /// control from the owning proxy.
    pub fn set_parent(&self, parent: &Layer) -> &Self {
        self.layer.set_parent(parent);
        self
    }

    pub fn flush(&self) {
        self.layer.flush();
    }

    /// Dispatch `req`: match, merge captures, run the router layer with the
    /// route as its continuation; resolve misses as documented above.
    pub fn handle(&self, req: HttpRequest, downstream: Handler) -> HandlerFuture {
        let router = self.clone();
        Box::pin(async move {
            let method = req.method().as_str().to_string();
            let path = req.uri().path().to_string();

            if let Some((captures, route)) = router.match_route(&method, &path) {
                let mut req = req;
                if !captures.is_empty() {
                    merge_captures(&mut req, &captures);
                }
                return router
                    .layer
                    .run(REQUEST_PHASE, req, Some(route.as_handler()))
                    .await;
            }

            let not_found = router
                .not_found
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(not_found) = not_found {
                return not_found(req).await;
            }

            if router.force_method_not_allowed.load(Ordering::SeqCst) {
                if let Some(allowed) = router.allowed_methods(&method, &path) {
                    return method_not_allowed(&allowed);
                }
            }

            downstream(req).await
        })
    }

    /// The router as request-phase middleware.
    pub fn as_middleware(&self) -> Middleware {
        let router = self.clone();
        middleware::from_fn(move |req, next: Handler| {
            let router = router.clone();
            async move { router.handle(req, next).await }
        })
    }

    /// Methods other than `method` with a route matching `path`, sorted.
    fn allowed_methods(&self, method: &str, path: &str) -> Option<Vec<String>> {
        let routes = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut allowed: Vec<String> = routes
            .iter()
            .filter(|(key, _)| key.as_str() != method)
            .filter(|(_, entries)| entries.iter().any(|r| r.matches(path).is_some()))
            .map(|(key, _)| key.clone())
            .collect();
        if allowed.is_empty() {
            return None;
        }
        allowed.sort();
        allowed.dedup();
        Some(allowed)
    }
}

/// Prepend the encoded captures to the raw query, keeping any query the
/// client sent after them.
fn merge_captures(req: &mut HttpRequest, captures: &Captures) {
    let uri = req.uri();
    let merged = format!("{}&{}", captures.encode(), uri.query().unwrap_or(""));
    let path_and_query = format!("{}?{}", uri.path(), merged);
    let mut parts = uri.clone().into_parts();
    match path_and_query.parse() {
        Ok(pq) => parts.path_and_query = Some(pq),
        Err(e) => {
            tracing::warn!(error = %e, "merged capture query is not a valid URI, leaving request untouched");
            return;
        }
    }
    if let Ok(uri) = http::Uri::from_parts(parts) {
        *req.uri_mut() = uri;
    }
}

fn method_not_allowed(allowed: &[String]) -> HttpResponse {
    http::Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(header::ALLOW, allowed.join(", "))
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("Method Not Allowed"))
        .unwrap_or_else(|_| HttpResponse::new(Body::empty()))
}
