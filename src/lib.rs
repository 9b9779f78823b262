//! Myelin - a programmable, middleware-oriented HTTP reverse proxy core.
//!
//! Myelin is the composable heart of an API gateway: a multi-phase,
//! priority-ordered middleware engine, a pattern router with named captures,
//! and a dual-mode forwarder that speaks both plain HTTP and websockets. It
//! deliberately does not own a listener; the [`Proxy`] is an async request
//! handler (with a `tower::Service` adapter) that mounts on any Hyper or
//! Axum server.
//!
//! # Features
//! - Phase-based middleware pipelines (`request`, `error`, and any custom
//!   phase) with five priority slots and hierarchical parent inheritance
//! - Fault recovery: a panicking pipeline is diverted into the error phase
//!   exactly once, with the fault exposed through the request context
//! - Pattern routing (`/hello/:name`) with capture injection into the query
//!   string, implicit trailing-slash aliases and optional `405` emission
//! - Conditional pipelines ([`Mux`]) gated on request predicates
//! - Reverse forwarding with header hygiene (`X-Forwarded-*`, hop-by-hop
//!   stripping) over a pluggable transport
//! - Websocket relay via connection takeover and raw byte copying
//! - Structured tracing via `tracing` and `metrics`-based counters
//!
//! # Quick Example
//! ```no_run
//! use myelin::{middleware, Handler, Proxy};
//!
//! # fn main() -> Result<(), myelin::Error> {
//! let proxy = Proxy::new();
//! proxy.use_middleware(middleware::from_fn(|req, next: Handler| async move {
//!     let mut resp = next(req).await;
//!     resp.headers_mut()
//!         .insert("server", http::HeaderValue::from_static("myelin"));
//!     resp
//! }));
//! proxy.get("/ip").forward("http://httpbin.test")?;
//! proxy.forward("http://fallback.test")?;
//! // Mount `proxy.into_service()` on your server of choice.
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! and keeps the pipeline engine inside `core`. End users should prefer the
//! re-exports below over reaching into internal modules directly.
//!
//! # Error Handling
//! Registration-time failures return [`Error`] immediately. Request-time
//! forwarding failures never unwind; they are answered through the configured
//! [`ports::ErrorHandler`] (`502 Bad Gateway` by default).
pub mod adapters;
pub mod core;
pub mod error;
pub mod forward;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub use crate::{
    core::{
        context::{self, Context},
        handler::{
            handler_fn, middleware, HandleHttp, Handler, HandlerFuture, HttpRequest,
            HttpResponse, Middleware, PartialHandler, Registrable,
        },
        layer::{Layer, ERROR_PHASE, REQUEST_PHASE},
        mux::{matcher, Matcher, Mux},
        pattern,
        proxy::{Proxy, ProxyService},
        route::Route,
        router::Router,
        stack::{Priority, Stack},
    },
    error::Error,
    forward::Forwarder,
};
