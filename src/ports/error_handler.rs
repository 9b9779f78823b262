use axum::body::Body;
use http::StatusCode;

use crate::{core::handler::HttpResponse, error::Error};

/// ErrorHandler defines the port for turning forwarding failures into client
/// responses. Invoked for upstream dial/round-trip failures and hijack
/// errors; never for ordinary upstream error statuses, which pass through.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, err: &Error) -> HttpResponse;
}

/// Default sink: log the failure and answer `502 Bad Gateway`.
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, err: &Error) -> HttpResponse {
        tracing::error!(error = %err, "forwarding failed");
        http::Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(Body::from("Bad Gateway"))
            .unwrap_or_else(|_| HttpResponse::new(Body::empty()))
    }
}
