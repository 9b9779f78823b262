use async_trait::async_trait;
use thiserror::Error;

use crate::core::handler::{HttpRequest, HttpResponse};

/// Error type for upstream round-trip operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RoundTripError {
    /// Connecting to or talking with the upstream failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The outbound request could not be constructed or sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream did not answer within the transport deadline.
    #[error("timeout after {0} seconds")]
    Timeout(u64),
}

/// Result type alias for round-trip operations.
pub type RoundTripResult<T> = Result<T, RoundTripError>;

/// RoundTripper defines the port (interface) for executing one HTTP exchange
/// against an upstream server. The forwarder is transport-agnostic; swap in a
/// custom implementation for retries, deadlines or test doubles.
#[async_trait]
pub trait RoundTripper: Send + Sync + 'static {
    /// Send the prepared outbound request and return the upstream response.
    async fn round_trip(&self, req: HttpRequest) -> RoundTripResult<HttpResponse>;
}
