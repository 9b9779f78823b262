//! Crate-level error taxonomy.
//!
//! Registration-time failures (bad forward target, forwarder setup) surface
//! as `Result`s to the caller immediately. Request-time forwarding failures
//! are routed through the configured
//! [`ErrorHandler`](crate::ports::ErrorHandler) instead of unwinding.
use thiserror::Error;

use crate::ports::RoundTripError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The forward target URI could not be parsed or lacks a host.
    #[error("invalid forward target `{uri}`: {reason}")]
    InvalidForwardUri { uri: String, reason: String },

    /// Building the forwarder (TLS roots, client construction) failed.
    #[error("forwarder setup failed: {0}")]
    ForwarderSetup(String),

    /// The upstream exchange failed inside the transport.
    #[error(transparent)]
    RoundTrip(#[from] RoundTripError),

    /// Dialing the upstream socket failed.
    #[error("upstream dial failed for `{host}`: {source}")]
    Dial {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The server transport cannot hand over the raw client connection.
    #[error("connection hijack is not supported by the server transport")]
    HijackUnsupported,

    /// Relaying the websocket handshake to the upstream failed.
    #[error("websocket handshake relay failed: {0}")]
    WsHandshake(String),
}
