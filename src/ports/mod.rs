//! Ports (traits) decoupling the forwarding core from concrete I/O.
pub mod error_handler;
pub mod rewriter;
pub mod round_tripper;

pub use error_handler::{DefaultErrorHandler, ErrorHandler};
pub use rewriter::{NoopRewriter, Rewriter};
pub use round_tripper::{RoundTripError, RoundTripResult, RoundTripper};
