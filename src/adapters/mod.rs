//! Adapters (implementations) for the crate's ports.
pub mod http_client;

pub use http_client::{default_tls_config, HttpTransport};
