pub mod context;
pub mod handler;
pub mod layer;
pub mod mux;
pub mod pattern;
pub mod proxy;
pub mod route;
pub mod router;
pub mod stack;

pub use context::Context;
pub use layer::Layer;
pub use mux::Mux;
pub use proxy::{Proxy, ProxyService};
pub use route::Route;
pub use router::Router;
pub use stack::{Priority, Stack};
