/// Rewriter defines the port for mutating an outbound request head right
/// before it leaves the proxy. The default implementation stamps the
/// `X-Forwarded-*` family; custom rewriters can do arbitrary header or URI
/// surgery.
pub trait Rewriter: Send + Sync + 'static {
    fn rewrite(&self, parts: &mut http::request::Parts);
}

/// Rewriter that leaves the request untouched.
pub struct NoopRewriter;

impl Rewriter for NoopRewriter {
    fn rewrite(&self, _parts: &mut http::request::Parts) {}
}
