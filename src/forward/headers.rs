//! Header hygiene and the default `X-Forwarded-*` rewriter.
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use http::{header::HeaderName, HeaderMap, HeaderValue};

use crate::{
    core::context::{self, Context},
    ports::Rewriter,
};

pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_SERVER: &str = "x-forwarded-server";

/// Hop-by-hop headers, removed before a request or response crosses the
/// proxy. http://www.w3.org/Protocols/rfc2616/rfc2616-sec13.html
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Strip every hop-by-hop header from `headers`.
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Default outbound rewriter stamping the `X-Forwarded-*` family.
///
/// * `X-Forwarded-For` — client IP; appended to an inbound chain when
///   `trust_forward_header` is set, otherwise replacing it.
/// * `X-Forwarded-Proto` — inbound value kept when trusted, else the scheme
///   this proxy was reached over.
/// * `X-Forwarded-Host` — the original `Host`, taken from the request
///   context when the proxy recorded it.
/// * `X-Forwarded-Server` — this machine's hostname, `localhost` fallback.
pub struct HeaderRewriter {
    pub trust_forward_header: bool,
    pub hostname: String,
}

impl HeaderRewriter {
    pub fn new(trust_forward_header: bool) -> Self {
        Self {
            trust_forward_header,
            hostname: local_hostname(),
        }
    }
}

impl Default for HeaderRewriter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Rewriter for HeaderRewriter {
    fn rewrite(&self, parts: &mut http::request::Parts) {
        let headers = &mut parts.headers;

        if let Some(client_ip) = client_ip(&parts.extensions) {
            let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) if self.trust_forward_header => format!("{prior}, {client_ip}"),
                _ => client_ip,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
            }
        }

        let keep_proto = self.trust_forward_header && headers.contains_key(X_FORWARDED_PROTO);
        if !keep_proto {
            headers.insert(
                HeaderName::from_static(X_FORWARDED_PROTO),
                HeaderValue::from_static("http"),
            );
        }

        let original_host = parts
            .extensions
            .get::<Context>()
            .and_then(|ctx| ctx.get_string(context::HOST_KEY));
        if let Some(host) = original_host {
            if let Ok(value) = HeaderValue::from_str(&host) {
                headers.insert(HeaderName::from_static(X_FORWARDED_HOST), value);
            }
        }

        if let Ok(value) = HeaderValue::from_str(&self.hostname) {
            headers.insert(HeaderName::from_static(X_FORWARDED_SERVER), value);
        }
    }
}

fn client_ip(extensions: &http::Extensions) -> Option<String> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
