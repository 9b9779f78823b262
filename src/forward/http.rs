//! Plain HTTP forwarding: one reverse-proxied round-trip.
use std::time::Instant;

use http::{header, uri::PathAndQuery, uri::Scheme, HeaderValue, Uri, Version};

use crate::{
    core::handler::{HttpRequest, HttpResponse},
    error::Error,
    forward::headers::remove_hop_by_hop_headers,
    forward::Forwarder,
    metrics,
};

impl Forwarder {
    /// Forward `req` to the upstream its URI points at and stream back the
    /// response. Transport failures never unwind; they are handed to the
    /// configured error handler.
    pub(crate) async fn serve_http(&self, req: HttpRequest) -> HttpResponse {
        let outbound = match self.build_outbound(req) {
            Ok(outbound) => outbound,
            Err(err) => return self.error_handler.handle(&err),
        };
        let target = outbound.uri().clone();

        let started = Instant::now();
        match self.round_tripper.round_trip(outbound).await {
            Ok(mut response) => {
                let duration = started.elapsed();
                tracing::info!(
                    target = %target,
                    status = response.status().as_u16(),
                    duration_ms = duration.as_millis() as u64,
                    "round trip"
                );
                metrics::record_forward(response.status().as_u16(), duration);
                remove_hop_by_hop_headers(response.headers_mut());
                response
            }
            Err(err) => {
                tracing::error!(
                    target = %target,
                    error = %err,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "round trip failed"
                );
                metrics::record_forward_error("round_trip");
                self.error_handler.handle(&Error::RoundTrip(err))
            }
        }
    }

    /// Turn the inbound request into the outbound exchange: upstream URI,
    /// forced HTTP/1.1, hop-by-hop hygiene, `Host` policy, rewriter pass.
    fn build_outbound(&self, req: HttpRequest) -> Result<HttpRequest, Error> {
        let (mut parts, body) = req.into_parts();
        let shown_uri = parts.uri.to_string();

        let mut uri_parts = std::mem::take(&mut parts.uri).into_parts();
        if uri_parts.scheme.is_none() {
            uri_parts.scheme = Some(Scheme::HTTP);
        }
        if uri_parts.path_and_query.is_none() {
            uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        let authority = uri_parts
            .authority
            .clone()
            .ok_or_else(|| Error::InvalidForwardUri {
                uri: shown_uri.clone(),
                reason: "missing upstream host".to_string(),
            })?;
        parts.uri = Uri::from_parts(uri_parts).map_err(|e| Error::InvalidForwardUri {
            uri: shown_uri,
            reason: e.to_string(),
        })?;

        // Upstream exchanges always speak HTTP/1.1; the transport may
        // negotiate h2 via ALPN on its own.
        parts.version = Version::HTTP_11;

        remove_hop_by_hop_headers(&mut parts.headers);

        // The client Host is only delegated on request.
        if !self.pass_host_header {
            if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(header::HOST, value);
            }
        }

        self.rewriter.rewrite(&mut parts);
        Ok(http::Request::from_parts(parts, body))
    }
}
