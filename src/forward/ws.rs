//! WebSocket forwarding: connection takeover and bidirectional byte relay.
//!
//! The upstream handshake is relayed almost verbatim: the inbound request
//! head is written to a freshly dialed socket (TLS for `wss`), the upstream's
//! reply head is parsed just enough to hand its status and headers back to
//! the client, and from the moment the client connection is released by the
//! server transport both directions are plain byte copies. Frames are never
//! interpreted.
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use rustls_pki_types::ServerName;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use tokio_rustls::TlsConnector;

use axum::body::Body;

use crate::{
    core::handler::{HttpRequest, HttpResponse},
    error::Error,
    forward::Forwarder,
    metrics,
};

/// Upper bound for an upstream handshake reply head.
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

pub(crate) trait RelayIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayIo for T {}

impl Forwarder {
    /// Relay a websocket session. All failures before the upgrade are
    /// answered through the error handler; once the relay is running, a
    /// closing direction tears the whole session down.
    pub(crate) async fn serve_ws(&self, mut req: HttpRequest) -> HttpResponse {
        let scheme = match req.uri().scheme_str() {
            Some("https") | Some("wss") => "wss",
            _ => "ws",
        };
        let authority = match req.uri().authority().cloned() {
            Some(authority) => authority,
            None => {
                return self.error_handler.handle(&Error::InvalidForwardUri {
                    uri: req.uri().to_string(),
                    reason: "missing websocket upstream host".to_string(),
                })
            }
        };
        let host = authority.host().to_string();
        let port = authority
            .port_u16()
            .unwrap_or(if scheme == "wss" { 443 } else { 80 });
        let address = format!("{host}:{port}");

        let tcp = match TcpStream::connect(&address).await {
            Ok(stream) => stream,
            Err(source) => {
                metrics::record_forward_error("dial");
                return self.error_handler.handle(&Error::Dial {
                    host: address,
                    source,
                });
            }
        };
        let mut upstream: Box<dyn RelayIo> = if scheme == "wss" {
            let server_name = match ServerName::try_from(host.clone()) {
                Ok(name) => name,
                Err(e) => {
                    return self.error_handler.handle(&Error::WsHandshake(format!(
                        "invalid TLS server name `{host}`: {e}"
                    )))
                }
            };
            let connector = TlsConnector::from(self.tls_config.clone());
            match connector.connect(server_name, tcp).await {
                Ok(stream) => Box::new(stream),
                Err(source) => {
                    metrics::record_forward_error("tls");
                    return self.error_handler.handle(&Error::Dial {
                        host: address,
                        source,
                    });
                }
            }
        } else {
            Box::new(tcp)
        };

        // Taking the upgrade handle is the point of no return towards the
        // client; without it there is no raw connection to relay over.
        let on_upgrade = match req.extensions_mut().remove::<OnUpgrade>() {
            Some(upgrade) => upgrade,
            None => return self.error_handler.handle(&Error::HijackUnsupported),
        };

        let (mut parts, _body) = req.into_parts();
        if let Some(rewriter) = &self.websocket_rewriter {
            rewriter.rewrite(&mut parts);
        }

        let head = encode_request_head(&parts, authority.as_str());
        if let Err(e) = upstream.write_all(&head).await {
            return self
                .error_handler
                .handle(&Error::WsHandshake(format!("writing handshake failed: {e}")));
        }

        let (status, headers, leftover) = match read_response_head(&mut upstream).await {
            Ok(reply) => reply,
            Err(err) => return self.error_handler.handle(&err),
        };

        let switching = status == StatusCode::SWITCHING_PROTOCOLS;
        let mut headers = headers;
        let body = if switching {
            metrics::record_websocket_session();
            tokio::spawn(relay(on_upgrade, upstream, leftover));
            Body::empty()
        } else {
            // Upstream refused the upgrade; surface its reply and drop the
            // dialed socket. Only the bytes read so far are relayed, so the
            // reply is re-framed.
            tracing::warn!(upstream = %authority, status = status.as_u16(), "upstream refused websocket upgrade");
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::TRANSFER_ENCODING);
            Body::from(leftover)
        };

        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = Version::HTTP_11;
        *response.headers_mut() = headers;
        response
    }
}

/// Serialize a request head for the upstream handshake, headers verbatim.
fn encode_request_head(parts: &http::request::Parts, authority: &str) -> Vec<u8> {
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut out = format!("{} {} HTTP/1.1\r\n", parts.method, path).into_bytes();
    if !parts.headers.contains_key(header::HOST) {
        out.extend_from_slice(format!("Host: {authority}\r\n").as_bytes());
    }
    for (name, value) in parts.headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Read and parse the upstream reply head. Returns the status, the reply
/// headers, and any bytes the upstream sent beyond the head (early frames),
/// which must reach the client before relayed traffic.
async fn read_response_head(
    io: &mut Box<dyn RelayIo>,
) -> Result<(StatusCode, HeaderMap, Bytes), Error> {
    let mut buf = BytesMut::with_capacity(1024);
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(Error::WsHandshake(
                "upstream handshake reply head too large".to_string(),
            ));
        }
        let read = io
            .read_buf(&mut buf)
            .await
            .map_err(|e| Error::WsHandshake(format!("reading handshake reply failed: {e}")))?;
        if read == 0 {
            return Err(Error::WsHandshake(
                "upstream closed during handshake".to_string(),
            ));
        }
    };

    let head = buf.split_to(head_end);
    let leftover = buf.freeze();
    let (status, headers) = parse_response_head(&head)?;
    Ok((status, headers, leftover))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_response_head(head: &[u8]) -> Result<(StatusCode, HeaderMap), Error> {
    let text = std::str::from_utf8(head)
        .map_err(|_| Error::WsHandshake("handshake reply is not valid UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| Error::WsHandshake("empty handshake reply".to_string()))?;
    let mut fields = status_line.splitn(3, ' ');
    let version = fields.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(Error::WsHandshake(format!(
            "unexpected handshake reply version `{version}`"
        )));
    }
    let status = fields
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| {
            Error::WsHandshake(format!("bad handshake status line `{status_line}`"))
        })?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::WsHandshake(format!(
                "malformed handshake header `{line}`"
            )));
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| Error::WsHandshake(format!("bad header name: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| Error::WsHandshake(format!("bad header value: {e}")))?;
        headers.append(name, value);
    }
    Ok((status, headers))
}

/// Pump bytes both ways until one direction finishes, then close both ends.
async fn relay(on_upgrade: OnUpgrade, upstream: Box<dyn RelayIo>, initial: Bytes) {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::error!(error = %e, "client connection upgrade failed");
            return;
        }
    };
    let client = TokioIo::new(upgraded);

    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    if !initial.is_empty() {
        if let Err(e) = client_write.write_all(&initial).await {
            tracing::debug!(error = %e, "relaying buffered upstream bytes failed");
            return;
        }
    }

    let (tx, mut rx) = mpsc::channel::<std::io::Result<u64>>(2);
    let tx_up = tx.clone();
    let to_upstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut client_read, &mut upstream_write).await;
        if let Ok(bytes) = &copied {
            metrics::record_websocket_bytes("client_to_upstream", *bytes);
        }
        let _ = tx_up.send(copied).await;
    });
    let to_client = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut upstream_read, &mut client_write).await;
        if let Ok(bytes) = &copied {
            metrics::record_websocket_bytes("upstream_to_client", *bytes);
        }
        let _ = tx.send(copied).await;
    });

    // Either direction closing ends the session.
    match rx.recv().await {
        Some(Ok(bytes)) => tracing::debug!(bytes, "websocket relay direction finished"),
        Some(Err(e)) => tracing::debug!(error = %e, "websocket relay direction errored"),
        None => {}
    }

    // Dropping the halves closes both sockets on every path out of here.
    to_upstream.abort();
    to_client.abort();
}
