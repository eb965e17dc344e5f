//! HTTP/1.1 upgrade handshake (RFC 6455 Section 4)
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! Response checks are lenient: a `101` status line and an `Upgrade`
//! header are required, the accept digest only when asked for.

use base64::Engine;
use bytes::BytesMut;
use rand::Rng;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use crate::core::Endpoint;
use crate::ws::transport::{ReadOutcome, Transport};
use crate::WsError;

/// GUID appended to the client key for the accept digest
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the response head
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Headers the request builder owns
const RESERVED_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Base64 of 16 random bytes
pub fn generate_key<R: Rng + ?Sized>(rng: &mut R) -> String {
    let key: [u8; 16] = rng.gen();
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// `base64(sha1(key + GUID))`
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Upgrade request text
pub fn build_request(endpoint: &Endpoint, key: &str, headers: &BTreeMap<String, String>) -> String {
    let mut req = String::with_capacity(256);
    let _ = write!(
        req,
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n",
        endpoint.path,
        endpoint.host_header(),
        key
    );
    for (name, value) in headers {
        if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            tracing::warn!(header = %name, "Ignoring reserved handshake header");
            continue;
        }
        let _ = write!(req, "{name}: {value}\r\n");
    }
    req.push_str("\r\n");
    req
}

/// Check a response head (status line plus headers, terminator optional)
pub fn validate_response(head: &str, key: &str, verify_accept: bool) -> Result<(), WsError> {
    let status_line = head.lines().next().unwrap_or_default();
    if !status_line.contains("101") {
        return Err(WsError::HandshakeFailed(format!(
            "unexpected status: {}",
            status_line.trim()
        )));
    }
    if !head.to_ascii_lowercase().contains("upgrade") {
        return Err(WsError::HandshakeFailed(
            "response has no Upgrade header".to_string(),
        ));
    }

    let expected = compute_accept_key(key);
    match header_value(head, "sec-websocket-accept") {
        Some(accept) if accept == expected => Ok(()),
        other => {
            let got = other.unwrap_or("<missing>");
            if verify_accept {
                Err(WsError::HandshakeFailed(format!(
                    "Sec-WebSocket-Accept mismatch: expected {expected}, got {got}"
                )))
            } else {
                tracing::warn!(expected = %expected, got = %got, "Sec-WebSocket-Accept mismatch");
                Ok(())
            }
        }
    }
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Perform the client handshake over `transport`
///
/// Bytes after the response head stay in `inbound` as the start of the frame stream.
#[allow(clippy::too_many_arguments)]
pub fn perform<R: Rng + ?Sized>(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    headers: &BTreeMap<String, String>,
    verify_accept: bool,
    timeout: Duration,
    rng: &mut R,
    scratch: &mut [u8],
    inbound: &mut BytesMut,
) -> Result<(), WsError> {
    let key = generate_key(rng);
    let request = build_request(endpoint, &key, headers);
    transport
        .write_all(request.as_bytes())
        .map_err(|e| WsError::HandshakeFailed(format!("sending upgrade request: {e}")))?;

    let deadline = Instant::now() + timeout;
    transport
        .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
        .map_err(|e| WsError::HandshakeFailed(e.to_string()))?;

    let head_end = loop {
        if let Some(pos) = find_head_end(inbound) {
            break pos + 4;
        }
        if inbound.len() > MAX_RESPONSE_HEAD {
            return Err(WsError::HandshakeFailed(format!(
                "response head exceeds {MAX_RESPONSE_HEAD} bytes"
            )));
        }
        if Instant::now() >= deadline {
            return Err(WsError::Timeout(format!(
                "no upgrade response within {timeout:?}"
            )));
        }
        match transport.read_into(scratch, inbound) {
            Ok(ReadOutcome::Data(_)) => {}
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Eof) => {
                return Err(WsError::HandshakeFailed(
                    "connection closed during handshake".to_string(),
                ))
            }
            Err(e) => return Err(WsError::HandshakeFailed(e.to_string())),
        }
    };

    let head = inbound.split_to(head_end);
    let head = String::from_utf8_lossy(&head);
    validate_response(&head, &key, verify_accept)?;

    tracing::debug!(
        endpoint = %endpoint,
        leftover = inbound.len(),
        "WebSocket upgrade accepted"
    );
    Ok(())
}
