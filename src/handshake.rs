// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! RFC 6455 server-side handshake negotiation: turn a parsed
//! [`crate::request::Request`] into an accept/reject decision and encode
//! the corresponding HTTP response.
//!
//! Grounded on `handshake/server.rs::decode_request`/`encode_response`
//! (header validation order, the `Sec-WebSocket-Accept` computation, the
//! literal 101 response bytes, the `STATUSCODES` rejection table) and the
//! top-level `handshake.rs` (the `KEY` GUID constant). The lenient mode
//! for non-conforming `Connection` headers is not present in either
//! teacher file — it implements this crate's own negotiation contract
//! using [`crate::util::header_contains_token`] for the comma-separated
//! match instead of `expect_ascii_header`'s exact-match comparison.

use crate::request::Request;
use crate::util::header_contains_token;
use sha1::{Digest, Sha1};
use std::fmt;

/// RFC 6455 defines this fixed GUID as part of computing
/// `Sec-WebSocket-Accept` from the client's nonce.
const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Version` values this crate negotiates as RFC 6455. Early
/// draft versions (4-8) share RFC 6455's handshake shape closely enough
/// that a lenient server can accept them as the same protocol.
const SUPPORTED_WEBSOCKET_VERSIONS: &[&str] = &["4", "5", "6", "7", "8", "13"];

/// Which handshake dialect a request used.
///
/// Only [`ProtocolVariant::Rfc6455`] is negotiated to completion by this
/// crate; [`ProtocolVariant::LegacyHixie`] is detected (a request that
/// looks like the pre-RFC hixie-76/hybi-00 draft, identified by the
/// absence of `Sec-WebSocket-Version` alongside the presence of
/// `Sec-WebSocket-Key1`/`Sec-WebSocket-Key2`) so callers can reject it
/// with a clear reason rather than failing on a missing header further
/// down the negotiation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    Rfc6455,
    LegacyHixie,
}

/// A successfully negotiated handshake.
#[derive(Debug)]
pub struct Accepted {
    pub variant: ProtocolVariant,
    pub response: Vec<u8>,
    pub host: String,
    pub origin: Option<String>,
    pub protocol: Option<String>,
    pub path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("request method {0:?} is not GET")]
    WrongMethod(String),
    #[error("unsupported HTTP version (minor {0})")]
    UnsupportedHttpVersion(u8),
    #[error("missing required header {0:?}")]
    MissingHeader(&'static str),
    #[error("header {0:?} did not contain the expected token {1:?}")]
    UnexpectedHeaderValue(&'static str, &'static str),
    #[error("Sec-WebSocket-Version {0:?} is not supported")]
    UnsupportedWebSocketVersion(String),
    #[error("request uses the legacy hixie-76/hybi-00 handshake, which is not supported")]
    LegacyHixieHandshake,
    #[error("Sec-WebSocket-Key {0:?} is not a 16-byte nonce encoded as 24 base64 characters")]
    MalformedKey(String),
}

impl HandshakeError {
    /// The HTTP status code this rejection should be reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            HandshakeError::WrongMethod(_) => 405,
            HandshakeError::UnsupportedHttpVersion(_) => 505,
            HandshakeError::MissingHeader(_) => 400,
            HandshakeError::UnexpectedHeaderValue(_, _) => 400,
            HandshakeError::UnsupportedWebSocketVersion(_) => 426,
            HandshakeError::LegacyHixieHandshake => 426,
            HandshakeError::MalformedKey(_) => 400,
        }
    }
}

/// A base64-encoded 16-byte nonce is always exactly 24 characters long
/// (16 bytes -> 24 base64 characters including padding). RFC 6455 §4.1
/// requires `Sec-WebSocket-Key` to decode to exactly 16 bytes; checking
/// the encoded length is sufficient to catch the truncated/extended keys
/// real clients occasionally send without needing a full base64 decode.
const ENCODED_KEY_LENGTH: usize = 24;

/// Negotiate a handshake for `request`.
///
/// The strict check (RFC 6455 §4.2.1) requires `Upgrade: websocket` and a
/// `Connection` header whose comma-separated token set contains
/// `upgrade`. When `allow_missing_connection_headers` is set, a request
/// that fails the strict check is still accepted as an upgrade if it
/// carries `Sec-WebSocket-Version`+`Sec-WebSocket-Key`, or the legacy
/// `Sec-WebSocket-Key1`+`Sec-WebSocket-Key2` pair — some proxies and
/// older clients send a non-conforming or missing `Connection`/`Upgrade`
/// header but are otherwise a genuine upgrade attempt.
pub fn negotiate(request: &Request, allow_missing_connection_headers: bool) -> Result<Accepted, HandshakeError> {
    if request.method != "GET" {
        return Err(HandshakeError::WrongMethod(request.method.clone()))
    }
    if request.version_minor != 1 {
        return Err(HandshakeError::UnsupportedHttpVersion(request.version_minor))
    }
    if request.headers.get("Host").is_none() {
        return Err(HandshakeError::MissingHeader("Host"))
    }

    if let Err(e) = check_strict_upgrade(request) {
        if !allow_missing_connection_headers || !looks_like_websocket_attempt(request) {
            return Err(e)
        }
    }

    if request.headers.get("Sec-WebSocket-Key").is_none() {
        if request.headers.get("Sec-WebSocket-Key1").is_some() || request.headers.get("Sec-WebSocket-Key2").is_some() {
            return Err(HandshakeError::LegacyHixieHandshake)
        }
        return Err(HandshakeError::MissingHeader("Sec-WebSocket-Key"))
    }
    let key = request.headers.get("Sec-WebSocket-Key").expect("checked above");
    if key.len() != ENCODED_KEY_LENGTH {
        return Err(HandshakeError::MalformedKey(key.to_string()))
    }

    match request.headers.get("Sec-WebSocket-Version") {
        Some(v) if SUPPORTED_WEBSOCKET_VERSIONS.contains(&v) => {}
        Some(other) => return Err(HandshakeError::UnsupportedWebSocketVersion(other.to_string())),
        None => return Err(HandshakeError::MissingHeader("Sec-WebSocket-Version")),
    }

    let accept_token = compute_accept_token(key);
    let response = encode_accept_response(&accept_token);
    Ok(Accepted {
        variant: ProtocolVariant::Rfc6455,
        response,
        host: request.headers.get("Host").expect("checked above").to_string(),
        origin: request.headers.get("Origin").map(str::to_string),
        protocol: request.headers.get("Sec-WebSocket-Protocol").map(str::to_string),
        path: request.target.clone(),
    })
}

/// The strict RFC 6455 §4.2.1 upgrade check: `Upgrade: websocket` and an
/// `upgrade` token in `Connection`.
fn check_strict_upgrade(request: &Request) -> Result<(), HandshakeError> {
    let upgrade = request.headers.get("Upgrade").ok_or(HandshakeError::MissingHeader("Upgrade"))?;
    if !header_contains_token(upgrade, "websocket") {
        return Err(HandshakeError::UnexpectedHeaderValue("Upgrade", "websocket"))
    }
    let conn = request.headers.get("Connection").ok_or(HandshakeError::MissingHeader("Connection"))?;
    if !header_contains_token(conn, "upgrade") {
        return Err(HandshakeError::UnexpectedHeaderValue("Connection", "upgrade"))
    }
    Ok(())
}

/// The lenient-mode fallback condition: a version+key pair (RFC 6455) or
/// a key1+key2 pair (legacy hixie) present, regardless of what
/// `Connection`/`Upgrade` said.
fn looks_like_websocket_attempt(request: &Request) -> bool {
    let has_rfc6455_pair = request.headers.get("Sec-WebSocket-Version").is_some() && request.headers.get("Sec-WebSocket-Key").is_some();
    let has_legacy_pair = request.headers.get("Sec-WebSocket-Key1").is_some() && request.headers.get("Sec-WebSocket-Key2").is_some();
    has_rfc6455_pair || has_legacy_pair
}

/// Compute the base64 `Sec-WebSocket-Accept` value for a client nonce:
/// `base64(SHA-1(key + GUID))`.
pub fn compute_accept_token(key: &str) -> String {
    let mut digest = Sha1::new();
    digest.input(key.as_bytes());
    digest.input(ACCEPT_GUID);
    let hash = digest.result();
    base64::encode(&hash)
}

/// Exactly the RFC 6455 §4.2.2 response bytes; no header beyond these
/// four lines, and no variation in casing or spacing.
fn encode_accept_response(accept_token: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(112);
    out.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    out.extend_from_slice(b"Upgrade: websocket\r\n");
    out.extend_from_slice(b"Connection: Upgrade\r\n");
    out.extend_from_slice(b"Sec-WebSocket-Accept: ");
    out.extend_from_slice(accept_token.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
    out
}

/// Encode an HTTP rejection response for `status_code`, looked up in
/// [`STATUS_CODES`], falling back to a generic 500 for unrecognized codes.
pub fn encode_reject_response(status_code: u16) -> Vec<u8> {
    let (_, text, reason) = STATUS_CODES
        .binary_search_by_key(&status_code, |(n, _, _)| *n)
        .map(|i| STATUS_CODES[i])
        .unwrap_or((500, "500", "Internal Server Error"));
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(b" ");
    out.extend_from_slice(reason.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
    out
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolVariant::Rfc6455 => f.write_str("RFC 6455"),
            ProtocolVariant::LegacyHixie => f.write_str("hixie-76/hybi-00"),
        }
    }
}

/// Known status codes and their reason phrases, sorted by code for binary
/// search. Only a subset of this table is ever produced by
/// [`HandshakeError::status_code`]; the rest is carried so the table
/// stays a faithful, general-purpose lookup rather than special-cased to
/// just the codes this crate currently emits.
const STATUS_CODES: &[(u16, &str, &str)] = &[
    (100, "100", "Continue"),
    (101, "101", "Switching Protocols"),
    (200, "200", "OK"),
    (201, "201", "Created"),
    (204, "204", "No Content"),
    (300, "300", "Multiple Choices"),
    (301, "301", "Moved Permanently"),
    (302, "302", "Found"),
    (304, "304", "Not Modified"),
    (400, "400", "Bad Request"),
    (401, "401", "Unauthorized"),
    (403, "403", "Forbidden"),
    (404, "404", "Not Found"),
    (405, "405", "Method Not Allowed"),
    (408, "408", "Request Timeout"),
    (409, "409", "Conflict"),
    (413, "413", "Payload Too Large"),
    (414, "414", "URI Too Long"),
    (426, "426", "Upgrade Required"),
    (431, "431", "Request Header Fields Too Large"),
    (500, "500", "Internal Server Error"),
    (501, "501", "Not Implemented"),
    (502, "502", "Bad Gateway"),
    (503, "503", "Service Unavailable"),
    (505, "505", "HTTP Version Not Supported"),
];
