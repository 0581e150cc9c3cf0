// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Incremental HTTP/1.1 request-line and header parsing over a
//! [`ByteView`], with no dependency on the request arriving in one
//! contiguous read.
//!
//! The state machine mirrors the `Parsing::{Done,NeedMore}` loop
//! `soketto`'s `handshake/server.rs::receive_request` drives around
//! `httparse`, but is hand-rolled rather than wrapping `httparse`:
//! `httparse::Request::parse` requires a single `&[u8]`, which is exactly
//! what a segmented stream cannot always offer without first copying
//! chunks together. Scanning for `\n` through [`ByteView::index_of`]
//! keeps the zero-copy property across the request line and every header
//! line.

use crate::view::ByteView;
use crate::Parsing;
use smallvec::SmallVec;

/// Parsed request line plus headers. Header values are ASCII-checked and
/// copied out of the buffer (the buffer's chunks are retired as soon as
/// the caller advances past the consumed length, so nothing here can
/// borrow from it).
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version_minor: u8,
    pub headers: Headers,
}

/// Header names commonly seen on an upgrade request. A name received in
/// any casing is rewritten to the casing listed here before being
/// stored, so that a lookup by canonical name is a plain, case-sensitive
/// string comparison; a name not in this table is stored exactly as
/// received.
const KNOWN_HEADERS: &[&str] = &[
    "Accept",
    "Connection",
    "Host",
    "Origin",
    "Sec-WebSocket-Accept",
    "Sec-WebSocket-Extensions",
    "Sec-WebSocket-Key",
    "Sec-WebSocket-Key1",
    "Sec-WebSocket-Key2",
    "Sec-WebSocket-Protocol",
    "Sec-WebSocket-Version",
    "Upgrade",
    "User-Agent",
];

fn canonicalize(name: &str) -> String {
    match KNOWN_HEADERS.iter().find(|k| k.eq_ignore_ascii_case(name)) {
        Some(&canonical) => canonical.to_string(),
        None => name.to_string(),
    }
}

/// A small ordered mapping of canonically-cased header name to value,
/// preserving wire order. A name received more than once overwrites its
/// previous value in place rather than accumulating both, matching the
/// upgrade request's single-valued header contract.
///
/// Names are canonicalized against [`KNOWN_HEADERS`] at insertion time
/// (case-insensitively matched, stored in the table's casing); lookups
/// are therefore exact, case-sensitive matches against the canonical or
/// as-received form, never a second case-insensitive scan.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: SmallVec<[(String, String); 16]>,
}

impl Headers {
    fn new() -> Self {
        Headers { entries: SmallVec::new() }
    }

    /// Store `value` under `name`'s canonical form. A name already
    /// present has its value overwritten, keeping its original position.
    fn push(&mut self, name: String, value: String) {
        let canonical = canonicalize(&name);
        match self.entries.iter_mut().find(|(n, _)| *n == canonical) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((canonical, value)),
        }
    }

    /// The value stored under `name`'s canonical form, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        let canonical = canonicalize(name);
        self.entries.iter().find(|(n, _)| n == &canonical).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const MAX_HEADERS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request line or header is not valid ASCII")]
    NotAscii,
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("unsupported HTTP version: {0:?}")]
    UnsupportedVersion(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeaderLine(String),
    #[error("too many headers (limit is {0})")]
    TooManyHeaders(usize),
    #[error("request exceeds the configured header size limit of {0} bytes")]
    HeaderTooLarge(usize),
}

/// Attempt to parse one full HTTP request (request line + headers,
/// terminated by a blank line) from the front of `view`.
///
/// Returns [`Parsing::NeedMore`] if the terminating blank line has not
/// arrived yet, as long as `max_header_bytes` has not already been
/// exceeded by what *has* arrived (an unbounded number of never-finished
/// header bytes is rejected rather than buffered forever).
pub fn try_parse_request(view: &ByteView, max_header_bytes: usize) -> Result<Parsing<Request>, RequestError> {
    let mut cursor = match next_line_end(view, 0)? {
        Some(end) => end,
        None => return need_more_or_too_large(view.length(), max_header_bytes),
    };
    let line = strip_crlf(view, cursor).ok_or_else(|| {
        RequestError::MalformedRequestLine(view.slice_to(0, cursor).get_ascii_string().unwrap_or_default())
    })?;
    cursor += 1;

    let (method, target, version_minor) = parse_request_line(&line)?;

    let mut headers = Headers::new();
    loop {
        let rest = view.slice(cursor);
        let line_end = match next_line_end(&rest, 0)? {
            Some(end) => end,
            None => return need_more_or_too_large(cursor + rest.length(), max_header_bytes),
        };
        let line = strip_crlf(&rest, line_end).ok_or_else(|| {
            RequestError::MalformedHeaderLine(rest.slice_to(0, line_end).get_ascii_string().unwrap_or_default())
        })?;
        cursor += line_end + 1;

        if line.is_empty() {
            break
        }
        if headers.len() >= MAX_HEADERS {
            return Err(RequestError::TooManyHeaders(MAX_HEADERS))
        }
        let (name, value) = parse_header_line(&line)?;
        headers.push(name, value);

        if cursor > max_header_bytes {
            return Err(RequestError::HeaderTooLarge(max_header_bytes))
        }
    }

    Ok(Parsing::Done { value: Request { method, target, version_minor, headers }, consumed: cursor })
}

fn need_more_or_too_large(consumed_so_far: usize, max_header_bytes: usize) -> Result<Parsing<Request>, RequestError> {
    if consumed_so_far > max_header_bytes {
        Err(RequestError::HeaderTooLarge(max_header_bytes))
    } else {
        Ok(Parsing::NeedMore(1))
    }
}

/// Index (relative to `view`, offset by `from`) of the `\n` terminating
/// the next line, or `None` if no full line is buffered yet.
fn next_line_end(view: &ByteView, from: usize) -> Result<Option<usize>, RequestError> {
    let rest = view.slice(from);
    Ok(rest.index_of(b'\n'))
}

/// `view[0..lf)` with its trailing `\r` stripped, or `None` if the byte
/// immediately before the `\n` at `lf` is not `\r` (a bare `\n` is not a
/// valid line terminator).
fn strip_crlf<'a>(view: &ByteView<'a>, lf: usize) -> Option<ByteView<'a>> {
    let content = view.slice_to(0, lf);
    if content.last_byte() == Some(b'\r') {
        Some(content.slice_to(0, content.length() - 1))
    } else {
        None
    }
}

fn parse_request_line(line: &ByteView) -> Result<(String, String, u8), RequestError> {
    let text = line.get_ascii_string().ok_or(RequestError::NotAscii)?;
    let mut parts = text.splitn(3, ' ');
    let method = parts.next().filter(|s| !s.is_empty());
    let target = parts.next().filter(|s| !s.is_empty());
    let version = parts.next();
    match (method, target, version) {
        (Some(m), Some(t), Some(v)) => {
            let minor = parse_http_version(v)?;
            Ok((m.to_string(), t.to_string(), minor))
        }
        _ => Err(RequestError::MalformedRequestLine(text)),
    }
}

fn parse_http_version(v: &str) -> Result<u8, RequestError> {
    match v {
        "HTTP/1.1" => Ok(1),
        "HTTP/1.0" => Ok(0),
        other => Err(RequestError::UnsupportedVersion(other.to_string())),
    }
}

fn parse_header_line(line: &ByteView) -> Result<(String, String), RequestError> {
    let text = line.get_ascii_string().ok_or(RequestError::NotAscii)?;
    match text.find(':') {
        Some(colon) => {
            let name = text[..colon].trim().to_string();
            let value = text[colon + 1..].trim().to_string();
            if name.is_empty() {
                return Err(RequestError::MalformedHeaderLine(text))
            }
            Ok((name, value))
        }
        None => Err(RequestError::MalformedHeaderLine(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Result<Parsing<Request>, RequestError> {
        let view = ByteView::single(bytes);
        try_parse_request(&view, 8192)
    }

    #[test]
    fn parses_full_request() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        match parse(raw).unwrap() {
            Parsing::Done { value, consumed } => {
                assert_eq!(consumed, raw.len());
                assert_eq!(value.method, "GET");
                assert_eq!(value.target, "/chat");
                assert_eq!(value.version_minor, 1);
                assert_eq!(value.headers.get("host"), Some("example.com"));
                assert_eq!(value.headers.get("Upgrade"), Some("websocket"));
            }
            Parsing::NeedMore(_) => panic!("expected Done"),
        }
    }

    #[test]
    fn needs_more_when_incomplete() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: example.com\r\n";
        assert!(matches!(parse(raw), Ok(Parsing::NeedMore(_))));
    }

    #[test]
    fn incremental_across_arbitrary_splits() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        for split in 0..raw.len() {
            let spans: Vec<&[u8]> = vec![&raw[..split], &raw[split..]];
            let view = ByteView::from_spans(spans.into_iter());
            match try_parse_request(&view, 8192).unwrap() {
                Parsing::Done { value, consumed } => {
                    assert_eq!(consumed, raw.len());
                    assert_eq!(value.method, "GET");
                }
                Parsing::NeedMore(_) => panic!("split at {} should still find the full request", split),
            }
        }
    }

    #[test]
    fn repeated_headers_overwrite_keeping_the_last_value() {
        let raw = b"GET / HTTP/1.1\r\nSec-WebSocket-Extensions: a\r\nSec-WebSocket-Extensions: b\r\n\r\n";
        let value = match parse(raw).unwrap() {
            Parsing::Done { value, .. } => value,
            _ => panic!("expected Done"),
        };
        assert_eq!(value.headers.get("Sec-WebSocket-Extensions"), Some("b"));
        assert_eq!(value.headers.len(), 1);
    }

    #[test]
    fn known_header_lookup_is_canonicalized_and_unknown_header_is_case_sensitive() {
        let raw = b"GET / HTTP/1.1\r\nhOsT: example.com\r\nX-Custom-Thing: a\r\n\r\n";
        let value = match parse(raw).unwrap() {
            Parsing::Done { value, .. } => value,
            _ => panic!("expected Done"),
        };
        assert_eq!(value.headers.get("HOST"), Some("example.com"));
        assert_eq!(value.headers.get("Host"), Some("example.com"));
        assert_eq!(value.headers.get("X-Custom-Thing"), Some("a"));
        assert_eq!(value.headers.get("x-custom-thing"), None);
    }

    #[test]
    fn rejects_bad_request_line() {
        let raw = b"NOTAREQUESTLINE\r\n\r\n";
        assert!(matches!(parse(raw), Err(RequestError::MalformedRequestLine(_))));
    }

    #[test]
    fn rejects_request_line_terminated_by_bare_lf() {
        let raw = b"GET / HTTP/1.1\n\r\n";
        assert!(matches!(parse(raw), Err(RequestError::MalformedRequestLine(_))));
    }

    #[test]
    fn rejects_header_line_terminated_by_bare_lf() {
        let raw = b"GET / HTTP/1.1\r\nHost: example.com\n\r\n";
        assert!(matches!(parse(raw), Err(RequestError::MalformedHeaderLine(_))));
    }

    #[test]
    fn rejects_unsupported_version() {
        let raw = b"GET / HTTP/2.0\r\n\r\n";
        assert!(matches!(parse(raw), Err(RequestError::UnsupportedVersion(_))));
    }

    #[test]
    fn enforces_header_size_limit() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(100));
        let view = ByteView::single(&raw);
        assert!(matches!(try_parse_request(&view, 32), Err(RequestError::HeaderTooLarge(32))));
    }
}
