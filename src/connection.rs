// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The per-accepted-connection state machine: drives the handshake, then
//! the frame read/write loop, and exposes the write primitives an
//! application uses from inside a [`crate::hooks::Hooks`] callback.
//!
//! Grounded on `connection.rs::Receiver::receive` / `Sender::send_*` /
//! `write` / `close_answer`, collapsed from soketto's split
//! `Sender`/`Receiver` pair into a single `Connection<T>`, matching this
//! crate's data model of one object owning both the input and output
//! sides of an accepted socket.

use crate::buffer::Buffer;
use crate::error::ProtocolError;
use crate::frame::{self, Header, OpCode, Role};
use crate::handshake::{self, Accepted, ProtocolVariant};
use crate::hooks::Hooks;
use crate::request;
use crate::server::Config;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::io;

/// Close codes a peer is never allowed to put on the wire (RFC 6455
/// §7.4.1): they are reserved to mean "no status code was present" and
/// similar out-of-band conditions, never to be sent or received literally.
fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// One accepted WebSocket connection: the socket, its read buffer, the
/// negotiated handshake metadata, and the partial-message state needed to
/// reassemble a fragmented text/binary message across multiple frames.
pub struct Connection<T> {
    socket: T,
    read_buf: Buffer,
    max_frame_size: u64,
    max_message_size: u64,
    max_header_bytes: usize,
    host: String,
    origin: Option<String>,
    protocol: Option<String>,
    path: String,
    variant: ProtocolVariant,
    closed: bool,
    fragment: Option<(OpCode, Vec<u8>)>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// The `Host` header value the client sent.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The `Origin` header value, if the client sent one.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// The negotiated `Sec-WebSocket-Protocol`, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// The request target (path + query) the client asked to upgrade on.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read and negotiate one RFC 6455 upgrade request off `socket`,
    /// calling `hooks.on_authenticate` before the 101 response is sent
    /// and `hooks.on_handshake_complete` after it. A rejected handshake
    /// (malformed request, failed negotiation, or a refusing
    /// `on_authenticate`) writes the appropriate HTTP error response
    /// before returning its error.
    pub async fn accept<H: Hooks<T>>(mut socket: T, config: &Config, hooks: &mut H) -> Result<Self, ProtocolError> {
        let mut read_buf = Buffer::new();
        let request = loop {
            let view = read_buf.view();
            match request::try_parse_request(&view, config.max_header_bytes) {
                Ok(crate::Parsing::Done { value, consumed }) => {
                    drop(view);
                    read_buf.consume(consumed);
                    break value
                }
                Ok(crate::Parsing::NeedMore(_)) => {
                    drop(view);
                    if !read_buf.fill_more(&mut socket).await? {
                        let _ = socket.close().await;
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed during handshake").into())
                    }
                }
                Err(e) => {
                    let _ = socket.write_all(&handshake::encode_reject_response(400)).await;
                    let _ = socket.flush().await;
                    let _ = socket.close().await;
                    return Err(e.into())
                }
            }
        };
        log::debug!("handshake request parsed: {} {}", request.method, request.target);

        let accepted: Accepted = match handshake::negotiate(&request, config.allow_clients_missing_connection_headers) {
            Ok(a) => a,
            Err(e) => {
                let _ = socket.write_all(&handshake::encode_reject_response(e.status_code())).await;
                let _ = socket.flush().await;
                let _ = socket.close().await;
                return Err(e.into())
            }
        };

        let mut conn = Connection {
            socket,
            read_buf,
            max_frame_size: config.max_frame_size,
            max_message_size: config.max_message_size,
            max_header_bytes: config.max_header_bytes,
            host: accepted.host,
            origin: accepted.origin,
            protocol: accepted.protocol,
            path: accepted.path,
            variant: accepted.variant,
            closed: false,
            fragment: None,
        };

        if !hooks.on_authenticate(&mut conn).await {
            let _ = conn.socket.write_all(&handshake::encode_reject_response(401)).await;
            let _ = conn.socket.flush().await;
            let _ = conn.socket.close().await;
            return Err(ProtocolError::AuthRefused)
        }

        conn.socket.write_all(&accepted.response).await?;
        conn.socket.flush().await?;
        log::debug!("handshake complete for host {:?}, path {:?}", conn.host, conn.path);
        hooks.on_handshake_complete(&mut conn).await;

        Ok(conn)
    }

    /// Drive the frame loop until the connection closes (either side) or
    /// an unrecoverable protocol error occurs. Returns `Ok(())` on a
    /// clean close.
    ///
    /// On any exit (clean close, peer disconnect, or error) the socket's
    /// output half is closed before returning, failure-tolerantly; the
    /// result of the loop itself is always what gets returned.
    pub async fn run<H: Hooks<T>>(&mut self, hooks: &mut H) -> Result<(), ProtocolError> {
        let result = self.frame_loop(hooks).await;
        let _ = self.socket.close().await;
        result
    }

    async fn frame_loop<H: Hooks<T>>(&mut self, hooks: &mut H) -> Result<(), ProtocolError> {
        while !self.closed {
            match self.read_frame().await? {
                Some(frame) => self.dispatch(frame, hooks).await?,
                None => break,
            }
        }
        Ok(())
    }

    /// Read one complete frame header, or `None` if the peer disconnected
    /// cleanly with nothing buffered (the frame loop's ordinary exit
    /// path when a client simply closes its socket instead of sending a
    /// Close frame). An EOF with a partial header already buffered is a
    /// fatal, mid-frame truncation.
    async fn read_header(&mut self) -> Result<Option<Header>, ProtocolError> {
        loop {
            let view = self.read_buf.view();
            match frame::try_read_header(&view, self.max_frame_size, Role::Server) {
                Ok(crate::Parsing::Done { value, .. }) => return Ok(Some(value)),
                Ok(crate::Parsing::NeedMore(need)) => {
                    let nothing_buffered = view.is_empty();
                    let target = self.read_buf.len() + need;
                    drop(view);
                    if !self.read_buf.fill_at_least_or_eof(&mut self.socket, target).await? {
                        if nothing_buffered {
                            return Ok(None)
                        }
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-frame").into())
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read one complete frame (header plus unmasked payload) from the
    /// socket, growing the read buffer as needed, or `None` if the peer
    /// disconnected cleanly with no frame in flight.
    async fn read_frame(&mut self) -> Result<Option<OwnedFrame>, ProtocolError> {
        let header = match self.read_header().await? {
            Some(h) => h,
            None => return Ok(None),
        };
        let total = header.header_length() + header.payload_length() as usize;
        self.read_buf.fill_at_least(&mut self.socket, total).await?;

        let mut payload = self.read_buf.view().slice_to(header.header_length(), total).to_vec();
        if header.masked() {
            frame::apply_mask(&mut payload, header.mask(), 0);
        }
        self.read_buf.consume(total);

        #[cfg(feature = "trace")]
        log::trace!("read frame: opcode={} fin={} len={}", header.opcode(), header.fin(), payload.len());

        Ok(Some(OwnedFrame { header, payload }))
    }

    async fn dispatch<H: Hooks<T>>(&mut self, frame: OwnedFrame, hooks: &mut H) -> Result<(), ProtocolError> {
        let OwnedFrame { header, payload } = frame;
        match header.opcode() {
            OpCode::Ping => {
                self.write_frame(OpCode::Pong, &payload).await?;
                hooks.on_ping(self, payload).await;
            }
            OpCode::Pong => {
                hooks.on_pong(self, payload).await;
            }
            OpCode::Close => {
                let (code, reason) = parse_close_payload(&payload);
                let reply_code = match code {
                    Some(c) if is_valid_close_code(c) => c,
                    None => 1000,
                    Some(_) => 1002,
                };
                self.write_close(reply_code, "").await?;
                self.closed = true;
                log::debug!("connection closed by peer, code {:?}", code);
                hooks.on_close(self, code, reason).await;
            }
            OpCode::Text | OpCode::Binary | OpCode::Continue => {
                self.accumulate_and_maybe_dispatch(header, payload, hooks).await?;
            }
            OpCode::Reserved(n) => {
                unreachable!("frame decode already rejects reserved opcode {}", n)
            }
        }
        Ok(())
    }

    async fn accumulate_and_maybe_dispatch<H: Hooks<T>>(
        &mut self,
        header: Header,
        payload: Vec<u8>,
        hooks: &mut H,
    ) -> Result<(), ProtocolError> {
        let in_progress = self.fragment.as_ref().map(|(op, _)| *op);
        let opcode = match (in_progress, header.opcode()) {
            (None, OpCode::Continue) => return Err(ProtocolError::UnexpectedContinuation),
            (Some(_), OpCode::Text) | (Some(_), OpCode::Binary) => return Err(ProtocolError::UnexpectedContinuation),
            (None, op) => op,
            (Some(op), OpCode::Continue) => op,
            _ => unreachable!("control opcodes are handled before reaching here"),
        };
        if self.fragment.is_none() {
            self.fragment = Some((opcode, Vec::new()));
        }

        {
            let (_, buf) = self.fragment.as_mut().expect("just set above");
            buf.extend_from_slice(&payload);
            if buf.len() as u64 > self.max_message_size {
                let actual = buf.len() as u64;
                self.fragment = None;
                return Err(ProtocolError::MessageTooLarge { actual, maximum: self.max_message_size })
            }
        }

        if header.fin() {
            let (_, buf) = self.fragment.take().expect("set above");
            match opcode {
                OpCode::Text => {
                    let text = String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)?;
                    hooks.on_text(self, text).await;
                }
                OpCode::Binary => {
                    hooks.on_binary(self, buf).await;
                }
                _ => unreachable!("only Text/Binary can be the fragment's leading opcode"),
            }
        }
        Ok(())
    }

    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), ProtocolError> {
        let header = frame::make_header(opcode, true, payload.len() as u64, Role::Server, 0);
        let mut out = Vec::with_capacity(payload.len() + 14);
        frame::write_header(&header, &mut out);
        out.extend_from_slice(payload);
        self.socket.write_all(&out).await?;
        self.socket.flush().await?;
        Ok(())
    }

    async fn write_close(&mut self, code: u16, reason: &str) -> Result<(), ProtocolError> {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        self.write_frame(OpCode::Close, &payload).await
    }

    /// Send a complete text message.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.write_frame(OpCode::Text, text.as_bytes()).await
    }

    /// Send a complete binary message.
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.write_frame(OpCode::Binary, data).await
    }

    /// Send an unsolicited ping.
    pub async fn send_ping(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.write_frame(OpCode::Ping, payload).await
    }

    /// Send an unsolicited pong.
    pub async fn send_pong(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.write_frame(OpCode::Pong, payload).await
    }

    /// Initiate a close with `code` and `reason`. Does not wait for the
    /// peer's answering Close frame; the caller's `run` loop will observe
    /// it (or the socket closing) and return.
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<(), ProtocolError> {
        self.closed = true;
        self.write_close(code, reason).await
    }
}

/// An in-memory, already-unmasked frame: the owned counterpart of
/// [`crate::frame::Frame`], which borrows its payload from a
/// [`crate::buffer::Buffer`] that this connection consumes immediately
/// after decoding.
struct OwnedFrame {
    header: Header,
    payload: Vec<u8>,
}

fn parse_close_payload(payload: &[u8]) -> (Option<u16>, String) {
    if payload.len() < 2 {
        return (None, String::new())
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (Some(code), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use assert_matches::assert_matches;
    use futures::io::Cursor;

    fn accept_request() -> Vec<u8> {
        b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n".to_vec()
    }

    #[async_std::test]
    async fn accepts_handshake_and_writes_101_response() {
        let mut input = accept_request();
        input.extend_from_slice(&close_frame(1000));
        let socket = Cursor::new(input);
        let config = Config::default();
        let mut hooks = NoopHooks;
        let mut conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
        assert_eq!(conn.host(), "example.com");
        assert_eq!(conn.path(), "/chat");
        conn.run(&mut hooks).await.unwrap();
        assert!(conn.is_closed());
    }

    fn close_frame(code: u16) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&code.to_be_bytes());
        let header = frame::make_header(OpCode::Close, true, payload.len() as u64, Role::Client, 0x1122_3344);
        let mut out = Vec::new();
        frame::write_header(&header, &mut out);
        frame::apply_mask(&mut payload, header.mask(), 0);
        out.extend(payload);
        out
    }

    #[async_std::test]
    async fn rejects_malformed_handshake_with_400() {
        let socket = Cursor::new(b"NOT A REQUEST\r\n\r\n".to_vec());
        let config = Config::default();
        let mut hooks = NoopHooks;
        let err = Connection::accept(socket, &config, &mut hooks).await.unwrap_err();
        assert_matches!(err, ProtocolError::Request(_));
    }

    #[async_std::test]
    async fn peer_disconnect_with_no_pending_frame_ends_the_loop_cleanly() {
        // No Close frame, no further bytes at all: the peer just hung up.
        let socket = Cursor::new(accept_request());
        let config = Config::default();
        let mut hooks = NoopHooks;
        let mut conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
        conn.run(&mut hooks).await.unwrap();
        assert!(!conn.is_closed());
    }

    #[async_std::test]
    async fn peer_disconnect_mid_frame_is_a_fatal_error() {
        let mut input = accept_request();
        input.extend_from_slice(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d]); // header only, payload truncated
        let socket = Cursor::new(input);
        let config = Config::default();
        let mut hooks = NoopHooks;
        let mut conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
        let err = conn.run(&mut hooks).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn close_code_validation_rejects_reserved_codes() {
        assert!(is_valid_close_code(1000));
        assert!(is_valid_close_code(3999));
        assert!(!is_valid_close_code(1005));
        assert!(!is_valid_close_code(1015));
        assert!(!is_valid_close_code(2999));
    }

    #[test]
    fn parses_close_payload_code_and_reason() {
        let mut payload = 1001u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        let (code, reason) = parse_close_payload(&payload);
        assert_eq!(code, Some(1001));
        assert_eq!(reason, "bye");
    }

    #[test]
    fn empty_close_payload_has_no_code() {
        let (code, reason) = parse_close_payload(&[]);
        assert_eq!(code, None);
        assert_eq!(reason, "");
    }
}
