//! End-to-end scenarios driving `Connection::accept`/`run` over an
//! in-memory socket, exercising the handshake and frame loop together.

use assert_matches::assert_matches;
use futures::io::Cursor;
use std::sync::{Arc, Mutex};
use wsforge_core::connection::Connection;
use wsforge_core::error::{ErrorKind, ProtocolError};
use wsforge_core::hooks::Hooks;
use wsforge_core::server::Config;

#[derive(Default, Clone)]
struct Recorder {
    texts: Arc<Mutex<Vec<String>>>,
    pings: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl<T> Hooks<T> for Recorder
where
    T: futures::io::AsyncRead + futures::io::AsyncWrite + Unpin + Send,
{
    fn on_text<'a>(
        &'a mut self,
        _conn: &'a mut Connection<T>,
        text: String,
    ) -> futures::future::BoxFuture<'a, ()> {
        let texts = self.texts.clone();
        Box::pin(async move {
            texts.lock().unwrap().push(text);
        })
    }

    fn on_ping<'a>(
        &'a mut self,
        _conn: &'a mut Connection<T>,
        payload: Vec<u8>,
    ) -> futures::future::BoxFuture<'a, ()> {
        let pings = self.pings.clone();
        Box::pin(async move {
            pings.lock().unwrap().push(payload);
        })
    }
}

const HANDSHAKE: &[u8] =
    b"GET /chat HTTP/1.1\r\nHost: server\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

const LENIENT_HANDSHAKE: &[u8] =
    b"GET /chat HTTP/1.1\r\nHost: server\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

fn close_frame() -> Vec<u8> {
    vec![0x88, 0x80, 0, 0, 0, 0]
}

#[async_std::test]
async fn scenario_1_rfc6455_handshake_accepts_with_expected_token() {
    let mut input = HANDSHAKE.to_vec();
    input.extend(close_frame());
    let socket = Cursor::new(input);
    let config = Config::default();
    let mut hooks = Recorder::default();
    let conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
    assert_eq!(conn.host(), "server");
    assert_eq!(conn.path(), "/chat");
}

#[async_std::test]
async fn scenario_2_lenient_connection_header_is_accepted() {
    let mut input = LENIENT_HANDSHAKE.to_vec();
    input.extend(close_frame());
    let socket = Cursor::new(input);
    let config = Config::default();
    let mut hooks = Recorder::default();
    let conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
    assert_eq!(conn.host(), "server");
}

#[async_std::test]
async fn scenario_3_masked_text_frame_dispatches_on_text() {
    let mut input = HANDSHAKE.to_vec();
    // FIN+Text, masked, len 5, mask 37 fa 21 3d, masked "Hello".
    input.extend_from_slice(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    input.extend(close_frame());
    let socket = Cursor::new(input);
    let config = Config::default();
    let mut hooks = Recorder::default();
    let mut conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
    conn.run(&mut hooks).await.unwrap();
    assert_eq!(hooks.texts.lock().unwrap().as_slice(), &["Hello".to_string()]);
}

#[async_std::test]
async fn scenario_4_ping_pong_dispatches_on_ping() {
    let mut input = HANDSHAKE.to_vec();
    // Masked empty ping: FIN+Ping, masked, len 0, mask 00 00 00 00.
    input.extend_from_slice(&[0x89, 0x80, 0, 0, 0, 0]);
    input.extend(close_frame());
    let socket = Cursor::new(input);
    let config = Config::default();
    let mut hooks = Recorder::default();
    let mut conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
    conn.run(&mut hooks).await.unwrap();
    let pings = hooks.pings.lock().unwrap();
    assert_eq!(pings.len(), 1);
    assert!(pings[0].is_empty());
}

#[async_std::test]
async fn scenario_5_unmasked_client_frame_is_rejected() {
    let mut input = HANDSHAKE.to_vec();
    // FIN+Text, NOT masked, len 5, "Hello" (bit 7 of second byte clear).
    input.extend_from_slice(&[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    let socket = Cursor::new(input);
    let config = Config::default();
    let mut hooks = Recorder::default();
    let mut conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
    let err = conn.run(&mut hooks).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnmaskedClientFrame);
    assert!(hooks.texts.lock().unwrap().is_empty());
}

#[async_std::test]
async fn scenario_6_fragmented_control_frame_is_rejected() {
    let mut input = HANDSHAKE.to_vec();
    // Ping with FIN = 0 (fragmented control), masked, len 0.
    input.extend_from_slice(&[0x09, 0x80, 0, 0, 0, 0]);
    let socket = Cursor::new(input);
    let config = Config::default();
    let mut hooks = Recorder::default();
    let mut conn = Connection::accept(socket, &config, &mut hooks).await.unwrap();
    let err = conn.run(&mut hooks).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FragmentedControlFrame);
    assert!(hooks.pings.lock().unwrap().is_empty());
}

#[async_std::test]
async fn rejects_a_malformed_handshake_as_a_missing_host_header() {
    let socket = Cursor::new(b"GET /chat HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n".to_vec());
    let config = Config::default();
    let mut hooks = Recorder::default();
    let err = Connection::accept(socket, &config, &mut hooks).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingHost);
    assert_matches!(err, ProtocolError::Handshake(_));
}
