// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The application-facing callback surface a [`crate::connection::Connection`]
//! dispatches to as frames arrive.
//!
//! No teacher file defines anything like this directly — `soketto`'s
//! examples (`examples/autobahn_server.rs`, `examples/hyper_server.rs`)
//! just match on `connection::Receiver::receive`'s result inline in the
//! accept loop. This trait generalizes that inline match into a
//! reusable, default-implemented interface, in the same spirit as the
//! teacher's `Extension` trait (`extension.rs`), which is likewise a
//! small trait with mostly-defaulted methods that a caller overrides
//! selectively. Methods return a boxed future rather than being declared
//! `async fn` so the trait stays object-safe and usable as
//! `&mut dyn Hooks<T>` without requiring the `async-trait` crate, which
//! is not part of the teacher's dependency stack.

use crate::connection::Connection;
use futures::future::BoxFuture;
use futures::io::{AsyncRead, AsyncWrite};

/// Callbacks invoked by the per-connection frame loop.
///
/// All methods are given a mutable reference to the [`Connection`] itself
/// so they can write a reply (e.g. answering a ping with application
/// data, or closing the connection from `on_text`) without the frame
/// loop needing to special-case every possible reaction.
pub trait Hooks<T>: Send
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Called once, immediately after the HTTP upgrade request has been
    /// parsed but before the 101 response is sent. Returning `false`
    /// rejects the handshake with an HTTP 401 response instead.
    fn on_authenticate<'a>(&'a mut self, _conn: &'a mut Connection<T>) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    /// Called once the 101 response has been written and the connection
    /// has switched protocols.
    fn on_handshake_complete<'a>(&'a mut self, _conn: &'a mut Connection<T>) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Called with a complete, UTF-8-validated text message (all
    /// fragments of a fragmented message already concatenated).
    fn on_text<'a>(&'a mut self, _conn: &'a mut Connection<T>, _text: String) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Called with a complete binary message.
    fn on_binary<'a>(&'a mut self, _conn: &'a mut Connection<T>, _data: Vec<u8>) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Called for an incoming ping. The core always answers with a pong
    /// carrying the same payload before this hook runs, so overriding it
    /// is for observation, not for suppressing the protocol-mandated
    /// reply.
    fn on_ping<'a>(&'a mut self, _conn: &'a mut Connection<T>, _payload: Vec<u8>) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Called for an incoming unsolicited pong.
    fn on_pong<'a>(&'a mut self, _conn: &'a mut Connection<T>, _payload: Vec<u8>) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Called when the peer initiates a close. The core always echoes a
    /// Close frame (validating or replacing the status code per RFC 6455
    /// §7.4.1) before this hook runs and before the frame loop returns.
    fn on_close<'a>(&'a mut self, _conn: &'a mut Connection<T>, _code: Option<u16>, _reason: String) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// A [`Hooks`] implementation that does nothing, for connections that
/// only need the protocol-mandated ping/close replies.
#[derive(Debug, Default)]
pub struct NoopHooks;

impl<T> Hooks<T> for NoopHooks where T: AsyncRead + AsyncWrite + Unpin + Send {}
