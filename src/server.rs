// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The `Server` facade: bind, accept, and hand each connection off to its
//! own task, the way `examples/autobahn_server.rs` and
//! `examples/hyper_server.rs` drive `handshake::Server` inline in a
//! `while let Some(s) = incoming.next().await` loop. This module wraps
//! that loop into a reusable type, configurable through [`Config`]
//! rather than hardcoded constants, and logs lifecycle transitions the
//! way `connection.rs`/`handshake/server.rs` already do with `log::debug!`.

use crate::connection::Connection;
use crate::error::ProtocolError;
use crate::hooks::Hooks;
use async_std::net::{TcpListener, TcpStream};
use futures::io::{AsyncRead, AsyncWrite};
use futures::StreamExt;
use std::net::IpAddr;
use std::sync::Arc;

/// Limits and behavior knobs for a [`Server`] (or for
/// [`Connection::accept`] used directly without the listener facade).
///
/// `max_frame_size`/`max_message_size`/`max_header_bytes` are not part of
/// the distilled protocol design but are carried from
/// `connection.rs`'s `MAX_FRAME_SIZE`/`MAX_MESSAGE_SIZE` constants,
/// promoted to configurable fields the way a production deployment of
/// this lineage would need them to be (a single embedded device and an
/// internet-facing edge server do not want the same ceiling).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: IpAddr,
    pub port: u16,
    pub allow_clients_missing_connection_headers: bool,
    pub max_frame_size: u64,
    pub max_message_size: u64,
    pub max_header_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 80,
            allow_clients_missing_connection_headers: true,
            max_frame_size: 256 * 1024 * 1024,
            max_message_size: 256 * 1024 * 1024,
            max_header_bytes: 64 * 1024,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_allow_clients_missing_connection_headers(mut self, allow: bool) -> Self {
        self.allow_clients_missing_connection_headers = allow;
        self
    }

    pub fn with_max_frame_size(mut self, max: u64) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn with_max_message_size(mut self, max: u64) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_max_header_bytes(mut self, max: usize) -> Self {
        self.max_header_bytes = max;
        self
    }
}

/// A TCP accept loop that performs the RFC 6455 handshake on each
/// incoming connection and then hands it to [`Connection::run`].
///
/// `F` builds a fresh [`Hooks`] implementation per connection, since
/// hook state (a per-client authentication flag, a message counter) is
/// almost never meant to be shared across connections.
pub struct Server<F> {
    config: Arc<Config>,
    make_hooks: F,
}

impl<F, H> Server<F>
where
    F: Fn() -> H + Send + Sync + 'static,
    H: Hooks<TcpStream> + Send + 'static,
{
    pub fn new(config: Config, make_hooks: F) -> Self {
        Server { config: Arc::new(config), make_hooks }
    }

    /// Bind and serve until the listener errors or the process is
    /// signalled to stop; each accepted connection is spawned onto its
    /// own `async-std` task, so one slow or misbehaving client cannot
    /// stall another.
    pub async fn serve(&self) -> std::io::Result<()> {
        let addr = std::net::SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        log::debug!("listening on {}", addr);
        let mut incoming = listener.incoming();
        while let Some(stream) = incoming.next().await {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::debug!("accept error: {}", e);
                    continue
                }
            };
            let config = Arc::clone(&self.config);
            let mut hooks = (self.make_hooks)();
            async_std::task::spawn(async move {
                if let Err(e) = handle_connection(stream, &config, &mut hooks).await {
                    log::debug!("connection terminated: {} (kind {:?})", e, e.kind());
                }
            });
        }
        Ok(())
    }
}

async fn handle_connection<T, H>(socket: T, config: &Config, hooks: &mut H) -> Result<(), ProtocolError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
    H: Hooks<T>,
{
    let mut conn = Connection::accept(socket, config, hooks).await?;
    conn.run(hooks).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_teacher_derived_limits() {
        let c = Config::default();
        assert_eq!(c.port, 80);
        assert!(c.allow_clients_missing_connection_headers);
        assert_eq!(c.max_message_size, 256 * 1024 * 1024);
    }

    #[test]
    fn builder_methods_chain() {
        let c = Config::new().with_port(9001).with_allow_clients_missing_connection_headers(false);
        assert_eq!(c.port, 9001);
        assert!(!c.allow_clients_missing_connection_headers);
    }
}
