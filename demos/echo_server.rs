// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A minimal echo server, the same role `examples/autobahn_server.rs`
//! plays in the teacher pack: bind, accept, echo every text/binary
//! message back to its sender.
//!
//! Run with `cargo run --example echo_server`, then connect with any
//! websocket client to `ws://127.0.0.1:9001/`.

use async_std::net::TcpStream;
use async_std::task;
use futures::future::BoxFuture;
use std::net::IpAddr;
use wsforge_core::connection::Connection;
use wsforge_core::hooks::Hooks;
use wsforge_core::server::{Config, Server};

#[derive(Default)]
struct Echo;

impl Hooks<TcpStream> for Echo {
    fn on_text<'a>(&'a mut self, conn: &'a mut Connection<TcpStream>, text: String) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = conn.send_text(&text).await {
                log::debug!("failed to echo text message: {}", e);
            }
        })
    }

    fn on_binary<'a>(&'a mut self, conn: &'a mut Connection<TcpStream>, data: Vec<u8>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = conn.send_binary(&data).await {
                log::debug!("failed to echo binary message: {}", e);
            }
        })
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let config = Config::new().with_bind_address(IpAddr::from([127, 0, 0, 1])).with_port(9001);
    let server = Server::new(config, Echo::default);
    task::block_on(server.serve())
}
