// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A growable, chunked read buffer backing [`crate::view::ByteView`].
//!
//! Incoming bytes are appended as separate [`BytesMut`] chunks rather than
//! being copied into one contiguous allocation, mirroring how
//! `soketto`'s `connection::Receiver` grows its `BytesMut` read buffer on
//! demand (`read_buffer`/`receive_header` in `connection.rs`) but without
//! forcing every chunk into a single backing allocation: [`Buffer::view`]
//! exposes the queued chunks to a parser as one logical [`ByteView`], and
//! [`Buffer::consume`] retires bytes from the front, possibly spanning
//! several chunks, once the parser reports how much it used.

use crate::view::ByteView;
use bytes::{Buf, BytesMut};
use futures::io::AsyncRead;
use futures::AsyncReadExt;
use std::collections::VecDeque;
use std::io;

/// Default chunk size requested from the transport on each read.
pub const BLOCK_SIZE: usize = 8 * 1024;

/// A queue of byte chunks with a cheap, span-preserving view and a cheap
/// (amortized `O(1)` per chunk) front-consume operation.
#[derive(Debug, Default)]
pub struct Buffer {
    chunks: VecDeque<BytesMut>,
    len: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Buffer { chunks: VecDeque::new(), len: 0 }
    }

    /// Total buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A read-only, zero-copy view over everything currently buffered.
    pub fn view(&self) -> ByteView<'_> {
        ByteView::from_spans(self.chunks.iter().map(|c| c.as_ref()))
    }

    /// Drop the first `n` bytes. Panics if `n` exceeds [`Buffer::len`],
    /// the same contract `BytesMut::advance` has for a single chunk.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len, "consume({}) exceeds buffered length {}", n, self.len);
        let mut remaining = n;
        while remaining > 0 {
            let front = self.chunks.front_mut().expect("len tracked consistently with chunks");
            if front.len() <= remaining {
                remaining -= front.len();
                self.chunks.pop_front();
            } else {
                front.advance(remaining);
                remaining = 0;
            }
        }
        self.len -= n;
    }

    /// Read at least one more chunk from `reader`, growing the buffer.
    /// Returns `Ok(true)` having appended a non-empty chunk, or
    /// `Ok(false)` if the transport reached EOF without producing any
    /// bytes. EOF is never reported as an error here: only the caller
    /// knows whether an empty read at this point is a clean stop (no
    /// partial frame pending) or a fatal mid-frame truncation.
    pub async fn fill_more<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> io::Result<bool> {
        let mut block = vec![0u8; BLOCK_SIZE];
        let n = reader.read(&mut block).await?;
        if n == 0 {
            return Ok(false)
        }
        block.truncate(n);
        self.len += block.len();
        self.chunks.push_back(BytesMut::from(&block[..]));
        Ok(true)
    }

    /// Read from `reader` until at least `target` bytes are buffered, or
    /// the transport reaches EOF first. Returns `false` on EOF with
    /// fewer than `target` bytes buffered.
    pub async fn fill_at_least_or_eof<R: AsyncRead + Unpin>(&mut self, reader: &mut R, target: usize) -> io::Result<bool> {
        while self.len < target {
            if !self.fill_more(reader).await? {
                return Ok(false)
            }
        }
        Ok(true)
    }

    /// Read from `reader` until at least `target` bytes are buffered.
    /// Returns an `UnexpectedEof` error if the transport closes first.
    pub async fn fill_at_least<R: AsyncRead + Unpin>(&mut self, reader: &mut R, target: usize) -> io::Result<()> {
        if !self.fill_at_least_or_eof(reader, target).await? {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"))
        }
        Ok(())
    }
}
