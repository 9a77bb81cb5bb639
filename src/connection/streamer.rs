// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The exclusive length-prefixed substream handed out by
//! [`super::Connection::stream`].

use std::sync::Arc;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::OwnedMutexGuard,
};

use super::{Connection, ReadHalf, WriteHalf};
use crate::{Error, Result};

/// Maximum payload length a single frame can carry; `Streamer::write`
/// rejects anything larger with `SegmentSizeOverflow`.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// A scoped, exclusive raw substream over a [`Connection`]'s byte stream.
///
/// Not safe for concurrent use by multiple callers — like the connection it
/// borrows from, a `Streamer` serializes its own reads and writes by
/// requiring `&mut self`.
pub struct Streamer {
    connection: Arc<Connection>,
    read_guard: OwnedMutexGuard<ReadHalf>,
    write_guard: OwnedMutexGuard<WriteHalf>,
    closed: bool,
}

impl Streamer {
    pub(super) fn new(
        connection: Arc<Connection>,
        read_guard: OwnedMutexGuard<ReadHalf>,
        write_guard: OwnedMutexGuard<WriteHalf>,
    ) -> Self {
        Self {
            connection,
            read_guard,
            write_guard,
            closed: false,
        }
    }

    fn reader(&mut self) -> &mut (dyn tokio::io::AsyncRead + Unpin + Send) {
        match &mut *self.read_guard {
            ReadHalf::Stream(r) => r.as_mut(),
            ReadHalf::WebSocket(_) => {
                unreachable!("Connection::stream rejects websocket transports")
            },
        }
    }

    fn writer(&mut self) -> &mut (dyn tokio::io::AsyncWrite + Unpin + Send) {
        match &mut *self.write_guard {
            WriteHalf::Stream(w) => w.as_mut(),
            WriteHalf::WebSocket(_) => {
                unreachable!("Connection::stream rejects websocket transports")
            },
        }
    }

    /// Writes `data` as one length-prefixed frame. Fails with
    /// `SegmentSizeOverflow` if `data.len() > 65535`.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::StreamClosed);
        }
        if data.len() > MAX_FRAME_LEN {
            return Err(Error::SegmentSizeOverflow {
                len: data.len(),
                max: MAX_FRAME_LEN,
            });
        }
        let len = data.len() as u16;
        let writer = self.writer();
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads the next frame's payload in full. Returns `Ok(None)` on the
    /// distinguished zero-length close frame (a clean remote close); a
    /// partial frame is reported as `Error::Io` with
    /// `ErrorKind::UnexpectedEof`.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Err(Error::StreamClosed);
        }

        let mut len_buf = [0u8; 2];
        self.reader().read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf);
        if len == 0 {
            return Ok(None);
        }

        let mut payload = vec![0u8; len as usize];
        self.reader().read_exact(&mut payload).await?;
        Ok(Some(payload))
    }

    /// Closes the substream: emits the zero-length frame once, then
    /// releases the connection's read/write exclusivity. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let writer = self.writer();
        let result = writer.write_all(&0u16.to_be_bytes()).await;
        self.connection.clear_stream_open();
        result.map_err(Error::Io)
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if !self.closed {
            self.connection.clear_stream_open();
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::connection::Connection;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let (a, b) = duplex(4096);
        let conn_a = Arc::new(Connection::new_tlv(a, None, None));
        let conn_b = Arc::new(Connection::new_tlv(b, None, None));

        let mut streamer_a = conn_a.stream().await.expect("open streamer a");
        let mut streamer_b = conn_b.stream().await.expect("open streamer b");

        streamer_a.write(b"hello world").await.expect("write");
        let got = streamer_b.read().await.expect("read");
        assert_eq!(got, Some(b"hello world".to_vec()));
    }

    #[tokio::test]
    async fn second_stream_open_is_rejected() {
        let (a, _b) = duplex(4096);
        let conn = Arc::new(Connection::new_tlv(a, None, None));
        let _first = conn.stream().await.expect("open first streamer");
        let second = conn.stream().await;
        assert!(matches!(second, Err(Error::StreamAlreadyOpen)));
    }

    #[tokio::test]
    async fn close_emits_zero_length_frame() {
        let (a, b) = duplex(4096);
        let conn_a = Arc::new(Connection::new_tlv(a, None, None));
        let conn_b = Arc::new(Connection::new_tlv(b, None, None));

        let mut streamer_a = conn_a.stream().await.expect("open streamer a");
        let mut streamer_b = conn_b.stream().await.expect("open streamer b");

        streamer_a.close().await.expect("close");
        let got = streamer_b.read().await.expect("read");
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn oversized_write_is_rejected() {
        let (a, _b) = duplex(4096);
        let conn = Arc::new(Connection::new_tlv(a, None, None));
        let mut streamer = conn.stream().await.expect("open streamer");
        let oversized = vec![0u8; MAX_FRAME_LEN + 1];
        let err = streamer.write(&oversized).await.expect_err("too long");
        assert!(matches!(err, Error::SegmentSizeOverflow { .. }));
    }
}
