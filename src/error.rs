// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The crate's public error type.
//!
//! Every row of the error-handling table has its own variant so that policy
//! code (read loops, the manager, the reconnect loop) can `match` on kind
//! instead of string-sniffing an [`anyhow::Error`]. Internal helpers that are
//! not part of the public contract (config loading, demo glue) keep using
//! `anyhow::Result` the way the rest of the crate ecosystem does; this type
//! converts into `anyhow::Error` for free via `?`.

use thiserror::Error;

/// Convenience alias used throughout the public API surface.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure kind a caller of this crate's core runtime may observe.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying socket I/O failure. A clean peer shutdown is reported as
    /// `std::io::ErrorKind::UnexpectedEof`, not as a separate variant.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The codec could not make sense of the bytes on the wire.
    #[error("format error: {0}")]
    Format(String),

    /// The checksum recomputed over a TLV frame did not match the byte on
    /// the wire.
    #[error("invalid checksum: expected {expected:#04x}, found {found:#04x}")]
    InvalidChecksum {
        /// Checksum recomputed from the header and payload bytes.
        expected: u8,
        /// Checksum byte actually present on the wire.
        found: u8,
    },

    /// A codec was asked to encode or decode a packet kind it does not
    /// understand.
    #[error("type mismatch: codec {codec} cannot handle {found}")]
    TypeMismatch {
        /// Name of the codec that rejected the packet.
        codec: &'static str,
        /// Name of the packet kind it was handed.
        found: &'static str,
    },

    /// The authenticator rejected the connection, or returned an invalid
    /// user.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// `Connection::stream()` was called while a `Streamer` was already
    /// open on that connection.
    #[error("a streamer is already open on this connection")]
    StreamAlreadyOpen,

    /// An in-flight `read_packet`/`send_packet` call was cancelled because
    /// `Connection::stream()` reclaimed the mutex it was blocked on; not a
    /// transport fault. A session's read loop treats this as "retry", not
    /// "terminate".
    #[error("connection reclaimed for an exclusive streamer hand-off")]
    StreamHandover,

    /// A `Streamer` operation was attempted after the streamer was closed.
    #[error("the streamer has been closed")]
    StreamClosed,

    /// A `Streamer::write` payload exceeded the 65535-byte frame limit.
    #[error("segment size overflow: {len} bytes exceeds the {max}-byte frame limit")]
    SegmentSizeOverflow {
        /// The length the caller attempted to write.
        len: usize,
        /// The maximum payload length a single frame can carry.
        max: usize,
    },

    /// `send_request_timeout` elapsed before a correlated reply arrived.
    #[error("deadline exceeded waiting for a reply")]
    DeadlineExceeded,

    /// The server's listener was closed; the accept loop ended cleanly.
    #[error("listener closed")]
    ListenerClosed,

    /// The manager or client has already been closed.
    #[error("manager closed")]
    Closed,
}

impl Error {
    /// True for errors that represent a clean peer shutdown rather than a
    /// framing or transport fault — used by read loops to decide whether to
    /// log at `warn` or terminate silently.
    pub fn is_clean_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }

    /// True when a read/write was interrupted by a streamer hand-off rather
    /// than a real fault — used by read loops to retry instead of
    /// terminating.
    pub fn is_stream_handover(&self) -> bool {
        matches!(self, Error::StreamHandover)
    }
}
