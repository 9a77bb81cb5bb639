// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `Connection`: a framed, mutually-exclusive byte or WebSocket-frame
//! stream, plus the exclusive raw-substream handover implemented in
//! [`streamer`].

pub mod streamer;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use self::streamer::Streamer;
use crate::{
    Error, Result,
    codec::{Codec, JsonCodec, TlvCodec, WebSocketCodec},
    codec::ws::{WsSink, WsSource},
    packet::AnyPacket,
};

/// Either half of a byte-stream connection, type-erased so TCP sockets,
/// `tokio::io::duplex` test pipes, and any other `AsyncRead`/`AsyncWrite`
/// implementor can share one `Connection` type.
pub(crate) enum ReadHalf {
    Stream(Box<dyn AsyncRead + Unpin + Send>),
    WebSocket(Box<dyn WsSource>),
}

pub(crate) enum WriteHalf {
    Stream(Box<dyn AsyncWrite + Unpin + Send>),
    WebSocket(Box<dyn WsSink>),
}

/// Which codec a connection's packets are framed with.
enum ConnCodec {
    Tlv(TlvCodec),
    Json(JsonCodec),
    WebSocket(WebSocketCodec),
}

/// Owns a socket (or WebSocket), its read/write mutual exclusion, and the
/// exclusive stream-mode gate.
///
/// The read and write halves each live behind their own `Arc<Mutex<_>>` so
/// that [`Streamer::open`] can take *owned* lock guards (via
/// `lock_owned()`) that outlive the call that created them — the standard
/// pattern for handing out a scoped exclusive view without self-referential
/// borrows. While a `Streamer` holds both owned guards, any concurrent
/// `send_packet`/`read_packet` call simply blocks on the same mutex; no
/// separate condition variable is needed to get the "block until the
/// streamer closes, then proceed" behavior the contract asks for.
pub struct Connection {
    codec: ConnCodec,
    read_half: Arc<Mutex<ReadHalf>>,
    write_half: Arc<Mutex<WriteHalf>>,
    /// Fast-path rejection for a second concurrent `stream()` call; the
    /// actual exclusion is the mutexes above, this flag only turns "try to
    /// open a second streamer" into an immediate error instead of a stall.
    stream_open: AtomicBool,
    /// Cancelled and replaced by `stream()` to force a `read_packet`/
    /// `send_packet` call already blocked on the next frame to give up its
    /// mutex guard instead of waiting on traffic that may never arrive.
    handover_cancel: std::sync::Mutex<CancellationToken>,
    closed: AtomicBool,
    local_addr: Option<String>,
    remote_addr: Option<String>,
}

impl Connection {
    /// Wraps a byte stream (TCP, TLS, or an in-memory `tokio::io::duplex`
    /// half) as a TLV-framed connection.
    pub fn new_tlv<S>(stream: S, local_addr: Option<String>, remote_addr: Option<String>) -> Self
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static {
        Self::new_stream(ConnCodec::Tlv(TlvCodec::default()), stream, local_addr, remote_addr)
    }

    /// Same as [`Self::new_tlv`] but with an explicitly configured codec
    /// (e.g. a non-default max payload length).
    pub fn new_tlv_with_codec<S>(
        codec: TlvCodec,
        stream: S,
        local_addr: Option<String>,
        remote_addr: Option<String>,
    ) -> Self
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static {
        Self::new_stream(ConnCodec::Tlv(codec), stream, local_addr, remote_addr)
    }

    /// Wraps a byte stream as a JSON-framed connection with the given
    /// frame delimiter.
    pub fn new_json<S>(
        stream: S,
        delimiter: Vec<u8>,
        local_addr: Option<String>,
        remote_addr: Option<String>,
    ) -> Self
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static {
        Self::new_stream(ConnCodec::Json(JsonCodec::new(delimiter)), stream, local_addr, remote_addr)
    }

    fn new_stream<S>(
        codec: ConnCodec,
        stream: S,
        local_addr: Option<String>,
        remote_addr: Option<String>,
    ) -> Self
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static {
        let (read, write) = tokio::io::split(stream);
        Self {
            codec,
            read_half: Arc::new(Mutex::new(ReadHalf::Stream(Box::new(read)))),
            write_half: Arc::new(Mutex::new(WriteHalf::Stream(Box::new(write)))),
            stream_open: AtomicBool::new(false),
            handover_cancel: std::sync::Mutex::new(CancellationToken::new()),
            closed: AtomicBool::new(false),
            local_addr,
            remote_addr,
        }
    }

    /// Wraps an already-split WebSocket sink/source pair as a
    /// frame-per-packet connection.
    pub fn new_websocket(
        sink: Box<dyn WsSink>,
        source: Box<dyn WsSource>,
        local_addr: Option<String>,
        remote_addr: Option<String>,
    ) -> Self {
        Self {
            codec: ConnCodec::WebSocket(WebSocketCodec),
            read_half: Arc::new(Mutex::new(ReadHalf::WebSocket(source))),
            write_half: Arc::new(Mutex::new(WriteHalf::WebSocket(sink))),
            stream_open: AtomicBool::new(false),
            handover_cancel: std::sync::Mutex::new(CancellationToken::new()),
            closed: AtomicBool::new(false),
            local_addr,
            remote_addr,
        }
    }

    pub fn local_addr(&self) -> Option<&str> {
        self.local_addr.as_deref()
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    fn handover_token(&self) -> CancellationToken {
        self.handover_cancel.lock().expect("handover_cancel mutex poisoned").clone()
    }

    /// Sends one framed packet. At most one `send_packet` executes at a
    /// time; while a `Streamer` is open, this blocks until it closes.
    ///
    /// Races against a handover cancellation so a call already blocked on
    /// the write-half mutex or on a slow peer gives up its mutex guard
    /// instead of starving a concurrent [`Self::stream`] call forever.
    pub async fn send_packet(&self, packet: &AnyPacket) -> Result<()> {
        let cancel = self.handover_token();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::StreamHandover),
            result = async {
                let mut guard = self.write_half.lock().await;
                match (&self.codec, &mut *guard) {
                    (ConnCodec::Tlv(c), WriteHalf::Stream(w)) => c.write(w.as_mut(), packet).await,
                    (ConnCodec::Json(c), WriteHalf::Stream(w)) => c.write(w.as_mut(), packet).await,
                    (ConnCodec::WebSocket(c), WriteHalf::WebSocket(w)) => {
                        c.write(w.as_mut(), packet).await
                    },
                    _ => unreachable!("connection codec and transport kind are set together"),
                }
            } => result,
        }
    }

    /// Reads exactly one framed packet, blocking until it is available.
    ///
    /// See [`Self::send_packet`] for why this races a cancellation token:
    /// without it, a session's background read loop can hold the read mutex
    /// indefinitely waiting on traffic, and [`Self::stream`] would never be
    /// able to reclaim it.
    pub async fn read_packet(&self) -> Result<AnyPacket> {
        let cancel = self.handover_token();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::StreamHandover),
            result = async {
                let mut guard = self.read_half.lock().await;
                match (&self.codec, &mut *guard) {
                    (ConnCodec::Tlv(c), ReadHalf::Stream(r)) => c.read(r.as_mut()).await,
                    (ConnCodec::Json(c), ReadHalf::Stream(r)) => c.read(r.as_mut()).await,
                    (ConnCodec::WebSocket(c), ReadHalf::WebSocket(r)) => c.read(r.as_mut()).await,
                    _ => unreachable!("connection codec and transport kind are set together"),
                }
            } => result,
        }
    }

    /// Opens an exclusive raw substream on top of this connection. Framing
    /// handover happens at a packet boundary by contract: the caller must
    /// have completed a full `read_packet`/`send_packet` exchange before
    /// calling this.
    ///
    /// Cancels any `read_packet`/`send_packet` call currently blocked on the
    /// mutexes below before acquiring them, so a session's live read loop
    /// cannot deadlock this call forever. A fresh token is only installed
    /// once both owned guards are held, so a call that sneaks in ahead of us
    /// still observes the cancelled token and bails out via
    /// `Error::StreamHandover` instead of blocking on new I/O with no
    /// cancellation armed.
    pub async fn stream(self: &Arc<Self>) -> Result<Streamer> {
        if matches!(self.codec, ConnCodec::WebSocket(_)) {
            return Err(Error::TypeMismatch {
                codec: "streamer",
                found: "websocket",
            });
        }
        if self
            .stream_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::StreamAlreadyOpen);
        }
        self.handover_token().cancel();
        let read_guard = self.read_half.clone().lock_owned().await;
        let write_guard = self.write_half.clone().lock_owned().await;
        *self.handover_cancel.lock().expect("handover_cancel mutex poisoned") =
            CancellationToken::new();
        Ok(Streamer::new(self.clone(), read_guard, write_guard))
    }

    pub(crate) fn clear_stream_open(&self) {
        self.stream_open.store(false, Ordering::Release);
    }

    /// Idempotent close; only the first caller observes the underlying
    /// shutdown error.
    pub async fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        debug!(remote = ?self.remote_addr, "closing connection");
        let mut guard = self.write_half.lock().await;
        match &mut *guard {
            WriteHalf::Stream(w) => w.shutdown().await.map_err(Error::Io),
            WriteHalf::WebSocket(sink) => {
                sink.send(crate::packet::ws::WsMessage::Close).await
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}
