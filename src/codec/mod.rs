// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Framing codecs: pure translation between bytes and [`AnyPacket`]s.
//!
//! A codec carries no session state. It knows how to read exactly one
//! framed packet from an async reader and how to write exactly one framed
//! packet to an async writer; nothing else. [`Codec`] is written as an
//! object-safe trait (boxed futures instead of `async fn`) so a
//! [`crate::connection::Connection`] can hold `Arc<dyn Codec>` without
//! pulling in `async-trait`.

pub mod json;
pub mod tlv;
pub mod ws;

use std::{future::Future, pin::Pin};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Result, packet::AnyPacket};

pub use self::{json::JsonCodec, tlv::TlvCodec, ws::WebSocketCodec};

/// Boxed-future return type shared by every `Codec` method.
pub type CodecFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Pure framing: bytes in, [`AnyPacket`] out, and back.
pub trait Codec: Send + Sync {
    /// Reads exactly one framed packet, blocking until the full frame is
    /// available. Returns `Err(Error::Io(e))` with
    /// `e.kind() == UnexpectedEof` on a clean peer shutdown between frames.
    fn read<'a>(
        &'a self,
        reader: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> CodecFuture<'a, AnyPacket>;

    /// Writes exactly one framed packet. Returns `Error::TypeMismatch` if
    /// `packet` is not the variant this codec understands.
    fn write<'a>(
        &'a self,
        writer: &'a mut (dyn AsyncWrite + Unpin + Send),
        packet: &'a AnyPacket,
    ) -> CodecFuture<'a, ()>;

    /// Human-readable name used in `TypeMismatch` error messages.
    fn name(&self) -> &'static str;
}
