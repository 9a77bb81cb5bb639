// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The wire packet types.
//!
//! [`Packet`] is the minimal identity contract every concrete wire format
//! implements; [`AnyPacket`] is the tagged variant codecs, the session read
//! loop and the RPC dispatcher actually pass around.

pub mod json;
pub mod tlv;
pub mod ws;

pub use json::JsonPacket;
pub use tlv::TlvPacket;
pub use ws::WebSocketPacket;

/// Identity operations every concrete packet kind exposes, regardless of
/// wire format.
pub trait Packet {
    /// Request/response correlation key. 64-bit uniformly (see the design
    /// note on packet id width): the TLV format is natively 64-bit and the
    /// other formats widen into the same key space.
    fn id(&self) -> i64;
    /// True when this packet is a keepalive rather than application data.
    fn is_keepalive(&self) -> bool;
}

/// A tagged union over every concrete packet kind this crate understands.
///
/// Codecs produce and consume only the variant they speak; handing a codec
/// the wrong variant is an [`crate::Error::TypeMismatch`], not a panic.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPacket {
    /// Binary TLV framing.
    Tlv(TlvPacket),
    /// Delimited JSON framing.
    Json(JsonPacket),
    /// WebSocket frame-per-packet framing.
    WebSocket(WebSocketPacket),
}

impl Packet for AnyPacket {
    fn id(&self) -> i64 {
        match self {
            AnyPacket::Tlv(p) => p.id(),
            AnyPacket::Json(p) => p.id(),
            AnyPacket::WebSocket(p) => p.id(),
        }
    }

    fn is_keepalive(&self) -> bool {
        match self {
            AnyPacket::Tlv(p) => p.is_keepalive(),
            AnyPacket::Json(p) => p.is_keepalive(),
            AnyPacket::WebSocket(p) => p.is_keepalive(),
        }
    }
}

impl From<TlvPacket> for AnyPacket {
    fn from(p: TlvPacket) -> Self {
        AnyPacket::Tlv(p)
    }
}

impl From<JsonPacket> for AnyPacket {
    fn from(p: JsonPacket) -> Self {
        AnyPacket::Json(p)
    }
}

impl From<WebSocketPacket> for AnyPacket {
    fn from(p: WebSocketPacket) -> Self {
        AnyPacket::WebSocket(p)
    }
}
