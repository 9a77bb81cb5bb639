// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! WebSocket frame-bearing packet.
//!
//! The WebSocket server adapter reads/writes whole
//! [`tokio_tungstenite::tungstenite::Message`] frames rather than raw
//! bytes; `WebSocketPacket` carries one such frame plus the correlation
//! fields every packet needs. Binary frames carry a [`TlvPacket`]-shaped
//! payload (label/version/type/id/timestamp/data, without the checksum
//! trailer, since the WebSocket frame itself is already integrity-checked
//! by the transport).

use tokio_tungstenite::tungstenite::Message;

use super::Packet;

#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketPacket {
    pub type_code: i32,
    pub id: i64,
    pub timestamp_ms: i64,
    pub message: WsMessage,
}

/// A `Message` stand-in that derives the traits this crate needs
/// (`tungstenite::Message` itself is `Clone`/`PartialEq` but not `Eq`, so
/// this wrapper only adds what the packet type requires).
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    Binary(Vec<u8>),
    Text(String),
    Close,
}

impl From<Message> for WsMessage {
    fn from(m: Message) -> Self {
        match m {
            Message::Binary(b) => WsMessage::Binary(b.to_vec()),
            Message::Text(t) => WsMessage::Text(t.to_string()),
            _ => WsMessage::Close,
        }
    }
}

impl From<WsMessage> for Message {
    fn from(m: WsMessage) -> Self {
        match m {
            WsMessage::Binary(b) => Message::Binary(b.into()),
            WsMessage::Text(t) => Message::Text(t.into()),
            WsMessage::Close => Message::Close(None),
        }
    }
}

impl WebSocketPacket {
    pub fn new(type_code: i32, id: i64, data: Vec<u8>) -> Self {
        Self {
            type_code,
            id,
            timestamp_ms: 0,
            message: WsMessage::Binary(data),
        }
    }

    pub fn data(&self) -> &[u8] {
        match &self.message {
            WsMessage::Binary(b) => b,
            WsMessage::Text(t) => t.as_bytes(),
            WsMessage::Close => &[],
        }
    }
}

impl Packet for WebSocketPacket {
    fn id(&self) -> i64 {
        self.id
    }

    fn is_keepalive(&self) -> bool {
        matches!(self.message, WsMessage::Close)
    }
}
