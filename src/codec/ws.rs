// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! WebSocket frame codec.
//!
//! Unlike [`super::tlv::TlvCodec`] and [`super::json::JsonCodec`], this
//! codec does not read/write raw bytes: the WebSocket protocol already
//! frames messages, so a [`crate::connection::Connection`] in WebSocket
//! mode hands this codec whole frames through [`WsSink`]/[`WsSource`]
//! rather than an `AsyncRead`/`AsyncWrite` pair. `WebSocketCodec` therefore
//! does not implement [`super::Codec`]; the connection layer detects the
//! WebSocket transport and calls [`WebSocketCodec::read`]/`write` directly
//! against the frame API instead.

use std::{future::Future, pin::Pin};

use crate::{
    Error, Result,
    packet::{AnyPacket, ws::WsMessage},
};

/// One binary WebSocket frame's header: `type:i32`, `id:i64`,
/// `timestamp_ms:i64`, all big-endian, followed by the payload. Text frames
/// carry the same fields JSON-encoded (see [`crate::packet::JsonPacket`]
/// for the field names) and are accepted for interop with browser clients
/// that cannot easily emit binary frames.
const BINARY_HEADER_LEN: usize = 4 + 8 + 8;

/// Sink half of a WebSocket connection, implemented against both
/// `axum::extract::ws::WebSocket` (server) and a split
/// `tokio_tungstenite::WebSocketStream` half (client dial).
pub trait WsSink: Send {
    fn send<'a>(
        &'a mut self,
        message: WsMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Source half of a WebSocket connection.
pub trait WsSource: Send {
    /// Returns `Ok(None)` on a clean close frame.
    fn recv<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WsMessage>>> + Send + 'a>>;
}

#[derive(Debug, Clone, Default)]
pub struct WebSocketCodec;

impl WebSocketCodec {
    /// Reads the next application packet, translating a close frame or a
    /// clean stream end into `Error::Io(UnexpectedEof)` the way the byte
    /// codecs do.
    pub async fn read(&self, source: &mut dyn WsSource) -> Result<AnyPacket> {
        loop {
            let Some(message) = source.recv().await? else {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "websocket closed",
                )));
            };
            match message {
                WsMessage::Close => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "websocket closed",
                    )));
                },
                WsMessage::Binary(bytes) => return decode_binary(&bytes),
                WsMessage::Text(text) => return decode_text(&text),
            }
        }
    }

    pub async fn write(&self, sink: &mut dyn WsSink, packet: &AnyPacket) -> Result<()> {
        let AnyPacket::WebSocket(p) = packet else {
            return Err(Error::TypeMismatch {
                codec: "websocket",
                found: variant_name(packet),
            });
        };
        let mut buf = Vec::with_capacity(BINARY_HEADER_LEN + p.data().len());
        buf.extend_from_slice(&p.type_code.to_be_bytes());
        buf.extend_from_slice(&p.id.to_be_bytes());
        buf.extend_from_slice(&p.timestamp_ms.to_be_bytes());
        buf.extend_from_slice(p.data());
        sink.send(WsMessage::Binary(buf)).await
    }
}

fn decode_binary(bytes: &[u8]) -> Result<AnyPacket> {
    if bytes.len() < BINARY_HEADER_LEN {
        return Err(Error::Format("truncated websocket frame".to_string()));
    }
    let type_code =
        i32::from_be_bytes(bytes[0..4].try_into().expect("slice is 4 bytes"));
    let id = i64::from_be_bytes(bytes[4..12].try_into().expect("slice is 8 bytes"));
    let timestamp_ms =
        i64::from_be_bytes(bytes[12..20].try_into().expect("slice is 8 bytes"));
    let data = bytes[BINARY_HEADER_LEN..].to_vec();
    Ok(AnyPacket::WebSocket(crate::packet::WebSocketPacket {
        type_code,
        id,
        timestamp_ms,
        message: WsMessage::Binary(data),
    }))
}

fn decode_text(text: &str) -> Result<AnyPacket> {
    #[derive(serde::Deserialize)]
    struct TextFrame {
        #[serde(rename = "type")]
        type_code: i32,
        id: i64,
        #[serde(default)]
        data: serde_json::Value,
    }
    let frame: TextFrame = serde_json::from_str(text)
        .map_err(|e| Error::Format(format!("invalid websocket text frame: {e}")))?;
    Ok(AnyPacket::WebSocket(crate::packet::WebSocketPacket {
        type_code: frame.type_code,
        id: frame.id,
        timestamp_ms: 0,
        message: WsMessage::Text(frame.data.to_string()),
    }))
}

/// Adapts a split `tokio_tungstenite::WebSocketStream` sink half (or any
/// `Sink<tungstenite::Message>`) to [`WsSink`], for [`crate::client::Client`]
/// dialing a WebSocket server.
pub struct TungsteniteSink<S>(pub S);

impl<S> WsSink for TungsteniteSink<S>
where S: futures_util::Sink<tokio_tungstenite::tungstenite::Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin
        + Send
{
    fn send<'a>(
        &'a mut self,
        message: WsMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        use futures_util::SinkExt;
        Box::pin(async move {
            self.0
                .send(message.into())
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))
        })
    }
}

/// Adapts a split `tokio_tungstenite::WebSocketStream` source half to
/// [`WsSource`].
pub struct TungsteniteSource<S>(pub S);

impl<S> WsSource for TungsteniteSource<S>
where
    S: futures_util::Stream<
            Item = std::result::Result<
                tokio_tungstenite::tungstenite::Message,
                tokio_tungstenite::tungstenite::Error,
            >,
        > + Unpin
        + Send,
{
    fn recv<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WsMessage>>> + Send + 'a>> {
        use futures_util::StreamExt;
        Box::pin(async move {
            match self.0.next().await {
                None => Ok(None),
                Some(Ok(message)) => Ok(Some(WsMessage::from(message))),
                Some(Err(e)) => Err(Error::Io(std::io::Error::other(e))),
            }
        })
    }
}

fn variant_name(p: &AnyPacket) -> &'static str {
    match p {
        AnyPacket::Tlv(_) => "tlv",
        AnyPacket::Json(_) => "json",
        AnyPacket::WebSocket(_) => "websocket",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::WebSocketPacket;

    struct ChannelSink(tokio::sync::mpsc::UnboundedSender<WsMessage>);

    impl WsSink for ChannelSink {
        fn send<'a>(
            &'a mut self,
            message: WsMessage,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                self.0
                    .send(message)
                    .map_err(|_| Error::Closed)
            })
        }
    }

    struct ChannelSource(tokio::sync::mpsc::UnboundedReceiver<WsMessage>);

    impl WsSource for ChannelSource {
        fn recv<'a>(
            &'a mut self,
        ) -> Pin<Box<dyn Future<Output = Result<Option<WsMessage>>> + Send + 'a>> {
            Box::pin(async move { Ok(self.0.recv().await) })
        }
    }

    #[tokio::test]
    async fn round_trips_a_binary_frame() {
        let codec = WebSocketCodec;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelSink(tx);
        let mut source = ChannelSource(rx);

        let packet = AnyPacket::WebSocket(WebSocketPacket::new(7, 99, b"payload".to_vec()));
        codec.write(&mut sink, &packet).await.expect("write");

        let decoded = codec.read(&mut source).await.expect("read");
        let AnyPacket::WebSocket(got) = decoded else {
            panic!("expected a websocket packet");
        };
        assert_eq!(got.type_code, 7);
        assert_eq!(got.id, 99);
        assert_eq!(got.data(), b"payload");
    }
}
