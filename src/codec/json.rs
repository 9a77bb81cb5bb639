// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Delimited JSON codec.
//!
//! Decode scans one byte at a time until the sliding tail equals the
//! configured delimiter, then JSON-parses the preceding bytes. The reading
//! strategy is left open by the wire contract (one of the source codecs
//! reads a byte at a time, another pre-allocates); this implementation
//! reads a byte at a time into a growable buffer, which is simplest to
//! reason about for a text-delimited protocol and matches the source's own
//! default path.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Codec, CodecFuture};
use crate::{
    Error, Result,
    packet::{AnyPacket, JsonPacket},
};

#[derive(Debug, Clone)]
pub struct JsonCodec {
    delimiter: Vec<u8>,
}

impl JsonCodec {
    pub fn new(delimiter: Vec<u8>) -> Self {
        assert!(!delimiter.is_empty(), "JSON delimiter must not be empty");
        Self { delimiter }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(b"\r\n".to_vec())
    }
}

impl Codec for JsonCodec {
    fn read<'a>(
        &'a self,
        reader: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> CodecFuture<'a, AnyPacket> {
        Box::pin(async move {
            let mut buf = Vec::with_capacity(256);
            let mut byte = [0u8; 1];
            loop {
                reader.read_exact(&mut byte).await?;
                buf.push(byte[0]);
                if buf.len() >= self.delimiter.len()
                    && buf[buf.len() - self.delimiter.len()..] == self.delimiter[..]
                {
                    buf.truncate(buf.len() - self.delimiter.len());
                    break;
                }
            }
            let packet: JsonPacket = serde_json::from_slice(&buf)
                .map_err(|e| Error::Format(format!("invalid JSON packet: {e}")))?;
            Ok(AnyPacket::Json(packet))
        })
    }

    fn write<'a>(
        &'a self,
        writer: &'a mut (dyn AsyncWrite + Unpin + Send),
        packet: &'a AnyPacket,
    ) -> CodecFuture<'a, ()> {
        Box::pin(async move {
            let AnyPacket::Json(p) = packet else {
                return Err(Error::TypeMismatch {
                    codec: self.name(),
                    found: variant_name(packet),
                });
            };
            let mut body = serde_json::to_vec(p)
                .map_err(|e| Error::Format(format!("cannot encode JSON packet: {e}")))?;
            body.extend_from_slice(&self.delimiter);
            writer.write_all(&body).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "json"
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
    use serde_json::json;
    use tokio::io::duplex;

    use super::*;
    use crate::packet::Packet;

    #[tokio::test]
    async fn round_trips_a_packet() {
        let codec = JsonCodec::default();
        let (mut a, mut b) = duplex(4096);

        let packet = AnyPacket::Json(JsonPacket::new(1, 7, 42, json!({"k": "v"})));
        codec.write(&mut a, &packet).await.expect("write");

        let decoded = codec.read(&mut b).await.expect("read");
        let AnyPacket::Json(got) = decoded else {
            panic!("expected a JSON packet");
        };
        assert_eq!(got.id(), 42);
        assert_eq!(got.subject, 7);
        assert_eq!(got.data, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let codec = JsonCodec::default();
        let (mut a, mut b) = duplex(4096);

        a.write_all(b"not json\r\n").await.expect("write raw");
        drop(a);

        let err = codec.read(&mut b).await.expect_err("malformed JSON");
        assert!(matches!(err, Error::Format(_)));
    }
}
