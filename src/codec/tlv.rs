// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Binary TLV codec: 30-byte big-endian header, payload, one checksum byte.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::{BigEndian, FromBytes, IntoBytes, U16, U32, U64};

use super::{Codec, CodecFuture};
use crate::{
    Error, Result,
    packet::{
        AnyPacket, Packet,
        tlv::{HEADER_LEN, TlvHeader, TlvPacket},
    },
};

/// Default safety cap on decoded payload length (16 MiB); not part of the
/// wire contract, only an implementation safety valve.
pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Default TLV `type` values treated as keepalive traffic absent explicit
/// configuration, matching [`crate::cfg::config`]'s own defaults.
pub const DEFAULT_KEEPALIVE_REQUEST_TYPE: i32 = 1;
pub const DEFAULT_KEEPALIVE_RESPONSE_TYPE: i32 = 2;

#[derive(Debug, Clone)]
pub struct TlvCodec {
    max_payload: u64,
    keepalive_request_type: i32,
    keepalive_response_type: i32,
}

impl Default for TlvCodec {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            keepalive_request_type: DEFAULT_KEEPALIVE_REQUEST_TYPE,
            keepalive_response_type: DEFAULT_KEEPALIVE_RESPONSE_TYPE,
        }
    }
}

impl TlvCodec {
    pub fn new(max_payload: u64, keepalive_request_type: i32, keepalive_response_type: i32) -> Self {
        Self {
            max_payload,
            keepalive_request_type,
            keepalive_response_type,
        }
    }

    fn is_keepalive(&self, type_code: i32) -> bool {
        type_code == self.keepalive_request_type || type_code == self.keepalive_response_type
    }
}

fn checksum(header: &[u8], data: &[u8]) -> u8 {
    let sum = header
        .iter()
        .chain(data.iter())
        .fold(0u32, |acc, b| acc + u32::from(*b));
    (sum % 256) as u8
}

impl Codec for TlvCodec {
    fn read<'a>(
        &'a self,
        reader: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> CodecFuture<'a, AnyPacket> {
        Box::pin(async move {
            let mut header_buf = [0u8; HEADER_LEN];
            reader.read_exact(&mut header_buf).await?;
            let header = TlvHeader::read_from_bytes(&header_buf)
                .map_err(|_| Error::Format("truncated TLV header".to_string()))?;

            let length = header.length.get();
            if length > self.max_payload {
                return Err(Error::Format(format!(
                    "TLV payload length {length} exceeds cap {}",
                    self.max_payload
                )));
            }

            let mut rest = vec![0u8; length as usize + 1];
            reader.read_exact(&mut rest).await?;
            let (data, checksum_byte) = rest.split_at(length as usize);
            let found = checksum_byte[0];
            let expected = checksum(&header_buf, data);
            if found != expected {
                return Err(Error::InvalidChecksum { expected, found });
            }

            let type_code = header.type_raw.get() as i32;
            let packet = TlvPacket {
                label: header.label.get(),
                version: header.version.get(),
                type_code,
                id: header.id_raw.get() as i64,
                timestamp_ms: header.timestamp_ms_raw.get() as i64,
                is_keepalive: self.is_keepalive(type_code),
                data: data.to_vec(),
            };
            Ok(AnyPacket::Tlv(packet))
        })
    }

    fn write<'a>(
        &'a self,
        writer: &'a mut (dyn AsyncWrite + Unpin + Send),
        packet: &'a AnyPacket,
    ) -> CodecFuture<'a, ()> {
        Box::pin(async move {
            let AnyPacket::Tlv(p) = packet else {
                return Err(Error::TypeMismatch {
                    codec: self.name(),
                    found: variant_name(packet),
                });
            };

            let timestamp_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            let length = p.data.len() as u64;

            let header = TlvHeader {
                label: U16::new(p.label),
                version: U16::new(p.version),
                type_raw: U32::new(p.type_code as u32),
                id_raw: U64::new(p.id as u64),
                timestamp_ms_raw: U64::new(timestamp_ms as u64),
                length: U64::new(length),
            };
            let header_bytes = header.as_bytes();
            let sum = checksum(header_bytes, &p.data);

            writer.write_all(header_bytes).await?;
            writer.write_all(&p.data).await?;
            writer.write_all(&[sum]).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "tlv"
    }
}

fn variant_name(p: &AnyPacket) -> &'static str {
    match p {
        AnyPacket::Tlv(_) => "tlv",
        AnyPacket::Json(_) => "json",
        AnyPacket::WebSocket(_) => "websocket",
    }
}
