// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Binary TLV packet: a 30-byte big-endian header, a variable-length
//! payload, and a one-byte modular-256 checksum.

use zerocopy::{
    BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U16, U32, U64,
};

use super::Packet;

/// Wire-exact header layout, zero-copy-readable straight off the socket
/// buffer.
///
/// Field order and widths are the wire contract: `label:u16`,
/// `version:u16`, `type:i32`, `id:i64`, `timestamp_ms:i64`, `length:u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TlvHeader {
    pub label: U16<BigEndian>,
    pub version: U16<BigEndian>,
    // zerocopy has no signed big-endian integer type; i32/i64 are carried as
    // their bit-identical unsigned counterparts and cast at the API
    // boundary (see `TlvPacket::type_code`/`id`).
    pub type_raw: U32<BigEndian>,
    pub id_raw: U64<BigEndian>,
    pub timestamp_ms_raw: U64<BigEndian>,
    pub length: U64<BigEndian>,
}

/// Size in bytes of [`TlvHeader`] on the wire.
pub const HEADER_LEN: usize = 30;

const _: () = assert!(std::mem::size_of::<TlvHeader>() == HEADER_LEN);

/// A decoded (or about-to-be-encoded) TLV packet.
///
/// `timestamp_ms` and `length` are stamped by the encoder at encode time,
/// overwriting whatever the caller set — see
/// [`crate::codec::tlv::TlvCodec::write`]. `is_keepalive` is likewise
/// derived and stamped by [`crate::codec::tlv::TlvCodec::read`] against the
/// codec's configured keepalive type-codes; it plays no part in the wire
/// format itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvPacket {
    pub label: u16,
    pub version: u16,
    pub type_code: i32,
    pub id: i64,
    pub timestamp_ms: i64,
    pub is_keepalive: bool,
    pub data: Vec<u8>,
}

impl TlvPacket {
    /// Builds a packet with `timestamp_ms` left at zero and `is_keepalive`
    /// false; the codec stamps both on encode/decode.
    pub fn new(type_code: i32, id: i64, data: Vec<u8>) -> Self {
        Self {
            label: 0,
            version: 1,
            type_code,
            id,
            timestamp_ms: 0,
            is_keepalive: false,
            data,
        }
    }
}

impl Packet for TlvPacket {
    fn id(&self) -> i64 {
        self.id
    }

    fn is_keepalive(&self) -> bool {
        self.is_keepalive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_exactly_30_bytes() {
        assert_eq!(std::mem::size_of::<TlvHeader>(), HEADER_LEN);
    }
}
