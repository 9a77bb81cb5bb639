// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Delimited JSON packet.
//!
//! A packet is a keepalive iff `subject == 0`. Frames are separated on the
//! wire by a configured byte-sequence delimiter that must not appear inside
//! the JSON body (see `codec::json`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Packet;

/// Fields mirror the wire contract exactly; `id` widens to `i64` at the
/// API boundary (see the design note on uniform 64-bit packet ids) even
/// though the JSON wire carries a 32-bit integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPacket {
    #[serde(rename = "type")]
    pub type_code: i8,
    pub version: u8,
    pub source: i16,
    pub subject: i32,
    pub id: i32,
    /// Unix seconds.
    pub time: i64,
    pub data: Value,
}

impl JsonPacket {
    pub fn new(type_code: i8, subject: i32, id: i32, data: Value) -> Self {
        Self {
            type_code,
            version: 1,
            source: 0,
            subject,
            id,
            time: 0,
            data,
        }
    }
}

impl Packet for JsonPacket {
    fn id(&self) -> i64 {
        i64::from(self.id)
    }

    fn is_keepalive(&self) -> bool {
        self.subject == 0
    }
}
