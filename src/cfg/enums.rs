// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Which reconnect policy a client session uses after its read loop ends.
///
/// Chosen by `cfg::config::ReconnectConfig::kind`; the concrete
/// [`crate::client::policy::ReconnectPolicy`] is built from this plus the
/// numeric fields alongside it.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectKind {
    /// Never reconnect; `after_closed` is a no-op.
    Never,
    /// Fixed delay between attempts, up to a capped attempt count.
    Constant,
    /// Doubling delay between attempts, capped at a maximum, up to a capped
    /// attempt count.
    Exponential,
}
impl fmt::Display for ReconnectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconnectKind::Never => "never",
            ReconnectKind::Constant => "constant",
            ReconnectKind::Exponential => "exponential",
        })
    }
}

/// Which framing codec a listener or dialed connection speaks.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Wire {
    /// Binary TLV framing (see [`crate::codec::tlv`]).
    Tlv,
    /// Delimited JSON framing (see [`crate::codec::json`]).
    Json,
    /// WebSocket frame-per-packet framing (see [`crate::codec::ws`]).
    WebSocket,
}
impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Wire::Tlv => "tlv",
            Wire::Json => "json",
            Wire::WebSocket => "websocket",
        })
    }
}
