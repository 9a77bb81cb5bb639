//! A connection-oriented framing and session runtime for custom TCP/WebSocket
//! application protocols.
//!
//! The crate turns a byte stream into a sequence of typed [`packet::Packet`]s
//! and back (see [`codec`]), keeps accepted and dialed connections alive as
//! long-lived [`session::Session`]s under a concurrent [`manager::Manager`],
//! and drives policy-based reconnection for [`client::Client`] sessions.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Configuration and logging glue that sits outside the core wire contract.
pub mod cfg;
/// Dialing, heartbeat pump and reconnect loop for outbound sessions.
pub mod client;
/// Framing codecs: TLV (binary), JSON (delimited) and WebSocket (frame).
pub mod codec;
/// `Connection`: owns a socket, read/write mutual exclusion and the
/// stream-mode gate; `Streamer`: the exclusive raw substream layered on top.
pub mod connection;
/// The crate's error type, covering every policy-relevant failure kind.
pub mod error;
/// Registry of sessions keyed by id and by authenticated user identity.
pub mod manager;
/// The wire packet types and the minimal `Packet` identity trait.
pub mod packet;
/// Type-code to handler dispatch with automatic reply-packet wrapping.
pub mod rpc;
/// TCP and WebSocket listener loops feeding a `Manager`.
pub mod server;
/// Per-connection identity, read pump and request/response correlation.
pub mod session;

pub use error::{Error, Result};
