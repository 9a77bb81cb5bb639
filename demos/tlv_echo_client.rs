// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Dials the TLV echo server, sends `{type=0x01,id=42,data="hi"}`, and
//! confirms the `{type=0x02,id=42,data="hi"}` reply arrives within 100ms.

use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use netsession_rs::{
    connection::Connection,
    packet::{AnyPacket, Packet, tlv::TlvPacket},
};
use tokio::net::TcpStream;
use tracing::info;

const ECHO_REQUEST_TYPE: i32 = 0x01;
const ECHO_RESPONSE_TYPE: i32 = 0x02;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7878".to_string());

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let connection = Connection::new_tlv(stream, None, None);

    let request = AnyPacket::Tlv(TlvPacket::new(ECHO_REQUEST_TYPE, 42, b"hi".to_vec()));
    connection
        .send_packet(&request)
        .await
        .context("failed to send echo request")?;

    let reply = tokio::time::timeout(Duration::from_millis(100), connection.read_packet())
        .await
        .context("echo reply timed out")?
        .context("echo reply failed to decode")?;

    let AnyPacket::Tlv(reply) = reply else {
        bail!("expected a TLV reply, got a different wire format");
    };
    ensure!(
        reply.type_code == ECHO_RESPONSE_TYPE,
        "unexpected reply type {}",
        reply.type_code
    );
    ensure!(reply.id == 42, "unexpected reply id {}", reply.id);

    info!(data = %String::from_utf8_lossy(&reply.data), "echo round-trip succeeded");
    Ok(())
}
