// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A minimal TLV echo server: replies to every `{type=0x01}` packet with
//! `{type=0x02}` carrying the same id and payload.

use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::{Context, Result};
use netsession_rs::{
    codec::TlvCodec,
    manager::Manager,
    packet::{AnyPacket, Packet, tlv::TlvPacket},
    server::TcpServer,
    session::{Handler, Session},
};
use tracing::{info, warn};

const ECHO_REQUEST_TYPE: i32 = 0x01;
const ECHO_RESPONSE_TYPE: i32 = 0x02;

struct EchoHandler;

impl Handler for EchoHandler {
    fn handle<'a>(
        &'a self,
        packet: AnyPacket,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let AnyPacket::Tlv(request) = packet else {
                warn!("echo server only speaks TLV, dropping non-TLV packet");
                return;
            };
            if request.type_code != ECHO_REQUEST_TYPE {
                return;
            }

            let reply = AnyPacket::Tlv(TlvPacket::new(
                ECHO_RESPONSE_TYPE,
                request.id,
                request.data,
            ));
            if let Err(e) = session.send_packet(&reply).await {
                warn!(session_id = session.id(), error = %e, "failed to send echo reply");
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7878".to_string());

    let manager = Manager::new(None, Some(Arc::new(EchoHandler)), false);
    let server = TcpServer::new_tlv(manager, TlvCodec::default());

    info!(%addr, "tlv echo server listening");
    server
        .serve(&addr)
        .await
        .context("tlv echo server stopped")?;
    Ok(())
}
