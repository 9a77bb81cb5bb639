// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The keepalive sweeper removes a session that has gone silent for longer
//! than its tick period, and leaves a chatty session alone.

use std::time::Duration;

use netsession_rs::{
    connection::Connection,
    manager::Manager,
    packet::{AnyPacket, tlv::TlvPacket},
};
use tokio::io::duplex;

#[tokio::test]
async fn stale_session_is_swept_and_active_session_survives() {
    let manager = Manager::new(None, None, false);

    let (silent_server, _silent_client) = duplex(4096);
    let silent = manager
        .store(Connection::new_tlv(silent_server, None, None))
        .await
        .expect("store silent session");

    let (chatty_server, chatty_client) = duplex(4096);
    let chatty = manager
        .store(Connection::new_tlv(chatty_server, None, None))
        .await
        .expect("store chatty session");
    let chatty_client_conn = Connection::new_tlv(chatty_client, None, None);

    let tick = Duration::from_millis(60);
    manager.spawn_keepalive_sweeper(tick);

    // Keep the chatty session's `last_packet_at` fresh across two sweep
    // ticks by sending it a packet every 20ms.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        chatty_client_conn
            .send_packet(&AnyPacket::Tlv(TlvPacket::new(0, 1, vec![])))
            .await
            .expect("keepalive packet");
    }

    assert!(
        manager.find(silent.id()).is_none(),
        "silent session should have been swept"
    );
    assert!(
        manager.find(chatty.id()).is_some(),
        "chatty session should have survived"
    );
}
