// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `Session::send_request`/`send_request_timeout` correlate an outbound
//! packet with the reply that shares its id, even when unrelated traffic
//! interleaves on the same connection.

use std::time::Duration;

use netsession_rs::{
    connection::Connection,
    manager::Manager,
    packet::{AnyPacket, Packet, tlv::TlvPacket},
};
use tokio::io::duplex;

#[tokio::test]
async fn reply_with_matching_id_resolves_the_pending_request() {
    let manager = Manager::new(None, None, false);
    let (half_a, half_b) = duplex(4096);
    let session = manager
        .store(Connection::new_tlv(half_a, None, None))
        .await
        .expect("store");
    let peer = Connection::new_tlv(half_b, None, None);

    let peer_task = tokio::spawn(async move {
        let request = peer.read_packet().await.expect("peer reads request");
        let AnyPacket::Tlv(request) = request else {
            panic!("expected a TLV request");
        };
        let reply = AnyPacket::Tlv(TlvPacket::new(99, request.id, request.data));
        peer.send_packet(&reply).await.expect("peer replies");
    });

    let request = AnyPacket::Tlv(TlvPacket::new(1, 7, b"ping".to_vec()));
    let reply = session
        .send_request_timeout(&request, Duration::from_millis(500))
        .await
        .expect("reply arrives");

    assert_eq!(reply.id(), 7);
    let AnyPacket::Tlv(reply) = reply else {
        panic!("expected a TLV reply");
    };
    assert_eq!(reply.data, b"ping");

    peer_task.await.expect("peer task completes");
}

#[tokio::test]
async fn a_duplicate_pending_id_is_rejected() {
    let manager = Manager::new(None, None, false);
    let (half_a, _half_b) = duplex(4096);
    let session = manager
        .store(Connection::new_tlv(half_a, None, None))
        .await
        .expect("store");

    let request = AnyPacket::Tlv(TlvPacket::new(1, 5, vec![]));
    let _first = session.send_request(&request).await.expect("first send");
    let second = session.send_request(&request).await;
    assert!(second.is_err(), "duplicate pending id must be rejected");
}
