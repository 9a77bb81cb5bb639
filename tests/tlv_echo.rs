// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end TLV echo over a real TCP socket: a server decodes
//! `{type=0x01,id=42,data="hi"}` and replies with
//! `{type=0x02,id=42,data="hi"}`; the client must observe it within 100ms.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use netsession_rs::{
    codec::TlvCodec,
    connection::Connection,
    manager::Manager,
    packet::{AnyPacket, tlv::TlvPacket},
    server::TcpServer,
    session::{Handler, Session},
};
use tokio::net::{TcpListener, TcpStream};

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
            let _ = session.send_packet(&reply).await;
        })
    }
}

#[tokio::test]
async fn echoes_a_tlv_packet_within_100ms() {
    let manager = Manager::new(None, Some(Arc::new(EchoHandler)), false);
    let server = TcpServer::new_tlv(manager, TlvCodec::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let server_clone = server.clone();
    let addr_string = addr.to_string();
    let serve_task = tokio::spawn(async move {
        let _ = server_clone.serve(&addr_string).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(addr).await.expect("connect");
    let connection = Connection::new_tlv(stream, None, None);

    let request = AnyPacket::Tlv(TlvPacket::new(ECHO_REQUEST_TYPE, 42, b"hi".to_vec()));
    connection.send_packet(&request).await.expect("send");

    let reply = tokio::time::timeout(Duration::from_millis(100), connection.read_packet())
        .await
        .expect("reply arrives within 100ms")
        .expect("reply decodes");

    let AnyPacket::Tlv(reply) = reply else {
        panic!("expected a TLV reply");
    };
    assert_eq!(reply.type_code, ECHO_RESPONSE_TYPE);
    assert_eq!(reply.id, 42);
    assert_eq!(reply.data, b"hi");

    server.close().await.expect("close");
    serve_task.abort();
}
