// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! With `exclusive_user` set, a second login for the same user id evicts
//! the first session before the new one is registered.

use std::{future::Future, pin::Pin, sync::Arc};

use netsession_rs::{
    connection::Connection,
    manager::{Authenticator, Manager},
    packet::{AnyPacket, tlv::TlvPacket},
    session::AuthUser,
};
use tokio::io::duplex;

#[derive(Debug)]
struct TestUser(String);

impl AuthUser for TestUser {
    fn valid(&self) -> bool {
        true
    }

    fn id(&self) -> String {
        self.0.clone()
    }
}

struct FirstPacketAuthenticator;

impl Authenticator for FirstPacketAuthenticator {
    fn authenticate<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = netsession_rs::Result<Arc<dyn AuthUser>>> + Send + 'a>> {
        Box::pin(async move {
            let packet = connection.read_packet().await?;
            let AnyPacket::Tlv(packet) = packet else {
                unreachable!("test only sends TLV packets");
            };
            let id = String::from_utf8_lossy(&packet.data).to_string();
            Ok(Arc::new(TestUser(id)) as Arc<dyn AuthUser>)
        })
    }
}

async fn login(manager: &Arc<Manager>, user_id: &str) -> Arc<netsession_rs::session::Session> {
    let (server_half, client_half) = duplex(4096);
    let client_conn = Connection::new_tlv(client_half, None, None);
    client_conn
        .send_packet(&AnyPacket::Tlv(TlvPacket::new(
            0,
            1,
            user_id.as_bytes().to_vec(),
        )))
        .await
        .expect("send auth packet");
    let server_conn = Connection::new_tlv(server_half, None, None);
    manager.store(server_conn).await.expect("store")
}

#[tokio::test]
async fn second_login_for_the_same_user_evicts_the_first() {
    let manager = Manager::new(Some(Arc::new(FirstPacketAuthenticator)), None, true);

    let first = login(&manager, "bob").await;
    assert!(manager.find(first.id()).is_some());

    let second = login(&manager, "bob").await;

    assert!(manager.find(first.id()).is_none(), "first session evicted");
    assert!(manager.find(second.id()).is_some());
    assert!(first.manually_closed());
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn distinct_users_do_not_evict_each_other() {
    let manager = Manager::new(Some(Arc::new(FirstPacketAuthenticator)), None, true);

    let first = login(&manager, "carol").await;
    let second = login(&manager, "dave").await;

    assert!(manager.find(first.id()).is_some());
    assert!(manager.find(second.id()).is_some());
}
