// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A full accept -> authenticate -> register -> evict cycle, including
//! authenticator rejection.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use netsession_rs::{
    Error,
    connection::Connection,
    manager::{Authenticator, LifecycleHook, Manager},
    packet::{AnyPacket, tlv::TlvPacket},
    session::{AuthUser, Session},
};
use tokio::io::duplex;

#[derive(Debug)]
struct TestUser {
    id: String,
    valid: bool,
}

impl AuthUser for TestUser {
    fn valid(&self) -> bool {
        self.valid
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Reads one packet, treats its payload as a `user_id` string; payloads
/// starting with `reject:` produce an invalid user.
struct FirstPacketAuthenticator;

impl Authenticator for FirstPacketAuthenticator {
    fn authenticate<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = netsession_rs::Result<Arc<dyn AuthUser>>> + Send + 'a>> {
        Box::pin(async move {
            let packet = connection.read_packet().await?;
            let AnyPacket::Tlv(packet) = packet else {
                return Err(Error::TypeMismatch {
                    codec: "test_authenticator",
                    found: "non-tlv",
                });
            };
            let payload = String::from_utf8_lossy(&packet.data).to_string();
            let (valid, id) = match payload.strip_prefix("reject:") {
                Some(rest) => (false, rest.to_string()),
                None => (true, payload),
            };
            Ok(Arc::new(TestUser { id, valid }) as Arc<dyn AuthUser>)
        })
    }
}

struct CountingHook(Arc<AtomicUsize>);

impl LifecycleHook for CountingHook {
    fn call<'a>(&'a self, _session: Arc<Session>) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.0.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[tokio::test]
async fn accept_authenticate_register_evict_cycle() {
    let created = Arc::new(AtomicUsize::new(0));
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));

    let manager = Manager::new(Some(Arc::new(FirstPacketAuthenticator)), None, false);
    manager.set_on_session_created(Arc::new(CountingHook(created.clone())));
    manager.set_before_closed(Arc::new(CountingHook(before.clone())));
    manager.set_after_closed(Arc::new(CountingHook(after.clone())));

    let (server_half, client_half) = duplex(4096);
    let client_conn = Connection::new_tlv(client_half, None, None);
    client_conn
        .send_packet(&AnyPacket::Tlv(TlvPacket::new(0, 1, b"alice".to_vec())))
        .await
        .expect("send auth packet");

    let server_conn = Connection::new_tlv(server_half, None, None);
    let session = manager.store(server_conn).await.expect("store succeeds");

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(session.user().map(|u| u.id()), Some("alice".to_string()));
    assert!(manager.find(session.id()).is_some());

    manager.remove(session.id()).await;
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert!(manager.find(session.id()).is_none());
}

#[tokio::test]
async fn authenticator_rejection_keeps_the_session_out_of_the_registry() {
    let manager = Manager::new(Some(Arc::new(FirstPacketAuthenticator)), None, false);

    let (server_half, client_half) = duplex(4096);
    let client_conn = Connection::new_tlv(client_half, None, None);
    client_conn
        .send_packet(&AnyPacket::Tlv(TlvPacket::new(
            0,
            1,
            b"reject:eve".to_vec(),
        )))
        .await
        .expect("send auth packet");

    let server_conn = Connection::new_tlv(server_half, None, None);
    let err = manager
        .store(server_conn)
        .await
        .expect_err("invalid user must be rejected");
    assert!(matches!(err, Error::AuthFailed(_)));
}
