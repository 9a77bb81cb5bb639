// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Type-code to handler dispatch, with one flavor that auto-wraps the
//! user function's output into a correlated reply packet.
//!
//! The bit-30 reply marker (`type = (1<<30) | request_type`, `id =
//! request_id`) only fits in the wire formats whose type field is at least
//! 32 bits wide — TLV's `type:i32` and the WebSocket frame header's
//! `type_code:i32`. JSON's `type:i8` cannot carry it, so [`Dispatcher`]
//! keys JSON packets on `subject` instead (the only other application-level
//! i32 field JSON carries) and rejects the auto-reply flavor for JSON
//! packets outright rather than silently truncating the marker.

use std::{future::Future, pin::Pin, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    Error, Result,
    packet::{AnyPacket, Packet, tlv::TlvPacket, ws::WebSocketPacket},
    session::{Handler, Session},
};

/// The reply-type marker bit: a reply's `type` is `REPLY_MARKER |
/// request_type`.
pub const REPLY_MARKER: i32 = 1 << 30;

/// A user function invoked for a dispatched packet with no auto-reply.
pub trait PlainFn: Send + Sync {
    fn call<'a>(
        &'a self,
        packet: AnyPacket,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

impl<F, Fut> PlainFn for F
where
    F: Fn(AnyPacket, Arc<Session>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        packet: AnyPacket,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin((self)(packet, session))
    }
}

/// A user function invoked for a dispatched packet whose returned bytes are
/// wrapped into a bit-30-marked reply and sent back on the session.
pub trait ReplyFn: Send + Sync {
    fn call<'a>(
        &'a self,
        packet: AnyPacket,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
}

impl<F, Fut> ReplyFn for F
where
    F: Fn(AnyPacket, Arc<Session>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        packet: AnyPacket,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin((self)(packet, session))
    }
}

#[derive(Clone)]
enum Route {
    Plain(Arc<dyn PlainFn>),
    Reply(Arc<dyn ReplyFn>),
}

/// A [`Handler`] that owns a `type-code -> user-function` map, installed on
/// a [`crate::manager::Manager`] or [`crate::client::Client`] to drive RPC
/// style request handling instead of a single monolithic handler.
#[derive(Default)]
pub struct Dispatcher {
    routes: DashMap<i32, Route>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plain route: the function runs, nothing is sent back
    /// automatically.
    pub fn register_plain(&self, type_code: i32, f: impl PlainFn + 'static) {
        self.routes.insert(type_code, Route::Plain(Arc::new(f)));
    }

    /// Registers an auto-reply route: the function's returned bytes are
    /// wrapped into a reply packet (`type = REPLY_MARKER | type_code`, `id
    /// = request_id`) and sent on the session.
    pub fn register_reply(&self, type_code: i32, f: impl ReplyFn + 'static) {
        self.routes.insert(type_code, Route::Reply(Arc::new(f)));
    }

    fn dispatch_key(packet: &AnyPacket) -> i32 {
        match packet {
            AnyPacket::Tlv(p) => p.type_code,
            AnyPacket::Json(p) => p.subject,
            AnyPacket::WebSocket(p) => p.type_code,
        }
    }

    fn build_reply(packet: &AnyPacket, type_code: i32, request_id: i64, data: Vec<u8>) -> Result<AnyPacket> {
        let reply_type = REPLY_MARKER | type_code;
        match packet {
            AnyPacket::Tlv(_) => Ok(AnyPacket::Tlv(TlvPacket::new(reply_type, request_id, data))),
            AnyPacket::WebSocket(_) => {
                Ok(AnyPacket::WebSocket(WebSocketPacket::new(reply_type, request_id, data)))
            },
            AnyPacket::Json(_) => Err(Error::TypeMismatch {
                codec: "rpc_reply",
                found: "json",
            }),
        }
    }
}

impl Handler for Dispatcher {
    fn handle<'a>(
        &'a self,
        packet: AnyPacket,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let type_code = Self::dispatch_key(&packet);
            let Some(route) = self.routes.get(&type_code).map(|e| e.value().clone()) else {
                debug!(type_code, "rpc dispatch: no route registered, dropping");
                return;
            };

            match route {
                Route::Plain(f) => f.call(packet, session).await,
                Route::Reply(f) => {
                    let request_id = packet.id();
                    match f.call(packet.clone(), session.clone()).await {
                        Ok(data) => match Self::build_reply(&packet, type_code, request_id, data) {
                            Ok(reply) => {
                                if let Err(e) = session.send_packet(&reply).await {
                                    warn!(session_id = session.id(), error = %e, "rpc reply send failed");
                                }
                            },
                            Err(e) => {
                                warn!(session_id = session.id(), error = %e, "rpc reply could not be built");
                            },
                        },
                        Err(e) => {
                            warn!(session_id = session.id(), type_code, error = %e, "rpc handler failed");
                        },
                    }
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::{io::duplex, sync::Mutex};

    use super::*;
    use crate::{connection::Connection, manager::Manager, packet::tlv::TlvPacket};

    #[tokio::test]
    async fn plain_route_invokes_the_function() {
        let seen = Arc::new(Mutex::new(None));
        let dispatcher = Arc::new(Dispatcher::new());
        let seen_clone = seen.clone();
        dispatcher.register_plain(7, move |packet: AnyPacket, _session| {
            let seen = seen_clone.clone();
            async move {
                *seen.lock().await = Some(packet.id());
            }
        });

        let (a, _b) = duplex(4096);
        let connection = Arc::new(Connection::new_tlv(a, None, None));
        let manager = Manager::new(None, Some(dispatcher.clone()), false);
        let session = spawn_test_session(&manager, connection);

        dispatcher
            .handle(AnyPacket::Tlv(TlvPacket::new(7, 99, vec![])), session)
            .await;

        assert_eq!(*seen.lock().await, Some(99));
    }

    #[tokio::test]
    async fn unregistered_type_is_dropped_silently() {
        let dispatcher = Dispatcher::new();
        let (a, _b) = duplex(4096);
        let connection = Arc::new(Connection::new_tlv(a, None, None));
        let manager = Manager::new(None, None, false);
        let session = spawn_test_session(&manager, connection);

        dispatcher
            .handle(AnyPacket::Tlv(TlvPacket::new(123, 1, vec![])), session)
            .await;
    }

    #[tokio::test]
    async fn reply_route_wraps_output_with_the_bit30_marker() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_reply(3, |packet: AnyPacket, _session| async move {
            Ok(format!("echo:{}", packet.id()).into_bytes())
        });

        let (a, b) = duplex(4096);
        let connection = Arc::new(Connection::new_tlv(a, None, None));
        let manager = Manager::new(None, None, false);
        let session = spawn_test_session(&manager, connection);

        dispatcher
            .handle(AnyPacket::Tlv(TlvPacket::new(3, 55, vec![])), session)
            .await;

        let peer = Connection::new_tlv(b, None, None);
        let reply = tokio::time::timeout(std::time::Duration::from_secs(1), peer.read_packet())
            .await
            .expect("reply arrives")
            .expect("reply decodes");
        let AnyPacket::Tlv(reply) = reply else {
            panic!("expected a TLV reply");
        };
        assert_eq!(reply.type_code, REPLY_MARKER | 3);
        assert_eq!(reply.id, 55);
        assert_eq!(reply.data, b"echo:55");
    }

    fn spawn_test_session(manager: &Arc<Manager>, connection: Arc<Connection>) -> Arc<Session> {
        Session::spawn(1, connection, None, Arc::downgrade(manager), None)
    }
}
