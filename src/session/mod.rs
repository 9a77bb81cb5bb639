// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection identity, read pump, and request/response correlation.
//!
//! A [`Session`] plays two roles at once: it is the read loop driving one
//! [`Connection`](crate::connection::Connection), and it is the handle
//! application code holds to send packets and stash per-session data. The
//! handle indirects through [`SessionState`] behind a `tokio::sync::RwLock`
//! so that [`crate::client::Client`]'s reconnect loop can publish a fresh
//! state after a redial without invalidating handles callers already hold.

use std::{
    any::Any,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, warn};

use crate::{
    Error, Result,
    connection::Connection,
    manager::Manager,
    packet::{AnyPacket, Packet},
};

/// Opaque authenticated identity produced by an
/// [`crate::manager::Authenticator`].
pub trait AuthUser: Send + Sync + std::fmt::Debug {
    /// `false` rejects the connection during `Manager::store`.
    fn valid(&self) -> bool;
    /// String key used for the by-user index when `exclusive_user` is set.
    fn id(&self) -> String;
}

/// A user-supplied packet handler, invoked once per inbound packet that is
/// not claimed by the request-correlation map.
///
/// Written as a boxed-future trait (rather than `async fn` in a trait) so
/// it stays object-safe and can be stored as `Arc<dyn Handler>`.
pub trait Handler: Send + Sync {
    fn handle<'a>(
        &'a self,
        packet: AnyPacket,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// The mutable guts of a session, swapped out wholesale on reconnect.
pub(crate) struct SessionState {
    pub(crate) connection: Arc<Connection>,
    pub(crate) user: Option<Arc<dyn AuthUser>>,
    pub(crate) user_data: DashMap<String, Arc<dyn Any + Send + Sync>>,
    pub(crate) last_packet_at: std::sync::Mutex<std::time::Instant>,
    pub(crate) pending: DashMap<i64, oneshot::Sender<AnyPacket>>,
    pub(crate) read_loop: tokio::task::JoinHandle<()>,
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.read_loop.abort();
    }
}

/// Per-connection read pump and user-facing send handle.
pub struct Session {
    id: i64,
    manager: Weak<Manager>,
    state: RwLock<Arc<SessionState>>,
    manually_closed: AtomicBool,
    closed: Arc<tokio::sync::Notify>,
    remote_addr: std::sync::Mutex<Option<String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

impl Session {
    /// Builds a session around `connection`, spawns its read loop, and
    /// returns the handle. `manager` is a non-owning back-reference used to
    /// ask for self-removal on a terminal read error.
    pub(crate) fn spawn(
        id: i64,
        connection: Arc<Connection>,
        user: Option<Arc<dyn AuthUser>>,
        manager: Weak<Manager>,
        handler: Option<Arc<dyn Handler>>,
    ) -> Arc<Session> {
        let closed = Arc::new(tokio::sync::Notify::new());
        let remote = connection.remote_addr().map(str::to_string);

        let session = Arc::new_cyclic(|weak: &Weak<Session>| {
            let read_loop = tokio::spawn(read_loop(
                weak.clone(),
                connection.clone(),
                handler,
                manager.clone(),
            ));
            let state = SessionState {
                connection,
                user,
                user_data: DashMap::new(),
                last_packet_at: std::sync::Mutex::new(std::time::Instant::now()),
                pending: DashMap::new(),
                read_loop,
            };
            Session {
                id,
                manager,
                state: RwLock::new(Arc::new(state)),
                manually_closed: AtomicBool::new(false),
                closed,
                remote_addr: std::sync::Mutex::new(remote),
            }
        });
        session
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn user(&self) -> Option<Arc<dyn AuthUser>> {
        // Best-effort snapshot; `try_read` never blocks the read loop.
        self.state.try_read().ok().and_then(|s| s.user.clone())
    }

    pub async fn remote_addr(&self) -> Option<String> {
        self.remote_addr.lock().expect("remote_addr mutex poisoned").clone()
    }

    async fn current(&self) -> Arc<SessionState> {
        self.state.read().await.clone()
    }

    /// Direct send; fails on I/O or codec error.
    pub async fn send_packet(&self, packet: &AnyPacket) -> Result<()> {
        self.current().await.connection.send_packet(packet).await
    }

    /// Registers a single-shot receiver keyed by `packet.id()` before
    /// sending, then sends. Rejects a duplicate id with
    /// `Error::Format` rather than silently overwriting the prior waiter.
    pub async fn send_request(
        &self,
        packet: &AnyPacket,
    ) -> Result<oneshot::Receiver<AnyPacket>> {
        let state = self.current().await;
        let id = packet.id();
        let (tx, rx) = oneshot::channel();
        if state.pending.contains_key(&id) {
            return Err(Error::Format(format!(
                "duplicate pending request id {id}"
            )));
        }
        state.pending.insert(id, tx);
        if let Err(e) = state.connection.send_packet(packet).await {
            state.pending.remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Same as [`Self::send_request`] with a bounded wait; deregisters the
    /// waiter on timeout so the pending map cannot leak (the source leaks
    /// this entry — treated here as a bug fix, not a design departure).
    pub async fn send_request_timeout(
        &self,
        packet: &AnyPacket,
        timeout: Duration,
    ) -> Result<AnyPacket> {
        let id = packet.id();
        let rx = self.send_request(packet).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_canceled)) => Err(Error::Closed),
            Err(_elapsed) => {
                let state = self.current().await;
                state.pending.remove(&id);
                Err(Error::DeadlineExceeded)
            },
        }
    }

    /// Delegates to the current connection's exclusive substream.
    pub async fn stream(&self) -> Result<crate::connection::Streamer> {
        self.current().await.connection.stream().await
    }

    /// Reads a typed value previously stored with [`Self::set`].
    pub async fn get<T: 'static + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let state = self.current().await;
        let value = state.user_data.get(key)?;
        value.clone().downcast::<T>().ok()
    }

    /// Stores a typed value under `key`, replacing any prior value.
    pub async fn set<T: 'static + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let state = self.current().await;
        state.user_data.insert(key.into(), Arc::new(value));
    }

    pub fn manually_closed(&self) -> bool {
        self.manually_closed.load(Ordering::Acquire)
    }

    /// Sets `manually_closed`, asks the manager to remove this session,
    /// then closes the underlying connection. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.manually_closed.store(true, Ordering::Release);
        if let Some(manager) = self.manager.upgrade() {
            manager.remove(self.id).await;
        }
        let state = self.current().await;
        let result = state.connection.close().await;
        self.closed.notify_waiters();
        result
    }

    /// Resolves once [`Self::close`] has run, for callers that want to wait
    /// on session teardown without polling `manually_closed`.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    fn last_packet_age(state: &SessionState) -> Duration {
        state
            .last_packet_at
            .lock()
            .expect("last_packet_at mutex poisoned")
            .elapsed()
    }

    pub(crate) async fn is_stale(&self, tick: Duration) -> bool {
        Self::last_packet_age(&*self.current().await) > tick
    }

    /// Replaces this handle's live state in place after a successful
    /// redial, carrying over the user-data map, user identity,
    /// `last_packet_at`, and pending-requests map — in-flight requests keep
    /// waiting on the new connection and let their own
    /// `send_request_timeout` decide their fate, per the design notes.
    pub(crate) async fn hot_swap(
        &self,
        connection: Arc<Connection>,
        handler: Option<Arc<dyn Handler>>,
        weak_self: Weak<Session>,
    ) {
        let old = self.current().await;
        let read_loop = tokio::spawn(read_loop(
            weak_self,
            connection.clone(),
            handler,
            self.manager.clone(),
        ));

        // `oneshot::Sender` is not `Clone`, so pending waiters are moved
        // (removed then reinserted) rather than cloned across states.
        let pending = DashMap::new();
        let pending_ids: Vec<i64> = old.pending.iter().map(|e| *e.key()).collect();
        for id in pending_ids {
            if let Some((_, tx)) = old.pending.remove(&id) {
                pending.insert(id, tx);
            }
        }

        let new_state = SessionState {
            connection: connection.clone(),
            user: old.user.clone(),
            user_data: old.user_data.clone(),
            last_packet_at: std::sync::Mutex::new(
                *old.last_packet_at.lock().expect("last_packet_at mutex poisoned"),
            ),
            pending,
            read_loop,
        };
        *self.remote_addr.lock().expect("remote_addr mutex poisoned") =
            connection.remote_addr().map(str::to_string);
        *self.state.write().await = Arc::new(new_state);
    }
}

/// Repeatedly reads packets off `connection` and either delivers them to a
/// pending request waiter or dispatches them to `handler` on a fresh task,
/// so a slow handler never blocks framing.
async fn read_loop(
    session: Weak<Session>,
    connection: Arc<Connection>,
    handler: Option<Arc<dyn Handler>>,
    manager: Weak<Manager>,
) {
    loop {
        let packet = match connection.read_packet().await {
            Ok(p) => p,
            Err(e) if e.is_stream_handover() => continue,
            Err(e) => {
                if !e.is_clean_eof() {
                    warn!(remote = ?connection.remote_addr(), error = %e, "session read error");
                } else {
                    debug!(remote = ?connection.remote_addr(), "session closed by peer");
                }
                break;
            },
        };

        let Some(session) = session.upgrade() else { break };
        let state = session.current().await;
        *state.last_packet_at.lock().expect("last_packet_at mutex poisoned") =
            std::time::Instant::now();

        if let Some((_, tx)) = state.pending.remove(&packet.id()) {
            let _ = tx.send(packet);
            continue;
        }

        if let Some(handler) = handler.clone() {
            let session = session.clone();
            tokio::spawn(async move {
                handler.handle(packet, session).await;
            });
        }
    }

    if let Some(manager) = manager.upgrade()
        && let Some(session) = session.upgrade()
    {
        manager.remove(session.id()).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::{
        manager::Manager,
        packet::{AnyPacket, tlv::TlvPacket},
    };

    #[tokio::test]
    async fn send_request_times_out_and_deregisters() {
        let (a, _b) = duplex(4096);
        let connection = Arc::new(Connection::new_tlv(a, None, None));
        let manager = Manager::new(None, None, false);
        let session = Session::spawn(1, connection, None, Arc::downgrade(&manager), None);

        let packet = AnyPacket::Tlv(TlvPacket::new(1, 7, vec![]));
        let err = session
            .send_request_timeout(&packet, Duration::from_millis(20))
            .await
            .expect_err("no reply ever arrives");
        assert!(matches!(err, Error::DeadlineExceeded));

        let state = session.current().await;
        assert!(!state.pending.contains_key(&7));
    }

    #[tokio::test]
    async fn get_set_round_trips_a_typed_value() {
        let (a, _b) = duplex(4096);
        let connection = Arc::new(Connection::new_tlv(a, None, None));
        let manager = Manager::new(None, None, false);
        let session = Session::spawn(1, connection, None, Arc::downgrade(&manager), None);

        session.set("k", 42i32).await;
        let got = session.get::<i32>("k").await;
        assert_eq!(got.map(|v| *v), Some(42));
    }
}
