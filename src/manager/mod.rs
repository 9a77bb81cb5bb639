// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Registry of live sessions, keyed both by session id and by authenticated
//! user identity, with pluggable authentication and lifecycle hooks.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    connection::Connection,
    session::{AuthUser, Handler, Session},
};

/// Validates a freshly-accepted (or dialed) connection and produces its
/// authenticated identity. Given a connection, reads one packet and returns
/// a user whose `valid()` decides acceptance; implementations may send
/// acknowledgement packets before returning.
pub trait Authenticator: Send + Sync {
    fn authenticate<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn AuthUser>>> + Send + 'a>>;
}

/// A lifecycle callback invoked outside any index lock.
pub trait LifecycleHook: Send + Sync {
    fn call<'a>(
        &'a self,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Registry and policy layer shared by servers (which accept connections)
/// and clients (which dial out): both register sessions through the same
/// `store`/`remove`/`range` contract, the client simply configures no
/// `Authenticator`.
pub struct Manager {
    sessions: DashMap<i64, Arc<Session>>,
    users: DashMap<String, Arc<Session>>,
    next_id: AtomicI64,
    authenticator: Option<Arc<dyn Authenticator>>,
    handler: Option<Arc<dyn Handler>>,
    exclusive_user: bool,
    on_session_created: std::sync::RwLock<Option<Arc<dyn LifecycleHook>>>,
    before_closed: std::sync::RwLock<Option<Arc<dyn LifecycleHook>>>,
    after_closed: std::sync::RwLock<Option<Arc<dyn LifecycleHook>>>,
    closed: AtomicBool,
}

impl Manager {
    pub fn new(
        authenticator: Option<Arc<dyn Authenticator>>,
        handler: Option<Arc<dyn Handler>>,
        exclusive_user: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            users: DashMap::new(),
            next_id: AtomicI64::new(1),
            authenticator,
            handler,
            exclusive_user,
            on_session_created: std::sync::RwLock::new(None),
            before_closed: std::sync::RwLock::new(None),
            after_closed: std::sync::RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_on_session_created(&self, hook: Arc<dyn LifecycleHook>) {
        *self
            .on_session_created
            .write()
            .expect("on_session_created lock poisoned") = Some(hook);
    }

    pub fn set_before_closed(&self, hook: Arc<dyn LifecycleHook>) {
        *self.before_closed.write().expect("before_closed lock poisoned") = Some(hook);
    }

    pub fn set_after_closed(&self, hook: Arc<dyn LifecycleHook>) {
        *self.after_closed.write().expect("after_closed lock poisoned") = Some(hook);
    }

    pub(crate) fn next_session_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.clone()
    }

    /// Runs the authenticator (if any); rejects on error or on
    /// `!user.valid()`. If `exclusive_user` is set and a prior session
    /// shares the new user's id, the previous session is closed first.
    /// Fires `on_session_created` after both indices are populated.
    pub async fn store(self: &Arc<Self>, connection: Connection) -> Result<Arc<Session>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let connection = Arc::new(connection);
        let user = match &self.authenticator {
            Some(auth) => {
                let user = auth.authenticate(&connection).await?;
                if !user.valid() {
                    let _ = connection.close().await;
                    return Err(Error::AuthFailed("authenticator rejected user".to_string()));
                }
                Some(user)
            },
            None => None,
        };

        if self.exclusive_user
            && let Some(user) = &user
            && let Some(prior) = self.users.get(&user.id()).map(|e| e.value().clone())
        {
            debug!(user_id = %user.id(), "exclusive_user: evicting prior session");
            self.sessions.remove(&prior.id());
            self.users.remove(&user.id());
            self.run_hook(&self.before_closed, prior.clone()).await;
            let _ = prior.close().await;
            self.run_hook(&self.after_closed, prior).await;
        }

        let id = self.next_session_id();
        let session = Session::spawn(
            id,
            connection,
            user.clone(),
            Arc::downgrade(self),
            self.handler.clone(),
        );

        self.sessions.insert(id, session.clone());
        if let Some(user) = &user {
            self.users.insert(user.id(), session.clone());
        }

        self.run_hook(&self.on_session_created, session.clone()).await;
        Ok(session)
    }

    pub fn find(&self, id: i64) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|e| e.clone())
    }

    /// Re-inserts a session into both indices after a successful reconnect
    /// hot-swap. `remove()` already evicted it from both when its read loop
    /// ended and `after_closed` fired; the client's reconnect loop calls
    /// this once the swap lands so the handle is reachable again.
    pub fn reregister(&self, session: Arc<Session>) {
        if let Some(user) = session.user() {
            self.users.insert(user.id(), session.clone());
        }
        self.sessions.insert(session.id(), session);
    }

    /// Atomic removal from both indices; fires `before_closed`, closes the
    /// connection, fires `after_closed`. A no-op for an unknown id.
    pub async fn remove(&self, id: i64) {
        let Some((_, session)) = self.sessions.remove(&id) else {
            return;
        };
        if let Some(user) = session.user() {
            self.users.remove(&user.id());
        }
        self.run_hook(&self.before_closed, session.clone()).await;
        if let Err(e) = Box::pin(session.close()).await
            && !e.is_clean_eof()
        {
            warn!(session_id = id, error = %e, "error closing session");
        }
        self.run_hook(&self.after_closed, session).await;
    }

    /// Snapshots the current sessions, releasing any per-shard lock before
    /// invoking `f`, so a slow callback (or one that itself calls back into
    /// the manager, e.g. `remove`) cannot deadlock against concurrent
    /// `store`/`remove` calls.
    pub async fn range<F, Fut>(&self, mut f: F)
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let snapshot: Vec<Arc<Session>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in snapshot {
            f(session).await;
        }
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<i64> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.remove(id).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Spawns the keepalive sweeper: every `tick`, removes any session
    /// whose `last_packet_at` is older than `tick`.
    pub fn spawn_keepalive_sweeper(self: &Arc<Self>, tick: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            loop {
                interval.tick().await;
                if manager.is_closed() {
                    break;
                }
                let stale: Vec<i64> = {
                    let mut ids = Vec::new();
                    for entry in manager.sessions.iter() {
                        if entry.value().is_stale(tick).await {
                            ids.push(*entry.key());
                        }
                    }
                    ids
                };
                for id in stale {
                    info!(session_id = id, "keepalive sweep: removing stale session");
                    manager.remove(id).await;
                }
            }
        });
    }

    async fn run_hook(
        &self,
        hook: &std::sync::RwLock<Option<Arc<dyn LifecycleHook>>>,
        session: Arc<Session>,
    ) {
        let hook = hook.read().expect("lifecycle hook lock poisoned").clone();
        if let Some(hook) = hook {
            hook.call(session).await;
        }
    }
}
