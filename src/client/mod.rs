// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Dialer, heartbeat pump, and policy-driven reconnect loop for outbound
//! sessions.
//!
//! A `Client` wraps a [`Manager`] configured with no [`crate::manager::Authenticator`]
//! (dialed sessions have nothing to authenticate) and installs its reconnect
//! algorithm as the manager's `after_closed` hook, so a session's read-loop
//! termination transparently triggers redial rather than requiring the
//! caller to notice and react.

pub mod policy;

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{net::TcpStream, sync::Notify};
use tracing::{info, warn};

use self::policy::ReconnectPolicy;
use crate::{
    Error, Result,
    cfg::{config::Config, enums::Wire},
    codec::{
        TlvCodec,
        ws::{TungsteniteSink, TungsteniteSource},
    },
    connection::Connection,
    manager::{LifecycleHook, Manager},
    packet::{AnyPacket, json::JsonPacket, tlv::TlvPacket, ws::WebSocketPacket},
    session::{Handler, Session},
};

/// Invoked once per successful dial (and once per successful reconnect
/// redial), before the session is registered — the hook point for sending
/// an initial login/handshake packet.
pub trait OnConnected: Send + Sync {
    fn call<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

enum WireKind {
    Tlv(TlvCodec),
    Json(Vec<u8>),
    WebSocket,
}

/// Dials out, keeps dialed sessions warm with a heartbeat, and redials them
/// transparently according to a configured [`ReconnectPolicy`].
pub struct Client {
    manager: Arc<Manager>,
    wire: WireKind,
    /// Last known dial address per session id, consulted by the reconnect
    /// loop; the manager itself only knows the connection's observed
    /// `remote_addr`, which a hostname-based dial target may not match.
    dial_addrs: DashMap<i64, String>,
    dial_timeout: Duration,
    keepalive_request_type: i32,
    reconnect: crate::cfg::config::ReconnectConfig,
    /// Mirrors the Go source's `NewClientOptions.NeedReconnect`: when false,
    /// a session ending for any reason (not just a manual close) is final.
    need_reconnect: bool,
    on_connected: Option<Arc<dyn OnConnected>>,
    closed: Arc<Notify>,
    closed_flag: AtomicBool,
}

impl Client {
    pub fn new(
        config: &Config,
        handler: Option<Arc<dyn Handler>>,
        on_connected: Option<Arc<dyn OnConnected>>,
    ) -> Arc<Client> {
        let wire = match config.wire.kind {
            Wire::Tlv => WireKind::Tlv(TlvCodec::new(
                config.wire.max_tlv_payload_bytes,
                config.wire.tlv_keepalive_request_type,
                config.wire.tlv_keepalive_response_type,
            )),
            Wire::Json => WireKind::Json(config.wire.json_delimiter.clone()),
            Wire::WebSocket => WireKind::WebSocket,
        };
        let manager = Manager::new(None, handler, false);
        let closed = Arc::new(Notify::new());

        let client = Arc::new_cyclic(|weak: &Weak<Client>| {
            manager.set_after_closed(Arc::new(ReconnectHook {
                client: weak.clone(),
            }));
            Client {
                manager: manager.clone(),
                wire,
                dial_addrs: DashMap::new(),
                dial_timeout: config.client.dial_timeout,
                keepalive_request_type: config.wire.tlv_keepalive_request_type,
                reconnect: config.client.reconnect.clone(),
                need_reconnect: config.client.need_reconnect,
                on_connected,
                closed: closed.clone(),
                closed_flag: AtomicBool::new(false),
            }
        });

        if let Some(period) = config.client.heartbeat_period {
            client.clone().spawn_heartbeat(period);
        }

        client
    }

    /// Dials `addr` with the configured default timeout.
    pub async fn dial(self: &Arc<Self>, addr: &str) -> Result<Arc<Session>> {
        let timeout = self.dial_timeout;
        self.dial_timeout(addr, timeout).await
    }

    /// Dials `addr`, wraps it in a `Connection`, optionally runs
    /// `on_connected`, then registers it through the manager.
    pub async fn dial_timeout(
        self: &Arc<Self>,
        addr: &str,
        timeout: Duration,
    ) -> Result<Arc<Session>> {
        let connection = tokio::time::timeout(timeout, self.connect(addr))
            .await
            .map_err(|_elapsed| Error::DeadlineExceeded)??;

        if let Some(on_connected) = &self.on_connected {
            on_connected.call(&connection).await?;
        }

        let session = self.manager.store(connection).await?;
        self.dial_addrs.insert(session.id(), addr.to_string());
        Ok(session)
    }

    async fn connect(&self, addr: &str) -> Result<Connection> {
        match &self.wire {
            WireKind::Tlv(codec) => {
                let stream = TcpStream::connect(addr).await?;
                let local = stream.local_addr().ok().map(|a| a.to_string());
                let remote = stream.peer_addr().ok().map(|a| a.to_string());
                Ok(Connection::new_tlv_with_codec(codec.clone(), stream, local, remote))
            },
            WireKind::Json(delimiter) => {
                let stream = TcpStream::connect(addr).await?;
                let local = stream.local_addr().ok().map(|a| a.to_string());
                let remote = stream.peer_addr().ok().map(|a| a.to_string());
                Ok(Connection::new_json(stream, delimiter.clone(), local, remote))
            },
            WireKind::WebSocket => {
                let (ws_stream, _response) = tokio_tungstenite::connect_async(addr)
                    .await
                    .map_err(|e| Error::Format(format!("websocket dial failed: {e}")))?;
                let (sink, source) = futures_util::StreamExt::split(ws_stream);
                Ok(Connection::new_websocket(
                    Box::new(TungsteniteSink(sink)),
                    Box::new(TungsteniteSource(source)),
                    None,
                    Some(addr.to_string()),
                ))
            },
        }
    }

    pub fn find(&self, id: i64) -> Option<Arc<Session>> {
        self.manager.find(id)
    }

    pub async fn range<F, Fut>(&self, f: F)
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = ()>,
    {
        self.manager.range(f).await;
    }

    /// Signals close (cancelling the heartbeat pump and any reconnect
    /// back-off wait) then tears down every dialed session.
    pub async fn close(&self) {
        self.closed_flag.store(true, Ordering::Release);
        self.closed.notify_waiters();
        self.manager.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed_flag.load(Ordering::Acquire)
    }

    fn keepalive_packet(&self) -> AnyPacket {
        match &self.wire {
            WireKind::Tlv(_) => {
                AnyPacket::Tlv(TlvPacket::new(self.keepalive_request_type, 0, Vec::new()))
            },
            WireKind::Json(_) => {
                AnyPacket::Json(JsonPacket::new(0, 0, 0, serde_json::Value::Null))
            },
            WireKind::WebSocket => AnyPacket::WebSocket(WebSocketPacket::new(0, 0, Vec::new())),
        }
    }

    fn spawn_heartbeat(self: Arc<Self>, period: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {},
                    _ = self.closed.notified() => break,
                }
                if self.is_closed() {
                    break;
                }
                let packet = self.keepalive_packet();
                let manager = self.manager.clone();
                manager
                    .range(|session| {
                        let session = session.clone();
                        let packet = packet.clone();
                        let manager = manager.clone();
                        async move {
                            if let Err(e) = session.send_packet(&packet).await {
                                warn!(session_id = session.id(), error = %e, "heartbeat send failed");
                                manager.remove(session.id()).await;
                            }
                        }
                    })
                    .await;
            }
        });
    }

    /// Runs the reconnect algorithm for a session whose read loop just
    /// terminated: redials the session's last known dial address,
    /// hot-swapping the session's state in place on success, until the
    /// policy gives up, the session was manually closed, or the client
    /// itself is closed.
    async fn reconnect(self: &Arc<Self>, session: Arc<Session>) {
        if !self.need_reconnect || session.manually_closed() || self.is_closed() {
            self.dial_addrs.remove(&session.id());
            return;
        }
        let Some(addr) = self.dial_addrs.get(&session.id()).map(|e| e.value().clone())
        else {
            return;
        };

        let policy = policy::build(&self.reconnect);
        let weak_session = Arc::downgrade(&session);
        let handler = self.manager.handler();

        while policy.retry() {
            match self.connect(&addr).await {
                Ok(connection) => {
                    if let Some(on_connected) = &self.on_connected
                        && let Err(e) = on_connected.call(&connection).await
                    {
                        warn!(error = %e, %addr, "on_connected failed during reconnect");
                    } else {
                        let connection = Arc::new(connection);
                        session
                            .hot_swap(connection, handler.clone(), weak_session.clone())
                            .await;
                        self.manager.reregister(session.clone());
                        info!(session_id = session.id(), %addr, "reconnected");
                        return;
                    }
                },
                Err(e) => warn!(error = %e, %addr, "reconnect dial failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(policy.backoff()) => {},
                _ = self.closed.notified() => return,
            }
        }

        self.dial_addrs.remove(&session.id());
        warn!(session_id = session.id(), %addr, "giving up on reconnect");
    }
}

struct ReconnectHook {
    client: Weak<Client>,
}

impl LifecycleHook for ReconnectHook {
    fn call<'a>(
        &'a self,
        session: Arc<Session>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if let Some(client) = self.client.upgrade() {
                client.reconnect(session).await;
            }
        })
    }
}
