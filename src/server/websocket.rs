// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! WebSocket server: an HTTP server (axum) that upgrades a configured path
//! and wraps the upgraded socket in the same [`Connection`] contract the
//! TCP server uses, via message-level `WsSink`/`WsSource` adapters rather
//! than the byte-stream `AsyncRead`/`AsyncWrite` pair.

use std::{future::Future, pin::Pin, sync::Arc};

use axum::{
    Router,
    extract::{
        State,
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use tokio::{net::TcpListener, sync::Notify};
use tracing::warn;

use crate::{
    Error, Result,
    codec::ws::{WsSink, WsSource},
    connection::Connection,
    manager::Manager,
    packet::ws::WsMessage,
};

fn from_axum_message(message: AxumMessage) -> WsMessage {
    match message {
        AxumMessage::Binary(b) => WsMessage::Binary(b.to_vec()),
        AxumMessage::Text(t) => WsMessage::Text(t.to_string()),
        _ => WsMessage::Close,
    }
}

fn into_axum_message(message: WsMessage) -> AxumMessage {
    match message {
        WsMessage::Binary(b) => AxumMessage::Binary(b.into()),
        WsMessage::Text(t) => AxumMessage::Text(t.into()),
        WsMessage::Close => AxumMessage::Close(None),
    }
}

struct AxumSink<S>(S);

impl<S> WsSink for AxumSink<S>
where S: futures_util::Sink<AxumMessage, Error = axum::Error> + Unpin + Send
{
    fn send<'a>(
        &'a mut self,
        message: WsMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        use futures_util::SinkExt;
        Box::pin(async move {
            self.0
                .send(into_axum_message(message))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))
        })
    }
}

struct AxumSource<S>(S);

impl<S> WsSource for AxumSource<S>
where S: futures_util::Stream<Item = std::result::Result<AxumMessage, axum::Error>> + Unpin + Send
{
    fn recv<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WsMessage>>> + Send + 'a>> {
        use futures_util::StreamExt;
        Box::pin(async move {
            match self.0.next().await {
                None => Ok(None),
                Some(Ok(message)) => Ok(Some(from_axum_message(message))),
                Some(Err(e)) => Err(Error::Io(std::io::Error::other(e))),
            }
        })
    }
}

/// An HTTP server upgrading one configured path to WebSocket, handing each
/// upgraded socket to a [`Manager`] as a `Connection`.
pub struct WebSocketServer {
    manager: Arc<Manager>,
    path: String,
    shutdown: Arc<Notify>,
}

impl WebSocketServer {
    pub fn new(manager: Arc<Manager>, path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            path: path.into(),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Binds `addr` and serves upgrade requests until [`Self::close`].
    pub async fn serve(self: &Arc<Self>, addr: &str) -> Result<()> {
        let app = Router::new()
            .route(&self.path, get(Self::upgrade))
            .with_state(self.clone());
        let listener = TcpListener::bind(addr).await?;
        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await
            .map_err(Error::Io)
    }

    async fn upgrade(
        State(server): State<Arc<Self>>,
        ws: WebSocketUpgrade,
    ) -> impl IntoResponse {
        ws.on_upgrade(move |socket: WebSocket| async move {
            let (sink, source) = futures_util::StreamExt::split(socket);
            let connection = Connection::new_websocket(
                Box::new(AxumSink(sink)),
                Box::new(AxumSource(source)),
                None,
                None,
            );
            if let Err(e) = server.manager.store(connection).await {
                warn!(error = %e, "rejected incoming websocket connection");
            }
        })
    }

    /// Idempotent: signals the HTTP server to stop accepting, then closes
    /// the manager.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.notify_waiters();
        self.manager.close().await;
        Ok(())
    }
}
