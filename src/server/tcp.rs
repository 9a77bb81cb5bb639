// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TCP accept loop: wraps every accepted socket in a [`Connection`] and
//! hands it to a [`Manager`].

use std::sync::Arc;

use tokio::{net::TcpListener, sync::Notify};
use tracing::warn;

use crate::{
    Error, Result,
    cfg::enums::Wire,
    codec::TlvCodec,
    connection::Connection,
    manager::Manager,
};

enum ServerWire {
    Tlv(TlvCodec),
    Json(Vec<u8>),
}

/// A TCP listener handing accepted sockets to a [`Manager`].
///
/// `serve` runs the accept loop until [`Self::close`] is called (which
/// returns `Error::ListenerClosed` as the clean-shutdown signal) or the
/// listener itself errors, in which case that error is returned as-is.
pub struct TcpServer {
    manager: Arc<Manager>,
    wire: ServerWire,
    shutdown: Arc<Notify>,
}

impl TcpServer {
    pub fn new_tlv(manager: Arc<Manager>, codec: TlvCodec) -> Arc<Self> {
        Self::build(manager, ServerWire::Tlv(codec))
    }

    pub fn new_json(manager: Arc<Manager>, delimiter: Vec<u8>) -> Arc<Self> {
        Self::build(manager, ServerWire::Json(delimiter))
    }

    /// Builds a server for whichever byte-stream wire [`Wire`] names;
    /// `Wire::WebSocket` is rejected since it has no byte-stream codec.
    pub fn new(manager: Arc<Manager>, wire: Wire, tlv_codec: TlvCodec, json_delimiter: Vec<u8>) -> Result<Arc<Self>> {
        match wire {
            Wire::Tlv => Ok(Self::new_tlv(manager, tlv_codec)),
            Wire::Json => Ok(Self::new_json(manager, json_delimiter)),
            Wire::WebSocket => Err(Error::TypeMismatch {
                codec: "tcp_server",
                found: "websocket",
            }),
        }
    }

    fn build(manager: Arc<Manager>, wire: ServerWire) -> Arc<Self> {
        Arc::new(Self {
            manager,
            wire,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Binds `addr` and accepts connections until closed.
    pub async fn serve(self: &Arc<Self>, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    let local = socket.local_addr().ok().map(|a| a.to_string());
                    let remote = Some(peer.to_string());
                    let connection = match &self.wire {
                        ServerWire::Tlv(codec) => {
                            Connection::new_tlv_with_codec(codec.clone(), socket, local, remote)
                        },
                        ServerWire::Json(delimiter) => {
                            Connection::new_json(socket, delimiter.clone(), local, remote)
                        },
                    };
                    let manager = self.manager.clone();
                    tokio::spawn(async move {
                        if let Err(e) = manager.store(connection).await {
                            warn!(error = %e, "rejected incoming connection");
                        }
                    });
                },
                _ = self.shutdown.notified() => return Err(Error::ListenerClosed),
            }
        }
    }

    /// Idempotent: signals the accept loop to stop, then closes the
    /// manager (and every session it holds).
    pub async fn close(&self) -> Result<()> {
        self.shutdown.notify_waiters();
        self.manager.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connection::Connection as ClientConnection, packet::{AnyPacket, tlv::TlvPacket}};

    #[tokio::test]
    async fn accepts_a_connection_and_exchanges_a_packet() {
        let manager = Manager::new(None, None, false);
        let server = TcpServer::new_tlv(manager.clone(), TlvCodec::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let server_clone = server.clone();
        let addr_string = addr.to_string();
        let serve_task = tokio::spawn(async move {
            let _ = server_clone.serve(&addr_string).await;
        });

        // Give the accept loop a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
        let client_conn = Arc::new(ClientConnection::new_tlv(stream, None, None));
        client_conn
            .send_packet(&AnyPacket::Tlv(TlvPacket::new(1, 1, b"hi".to_vec())))
            .await
            .expect("send");

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                if manager.find(1).is_some() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session registered");

        server.close().await.expect("close");
        serve_task.abort();
    }
}
