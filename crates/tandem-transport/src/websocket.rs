//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tandem_protocol::ConnectionId;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

use crate::{Connection, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// A WebSocket [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Binds to the first free port in `port..=port + extra_probes`.
    ///
    /// The deployment convention: try the configured port, step up one
    /// at a time, give up after the probe range so a misconfigured box
    /// fails fast instead of squatting on an arbitrary port.
    pub async fn bind_probe(
        host: &str,
        port: u16,
        extra_probes: u16,
    ) -> Result<Self, TransportError> {
        let end = port.saturating_add(extra_probes);
        for candidate in port..=end {
            match TcpListener::bind((host, candidate)).await {
                Ok(listener) => {
                    if candidate != port {
                        tracing::warn!(
                            wanted = port,
                            bound = candidate,
                            "configured port busy, stepped up"
                        );
                    }
                    tracing::info!(host, port = candidate, "WebSocket transport listening");
                    return Ok(Self { listener });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(TransportError::AcceptFailed(e)),
            }
        }
        Err(TransportError::NoFreePort { start: port, end })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer, "accepted WebSocket connection");

        // Split the socket so the reader and the writer lock
        // independently: a task pending in recv() must never block a
        // concurrent send() (the fan-out writer runs in its own task).
        let (sink, stream) = ws.split();

        Ok(WebSocketConnection {
            id,
            peer,
            sink: Arc::new(Mutex::new(sink)),
            stream: Arc::new(Mutex::new(stream)),
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A single WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    stream: Arc<Mutex<SplitStream<WsStream>>>,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        use futures_util::SinkExt;
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        use futures_util::SinkExt;
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
