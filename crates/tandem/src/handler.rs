//! Per-connection handler: rate limit, handshake, and the event loop.
//!
//! Each accepted connection gets its own Tokio task running this
//! handler. The flow is:
//!   1. Rate-limit the source address
//!   2. Receive the handshake frame → verify the token (guest fallback)
//!   3. Spawn the writer half (drains the outbound queue in FIFO order)
//!   4. Send `connected`, auto-join if the handshake named a session
//!   5. Loop: receive frames → route
//!   6. On close: implicit leave via the drop guard

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tandem_auth::Principal;
use tandem_hub::EventSender;
use tandem_protocol::{
    ClientEvent, Codec, ConnectionId, ErrorCode, HandshakeRequest, ServerEvent,
    SessionId, UserId,
};
use tandem_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::router;
use crate::server::ServerState;
use crate::TandemError;

/// How long a fresh connection gets to send its handshake frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Connection context
// ---------------------------------------------------------------------------

/// Everything the router needs to know about one live connection.
///
/// The session binding sits behind a mutex shared with the drop guard,
/// so the implicit leave finds the current binding even if the handler
/// unwinds mid-event.
pub(crate) struct ConnectionCtx {
    pub(crate) connection_id: ConnectionId,
    pub(crate) principal: Principal,
    pub(crate) authenticated: bool,
    binding: Arc<StdMutex<Option<SessionId>>>,
    outbound: EventSender,
}

impl ConnectionCtx {
    /// The session this connection is bound to, if any.
    pub(crate) fn session_id(&self) -> Option<SessionId> {
        self.binding.lock().expect("binding poisoned").clone()
    }

    /// Binds the connection to a session (join succeeded).
    pub(crate) fn bind(&self, session_id: SessionId) {
        *self.binding.lock().expect("binding poisoned") = Some(session_id);
    }

    /// Clears the binding (leave, or the session vanished).
    pub(crate) fn unbind(&self) {
        *self.binding.lock().expect("binding poisoned") = None;
    }

    /// Queues an event for this connection. Delivery order is the call
    /// order — the writer half drains the queue FIFO.
    pub(crate) fn send(&self, event: ServerEvent) {
        let _ = self.outbound.send(event);
    }

    /// A clone of the outbound sender, for session fan-out.
    pub(crate) fn sender(&self) -> EventSender {
        self.outbound.clone()
    }

    pub(crate) fn user_id(&self) -> &UserId {
        &self.principal.user_id
    }
}

// ---------------------------------------------------------------------------
// Drop guard
// ---------------------------------------------------------------------------

/// Runs the implicit leave and connection accounting when the handler
/// exits — including on panic. `Drop` is synchronous, so the async
/// leave is a fire-and-forget task.
struct ConnectionGuard {
    state: Arc<ServerState>,
    connection_id: ConnectionId,
    user_id: UserId,
    binding: Arc<StdMutex<Option<SessionId>>>,
    peer_ip: std::net::IpAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self
            .state
            .active_connections
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        self.state.collector.set_active_users(remaining);
        self.state.limiter.forget_stale(self.peer_ip);

        let bound = self.binding.lock().expect("binding poisoned").take();
        if let Some(session_id) = bound {
            let state = Arc::clone(&self.state);
            let user_id = self.user_id.clone();
            let connection_id = self.connection_id;
            tokio::spawn(async move {
                let _ = state.sessions.leave(&session_id, user_id, connection_id).await;
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), TandemError> {
    let connection_id = conn.id();
    let peer_ip = conn.peer_addr().ip();

    // Rate limit before any other work.
    if !state.limiter.check(peer_ip) {
        let event = ServerEvent::ConnectionError {
            code: ErrorCode::RateLimited,
            message: "too many connections from this address".into(),
        };
        if let Ok(bytes) = state.codec.encode(&event) {
            let _ = conn.send(&bytes).await;
        }
        let _ = conn.close().await;
        return Ok(());
    }

    // --- Handshake ---
    let Some(handshake) = read_handshake(&conn, &state).await? else {
        return Ok(());
    };

    // Token failure still admits the connection as a guest; sessions
    // with allow_guests = false refuse it at join time instead. This
    // mirrors the deployed behavior (see DESIGN.md).
    let (principal, authenticated) = match handshake.token.as_deref() {
        Some(token) => match state.verifier.verify(token).await {
            Ok(principal) => (principal, true),
            Err(e) => {
                tracing::debug!(%connection_id, error = %e, "token rejected, admitting as guest");
                (Principal::guest(), false)
            }
        },
        None => (Principal::guest(), false),
    };

    // --- Writer half ---
    let conn = Arc::new(conn);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let writer = {
        let conn = Arc::clone(&conn);
        let codec = state.codec;
        let collector = Arc::clone(&state.collector);
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let bytes = match codec.encode(&event) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode outbound event");
                        continue;
                    }
                };
                if conn.send(&bytes).await.is_err() {
                    break;
                }
                collector.note_event_out();
            }
        })
    };

    let ctx = ConnectionCtx {
        connection_id,
        principal: principal.clone(),
        authenticated,
        binding: Arc::new(StdMutex::new(None)),
        outbound: outbound_tx,
    };

    let count = state.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
    state.collector.set_active_users(count);
    let _guard = ConnectionGuard {
        state: Arc::clone(&state),
        connection_id,
        user_id: principal.user_id.clone(),
        binding: Arc::clone(&ctx.binding),
        peer_ip,
    };

    tracing::info!(
        %connection_id,
        user_id = %ctx.principal.user_id,
        authenticated,
        "connection established"
    );

    ctx.send(ServerEvent::Connected {
        connection_id: ctx.connection_id,
        user_id: ctx.principal.user_id.clone(),
        display_name: ctx.principal.display_name.clone(),
        authenticated: ctx.authenticated,
        guest: ctx.principal.is_guest(),
    });

    // The handshake may name a session; spare the client a round trip.
    if handshake.invite_key.is_some() || handshake.session_id.is_some() {
        router::handle_event(
            &state,
            &ctx,
            ClientEvent::JoinSession {
                invite_key: handshake.invite_key.clone(),
                session_id: handshake.session_id.clone(),
            },
        )
        .await;
    }

    // --- Event loop ---
    loop {
        match conn.recv().await {
            Ok(Some(data)) => router::route_frame(&state, &ctx, &data).await,
            Ok(None) => {
                tracing::info!(%connection_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%connection_id, error = %e, "recv error");
                break;
            }
        }
    }

    // Dropping the context closes the outbound queue; the writer
    // finishes whatever is already queued, then exits. The guard drops
    // after, firing the implicit leave.
    drop(ctx);
    let _ = writer.await;
    Ok(())
}

/// Receives and decodes the handshake frame. `None` means the
/// connection was dismissed (timeout, close, malformed frame).
async fn read_handshake(
    conn: &WebSocketConnection,
    state: &Arc<ServerState>,
) -> Result<Option<HandshakeRequest>, TandemError> {
    let frame = match tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return Ok(None),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "recv failed before handshake");
            return Ok(None);
        }
        Err(_) => {
            tracing::debug!("handshake timed out");
            let _ = conn.close().await;
            return Ok(None);
        }
    };

    match state.codec.decode::<HandshakeRequest>(&frame) {
        Ok(handshake) => Ok(Some(handshake)),
        Err(e) => {
            tracing::debug!(error = %e, "malformed handshake frame");
            let event = ServerEvent::ConnectionError {
                code: ErrorCode::InvalidPayload,
                message: "malformed handshake".into(),
            };
            if let Ok(bytes) = state.codec.encode(&event) {
                let _ = conn.send(&bytes).await;
            }
            let _ = conn.close().await;
            Ok(None)
        }
    }
}
