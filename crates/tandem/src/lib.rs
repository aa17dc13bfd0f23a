//! # Tandem
//!
//! Realtime collaboration backend for a multi-user code editor.
//!
//! The hub hosts ephemeral sessions in which a small group of
//! authenticated (or guest) clients share an in-memory workspace —
//! files and folders, a chat log, and transient presence — over a
//! WebSocket event plane with per-event authorization and
//! session-scoped broadcast. Code execution is delegated to an
//! external sandbox and fanned back to the session room.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem::prelude::*;
//!
//! # async fn run() -> Result<(), TandemError> {
//! let server = TandemServer::builder(Config::default()).build().await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod router;
mod server;

pub use config::Config;
pub use error::TandemError;
pub use server::{TandemServer, TandemServerBuilder};

/// Re-exports everything an embedding surface needs.
///
/// ```rust
/// use tandem::prelude::*;
/// ```
pub mod prelude {
    // Meta-crate
    pub use crate::{Config, TandemError, TandemServer, TandemServerBuilder};

    // Protocol types
    pub use tandem_protocol::{
        ClientEvent, Codec, ConnectionId, ErrorCode, HandshakeRequest,
        InviteKey, JsonCodec, PermissionSet, ProtocolError, ServerEvent,
        SessionId, SessionSettings, UserId,
    };

    // Auth types
    pub use tandem_auth::{
        AuthError, IdentityProvider, Principal, Role, TokenOrigin,
        TokenVerifier, VerifierConfig,
    };

    // Hub types
    pub use tandem_hub::{
        CreatedSession, HubConfig, HubError, SessionHandle, SessionHub,
    };

    // Transport types
    pub use tandem_transport::{
        Connection, ConnectionRateLimiter, RateLimiterConfig, Transport,
        TransportError, WebSocketTransport,
    };

    // Execution types
    pub use tandem_exec::{ExecConfig, ExecError, ExecutionDispatcher};

    // Metrics types
    pub use tandem_metrics::{MetricsCollector, MetricsConfig, MetricsHub};
}
