//! `TandemServer` builder and accept loop.
//!
//! This is the entry point for running the collaboration hub. It ties
//! together all the layers: transport → protocol → auth → hub, plus the
//! execution dispatcher and the metrics ticker.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tandem_auth::{IdentityProvider, TokenVerifier, VerifierConfig};
use tandem_exec::{ExecConfig, ExecutionDispatcher};
use tandem_hub::{HubConfig, SessionHub};
use tandem_metrics::{MetricsCollector, MetricsConfig, MetricsHub};
use tandem_protocol::{JsonCodec, SessionSettings};
use tandem_transport::{
    ConnectionRateLimiter, RateLimiterConfig, Transport, WebSocketTransport,
};

use crate::handler::handle_connection;
use crate::{Config, TandemError};

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The
/// pieces with interior mutability (registry, limiter, counters) manage
/// their own locking.
pub(crate) struct ServerState {
    pub(crate) sessions: Arc<SessionHub>,
    pub(crate) verifier: TokenVerifier,
    pub(crate) exec: ExecutionDispatcher,
    pub(crate) metrics: Arc<MetricsHub>,
    pub(crate) collector: Arc<MetricsCollector>,
    pub(crate) limiter: ConnectionRateLimiter,
    pub(crate) codec: JsonCodec,
    pub(crate) active_connections: AtomicUsize,
}

/// Builder for configuring and starting a Tandem server.
///
/// # Example
///
/// ```rust,ignore
/// let server = TandemServer::builder(Config::from_env())
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct TandemServerBuilder {
    config: Config,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl TandemServerBuilder {
    /// Creates a builder from a config.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            provider: None,
        }
    }

    /// Wires in a federated identity provider (the first verification
    /// path). Without one, only the locally-signed and development
    /// paths run.
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Binds the transport (probing ports) and assembles server state.
    pub async fn build(self) -> Result<TandemServer, TandemError> {
        let config = self.config;

        let transport = WebSocketTransport::bind_probe(
            &config.host,
            config.port,
            config.port_probes,
        )
        .await?;

        let mut verifier = TokenVerifier::new(VerifierConfig {
            jwt_secret: config.jwt_secret.clone(),
            rsa_public_key_pem: config.jwt_public_key_pem.clone(),
            allow_dev_tokens: config.allow_dev_tokens,
        })?;
        match self.provider {
            Some(provider) => verifier = verifier.with_provider(provider),
            None if config.firebase_admin_key.is_some() => {
                tracing::warn!(
                    "FIREBASE_ADMIN_KEY is set but no identity provider was wired in; \
                     federated tokens will fall through to the other paths"
                );
            }
            None => {}
        }

        let sessions = SessionHub::new(HubConfig {
            default_settings: SessionSettings {
                max_users: config.max_users_per_session,
                allow_guests: config.allow_guests_default,
                ..SessionSettings::default()
            },
            idle_timeout: config.session_idle_timeout,
        });

        let exec = ExecutionDispatcher::new(ExecConfig {
            base_url: config.sandbox_url.clone(),
            ..ExecConfig::default()
        })?;

        let collector = Arc::new(MetricsCollector::new());
        let metrics = MetricsHub::new(MetricsConfig::default(), Arc::clone(&collector));

        let limiter = ConnectionRateLimiter::new(RateLimiterConfig {
            max_connections: config.conn_rate_limit,
            window: config.conn_rate_window,
        });

        let state = Arc::new(ServerState {
            sessions,
            verifier,
            exec,
            metrics,
            collector,
            limiter,
            codec: JsonCodec,
            active_connections: AtomicUsize::new(0),
        });

        Ok(TandemServer { transport, state })
    }
}

/// A running Tandem server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct TandemServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

impl TandemServer {
    /// Creates a new builder.
    pub fn builder(config: Config) -> TandemServerBuilder {
        TandemServerBuilder::new(config)
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The session hub, for surfaces that consume it directly (the
    /// REST session-CRUD layer, embedding tests). Everything they do
    /// goes through the same admission paths as the realtime plane.
    pub fn sessions(&self) -> Arc<SessionHub> {
        Arc::clone(&self.state.sessions)
    }

    /// Runs the accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), TandemError> {
        tracing::info!("Tandem hub running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
