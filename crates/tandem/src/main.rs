//! The `tandem-server` binary: config from env, tracing to stderr,
//! then the accept loop until the process is killed.
//!
//! Exit codes: 0 on clean shutdown, 1 when no listening port is
//! available in the probe range (or startup otherwise fails).

use tandem::{Config, TandemServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(port = config.port, sandbox = %config.sandbox_url, "starting tandem");

    let server = match TandemServer::builder(config).build().await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            std::process::exit(1);
        }
    };

    if let Ok(addr) = server.local_addr() {
        tracing::info!(%addr, "listening");
    }

    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "server terminated");
        std::process::exit(1);
    }
}
