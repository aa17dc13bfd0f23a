//! Error types for token verification.

/// Errors produced while verifying a credential.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No verification path accepted the token. This is the only error
    /// the wire ever sees (`invalid_token`); the others are internal
    /// detail for logs.
    #[error("invalid token")]
    InvalidToken,

    /// The federated identity provider rejected the assertion.
    #[error("identity provider rejected the assertion: {0}")]
    ProviderRejected(String),

    /// The locally-signed path failed (bad signature, expired, wrong
    /// algorithm).
    #[error("local token verification failed: {0}")]
    LocalRejected(String),

    /// The token is signed correctly but expired.
    #[error("token expired")]
    Expired,
}
