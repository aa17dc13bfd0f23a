//! Unified error type for the Tandem server.

use tandem_auth::AuthError;
use tandem_exec::ExecError;
use tandem_hub::HubError;
use tandem_protocol::ProtocolError;
use tandem_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TandemError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, validation).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A token verification error.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A session hub error (admission, permissions, state).
    #[error(transparent)]
    Hub(#[from] HubError),

    /// An execution dispatcher error.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let top: TandemError = err.into();
        assert!(matches!(top, TandemError::Transport(_)));
        assert!(top.to_string().contains("gone"));
    }

    #[test]
    fn test_from_hub_error() {
        let top: TandemError = HubError::InvalidInvite.into();
        assert!(matches!(top, TandemError::Hub(_)));
    }

    #[test]
    fn test_from_exec_error() {
        let top: TandemError = ExecError::Timeout.into();
        assert!(matches!(top, TandemError::Exec(_)));
    }
}
