//! Error types for the session hub.

use tandem_protocol::{ErrorCode, ProtocolError, SessionId};

/// Errors that can occur during admission, permission checks, and
/// session state mutations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The invite key resolves to no live session.
    #[error("invalid invite key")]
    InvalidInvite,

    /// The session has reached `settings.max_users`.
    #[error("session {0} is full")]
    SessionFull(SessionId),

    /// A guest principal tried to join a session with
    /// `allow_guests = false`.
    #[error("guests are not allowed in this session")]
    GuestDenied,

    /// The caller lacks the permission (or capability) the operation
    /// requires.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// No live session with this id.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The session's command channel is closed (actor shut down mid
    /// operation).
    #[error("session {0} is unavailable")]
    SessionUnavailable(SessionId),

    /// A payload failed validation (limits, required fields).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<ProtocolError> for HubError {
    fn from(e: ProtocolError) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

impl HubError {
    /// The wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInvite => ErrorCode::InvalidInvite,
            Self::SessionFull(_) => ErrorCode::SessionFull,
            Self::GuestDenied => ErrorCode::GuestDenied,
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::SessionNotFound(_) | Self::SessionUnavailable(_) => {
                ErrorCode::SessionNotFound
            }
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
        }
    }

    /// Whether this failure belongs on the `session_error` channel
    /// (admission failures) rather than the generic `error` channel.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInvite
                | Self::SessionFull(_)
                | Self::GuestDenied
                | Self::SessionNotFound(_)
        )
    }
}

// =========================================================================
// Tests
// =========================================================================
