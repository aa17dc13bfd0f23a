//! Error types for the execution dispatcher.

use tandem_protocol::ErrorCode;

/// Errors that can occur while dispatching code to the sandbox.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The requested language isn't in the closed table. Detected
    /// locally; no sandbox call is made.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The sandbox didn't answer within the overall HTTP timeout.
    #[error("execution timed out")]
    Timeout,

    /// The sandbox call failed for any other reason (transport error,
    /// non-success status, malformed response).
    #[error("execution failed: {0}")]
    Failed(String),

    /// Building the HTTP client failed (startup-time configuration).
    #[error("failed to build sandbox client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ExecError {
    /// The wire error code carried by the `execution_error` event.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedLanguage(_) => ErrorCode::UnsupportedLanguage,
            Self::Timeout => ErrorCode::ExecutionTimeout,
            Self::Failed(_) | Self::Client(_) => ErrorCode::ExecutionFailed,
        }
    }
}
