//! Payload validation limits, enforced at the router edge and re-checked
//! by the session state engine.

use crate::ProtocolError;

/// Maximum length of a workspace path, in bytes.
pub const MAX_PATH_LEN: usize = 500;

/// Maximum size of a code payload (`code_change`, `realtime_code_change`,
/// file contents), in bytes.
pub const MAX_CODE_LEN: usize = 1_000_000;

/// Validates a workspace path: non-empty, at most [`MAX_PATH_LEN`] bytes,
/// and free of `..` segments.
///
/// The `..` check is on segments, not substrings — a file legitimately
/// named `notes..md` passes, while `a/../b` is rejected whether or not
/// it would resolve inside the session.
pub fn validate_path(path: &str) -> Result<(), ProtocolError> {
    if path.is_empty() {
        return Err(ProtocolError::InvalidPath("empty path".into()));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(ProtocolError::InvalidPath(format!(
            "path exceeds {MAX_PATH_LEN} bytes"
        )));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(ProtocolError::InvalidPath(
            "path contains a '..' segment".into(),
        ));
    }
    Ok(())
}

/// Validates a code payload against [`MAX_CODE_LEN`].
pub fn validate_code(content: &str) -> Result<(), ProtocolError> {
    if content.len() > MAX_CODE_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            size: content.len(),
            limit: MAX_CODE_LEN,
        });
    }
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================
