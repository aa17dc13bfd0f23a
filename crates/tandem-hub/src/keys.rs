//! Generation of session ids and invite keys.

use rand::Rng;
use tandem_protocol::{InviteKey, SessionId};

/// The invite-key alphabet: uppercase alphanumerics, 36 symbols.
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a random session id: 32 lowercase hex characters
/// (128 bits of entropy).
///
/// Ids gate nothing by themselves — admission goes through invite
/// keys — but they must be non-guessable because a rejoining member
/// may bind by id alone.
pub fn generate_session_id() -> SessionId {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    SessionId(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

/// Generates a random invite key: exactly 12 characters drawn uniformly
/// from `[A-Z0-9]` (~62 bits).
///
/// Uniqueness across live sessions is the registry's job, not this
/// function's — the caller re-rolls on collision.
pub fn generate_invite_key() -> InviteKey {
    let mut rng = rand::rng();
    let key: String = (0..InviteKey::LEN)
        .map(|_| {
            let idx = rng.random_range(0..INVITE_ALPHABET.len());
            INVITE_ALPHABET[idx] as char
        })
        .collect();
    InviteKey(key)
}

// =========================================================================
// Tests
// =========================================================================
