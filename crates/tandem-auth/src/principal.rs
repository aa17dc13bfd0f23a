//! Principal types: the normalized identity attached to a connection.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tandem_protocol::UserId;

/// Coarse role of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
    Guest,
}

/// How the principal's credential was established.
///
/// Carried on the connection for auditing; `Development` principals are
/// only possible when the dev-token path is enabled in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenOrigin {
    /// Verified by the federated identity provider.
    Verified,
    /// Verified against the locally-configured signing key.
    AutoCreated,
    /// No (valid) credential; synthetic guest identity.
    Guest,
    /// Accepted by the development-token fallback.
    Development,
}

/// A verified (or guest) identity, normalized across all token paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: UserId,
    pub email: Option<String>,
    pub display_name: String,
    pub role: Role,
    pub avatar: Option<String>,
    pub origin: TokenOrigin,
}

impl Principal {
    /// Creates a synthetic guest principal.
    ///
    /// The id is `guest-` plus 48 random bits of hex — unique for the
    /// life of the process and never reused, so a guest can't collide
    /// with (or impersonate) another guest across connections.
    pub fn guest() -> Self {
        let mut rng = rand::rng();
        let bytes: [u8; 6] = rng.random();
        let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            user_id: UserId(format!("guest-{suffix}")),
            email: None,
            display_name: format!("Guest {}", &suffix[..4]),
            role: Role::Guest,
            avatar: None,
            origin: TokenOrigin::Guest,
        }
    }

    /// Returns `true` for guest principals (role, not id shape).
    pub fn is_guest(&self) -> bool {
        self.role == Role::Guest
    }
}

/// Derives a display name from an email's local part.
///
/// `ada@example.com` → `ada`. Used when a token carries no name claim.
pub(crate) fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_principals_are_unique() {
        let a = Principal::guest();
        let b = Principal::guest();
        assert_ne!(a.user_id, b.user_id);
        assert!(a.user_id.is_guest());
        assert!(a.is_guest());
    }

    #[test]
    fn test_guest_has_no_email() {
        let g = Principal::guest();
        assert_eq!(g.email, None);
        assert_eq!(g.origin, TokenOrigin::Guest);
    }

    #[test]
    fn test_display_name_from_email_takes_local_part() {
        assert_eq!(display_name_from_email("ada@example.com"), "ada");
        assert_eq!(display_name_from_email("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::to_string(&Role::Guest).unwrap(), "\"guest\"");
    }

    #[test]
    fn test_token_origin_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&TokenOrigin::AutoCreated).unwrap(),
            "\"auto-created\""
        );
    }
}
