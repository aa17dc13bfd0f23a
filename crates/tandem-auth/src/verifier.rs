//! The token verifier: turns a bearer credential into a [`Principal`].
//!
//! Three paths are attempted in order:
//!
//! 1. **Federated** — an [`IdentityProvider`] implementation (Firebase
//!    in production, a stub in tests). Only consulted when configured.
//! 2. **Locally signed** — a JWT verified against the configured
//!    secret (HS256) or public key (RS256).
//! 3. **Development** — any well-formed three-segment token whose
//!    payload carries `sub` and `email`. Meant for local development
//!    against a client that signs with a key the hub doesn't have;
//!    disabled in production via [`VerifierConfig::allow_dev_tokens`].
//!
//! The verifier is pure with respect to the hub: it never touches
//! session state, so it can be exercised in isolation.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tandem_protocol::UserId;

use crate::principal::display_name_from_email;
use crate::{AuthError, Principal, Role, TokenOrigin};

// ---------------------------------------------------------------------------
// Federated identity seam
// ---------------------------------------------------------------------------

/// The assertion contents returned by a federated identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedIdentity {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

/// Verifies identity assertions against an external provider.
///
/// A trait so production code can plug in the real provider while tests
/// use a stub — the verifier itself doesn't change.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validates the assertion and returns the asserted identity.
    async fn verify_assertion(&self, assertion: &str) -> Result<FederatedIdentity, AuthError>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Static configuration for the verifier.
#[derive(Debug, Clone, Default)]
pub struct VerifierConfig {
    /// Shared secret for the HS256 path. `None` disables it.
    pub jwt_secret: Option<String>,

    /// PEM-encoded RSA public key for the RS256 path. `None` disables it.
    pub rsa_public_key_pem: Option<String>,

    /// Whether the development-token fallback is active.
    /// MUST be `false` in production.
    pub allow_dev_tokens: bool,
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Claims read from locally-signed (and development) tokens.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    name: Option<String>,
    exp: Option<u64>,
    role: Option<String>,
    picture: Option<String>,
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// The token verifier. Cheap to share (`Arc` it into server state).
pub struct TokenVerifier {
    provider: Option<Arc<dyn IdentityProvider>>,
    hs256: Option<DecodingKey>,
    rs256: Option<DecodingKey>,
    allow_dev_tokens: bool,
}

impl TokenVerifier {
    /// Builds a verifier from configuration.
    ///
    /// # Errors
    /// Fails if the configured RSA public key is not valid PEM.
    pub fn new(config: VerifierConfig) -> Result<Self, AuthError> {
        let hs256 = config
            .jwt_secret
            .as_ref()
            .map(|secret| DecodingKey::from_secret(secret.as_bytes()));
        let rs256 = config
            .rsa_public_key_pem
            .as_ref()
            .map(|pem| {
                DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                    AuthError::LocalRejected(format!("invalid RS256 public key: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            provider: None,
            hs256,
            rs256,
            allow_dev_tokens: config.allow_dev_tokens,
        })
    }

    /// Attaches a federated identity provider (path 1).
    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Verifies a credential, trying each configured path in order.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] when no path accepts the
    /// token; per-path failures are logged at debug and fall through.
    pub async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        // Path 1: federated assertion.
        if let Some(provider) = &self.provider {
            match provider.verify_assertion(token).await {
                Ok(identity) => return Ok(principal_from_federated(identity)),
                Err(e) => {
                    tracing::debug!(error = %e, "federated path rejected token");
                }
            }
        }

        // Path 2: locally-signed JWT.
        match self.verify_local(token) {
            Ok(principal) => return Ok(principal),
            Err(e) => {
                tracing::debug!(error = %e, "local path rejected token");
            }
        }

        // Path 3: development fallback.
        if self.allow_dev_tokens {
            if let Some(principal) = decode_dev_token(token) {
                tracing::debug!(user_id = %principal.user_id, "accepted development token");
                return Ok(principal);
            }
        }

        Err(AuthError::InvalidToken)
    }

    /// Verifies signature and expiry against the configured local keys.
    fn verify_local(&self, token: &str) -> Result<Principal, AuthError> {
        let mut attempts: Vec<(Algorithm, &DecodingKey)> = Vec::new();
        if let Some(key) = &self.hs256 {
            attempts.push((Algorithm::HS256, key));
        }
        if let Some(key) = &self.rs256 {
            attempts.push((Algorithm::RS256, key));
        }
        if attempts.is_empty() {
            return Err(AuthError::LocalRejected("no local key configured".into()));
        }

        let mut last_err = AuthError::InvalidToken;
        for (alg, key) in attempts {
            // Expiry is checked manually below: tokens without `exp`
            // are accepted, tokens with a past `exp` are not.
            let mut validation = Validation::new(alg);
            validation.validate_exp = false;
            validation.required_spec_claims.clear();

            match jsonwebtoken::decode::<Claims>(token, key, &validation) {
                Ok(data) => {
                    if let Some(exp) = data.claims.exp {
                        if exp < now_secs() {
                            return Err(AuthError::Expired);
                        }
                    }
                    return Ok(principal_from_claims(data.claims, TokenOrigin::AutoCreated));
                }
                Err(e) => last_err = AuthError::LocalRejected(e.to_string()),
            }
        }
        Err(last_err)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn principal_from_federated(identity: FederatedIdentity) -> Principal {
    let display_name = identity
        .display_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| display_name_from_email(&identity.email));
    Principal {
        user_id: UserId(identity.user_id),
        email: Some(identity.email),
        display_name,
        role: Role::User,
        avatar: identity.avatar,
        origin: TokenOrigin::Verified,
    }
}

fn principal_from_claims(claims: Claims, origin: TokenOrigin) -> Principal {
    let role = match claims.role.as_deref() {
        Some("admin") => Role::Admin,
        _ => Role::User,
    };
    let display_name = claims
        .name
        .filter(|n| !n.is_empty())
        .or_else(|| claims.email.as_deref().map(display_name_from_email))
        .unwrap_or_else(|| claims.sub.clone());
    Principal {
        user_id: UserId(claims.sub),
        email: claims.email,
        display_name,
        role,
        avatar: claims.picture,
        origin,
    }
}

/// Decodes the payload of a well-formed compact token without verifying
/// its signature. Returns `None` unless the payload is JSON with both
/// `sub` and `email`.
fn decode_dev_token(token: &str) -> Option<Principal> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }
    let payload = URL_SAFE_NO_PAD.decode(segments[1]).ok()?;
    let claims: Claims = serde_json::from_slice(&payload).ok()?;
    // `sub` is structurally required by Claims; `email` is the explicit
    // gate for the development path.
    claims.email.as_ref()?;
    Some(principal_from_claims(claims, TokenOrigin::Development))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Verifier path tests. Tokens are minted inline with `jsonwebtoken`
    //! (HS256) or hand-rolled base64 (development path) — no network,
    //! no provider unless the test installs a stub.

    use base64::Engine as _;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    const SECRET: &str = "test-secret";

    fn verifier(allow_dev: bool) -> TokenVerifier {
        TokenVerifier::new(VerifierConfig {
            jwt_secret: Some(SECRET.into()),
            rsa_public_key_pem: None,
            allow_dev_tokens: allow_dev,
        })
        .expect("config should be valid")
    }

    fn hs256_token(claims: &serde_json::Value) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("encode")
    }

    /// A three-segment token with an arbitrary payload and a garbage
    /// signature — exactly what the development path exists for.
    fn dev_token(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
        format!("{header}.{body}.unverifiable")
    }

    fn far_future() -> u64 {
        now_secs() + 3600
    }

    // =====================================================================
    // Locally-signed path
    // =====================================================================

    #[tokio::test]
    async fn test_verify_hs256_token_returns_auto_created_principal() {
        let v = verifier(false);
        let token = hs256_token(&json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "exp": far_future(),
        }));

        let principal = v.verify(&token).await.expect("should verify");

        assert_eq!(principal.user_id.as_str(), "user-1");
        assert_eq!(principal.email.as_deref(), Some("ada@example.com"));
        assert_eq!(principal.display_name, "ada");
        assert_eq!(principal.origin, TokenOrigin::AutoCreated);
    }

    #[tokio::test]
    async fn test_verify_prefers_name_claim_over_email_local_part() {
        let v = verifier(false);
        let token = hs256_token(&json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "name": "Ada Lovelace",
            "exp": far_future(),
        }));

        let principal = v.verify(&token).await.unwrap();
        assert_eq!(principal.display_name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_verify_admin_role_claim() {
        let v = verifier(false);
        let token = hs256_token(&json!({
            "sub": "root",
            "email": "root@example.com",
            "role": "admin",
            "exp": far_future(),
        }));

        let principal = v.verify(&token).await.unwrap();
        assert_eq!(principal.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_verify_token_without_exp_is_accepted() {
        let v = verifier(false);
        let token = hs256_token(&json!({
            "sub": "user-1",
            "email": "ada@example.com",
        }));

        assert!(v.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_expired_token_rejected_when_dev_path_disabled() {
        let v = verifier(false);
        let token = hs256_token(&json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "exp": 1_000u64, // 1970
        }));

        let result = v.verify(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_verify_trims_surrounding_whitespace() {
        let v = verifier(false);
        let token = hs256_token(&json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "exp": far_future(),
        }));

        let principal = v.verify(&format!("  {token}\n")).await.unwrap();
        assert_eq!(principal.user_id.as_str(), "user-1");
    }

    #[tokio::test]
    async fn test_verify_tampered_signature_rejected() {
        let v = verifier(false);
        let mut token = hs256_token(&json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "exp": far_future(),
        }));
        token.push('x');

        assert!(v.verify(&token).await.is_err());
    }

    // =====================================================================
    // Development path
    // =====================================================================

    #[tokio::test]
    async fn test_dev_token_accepted_when_enabled() {
        let v = verifier(true);
        let token = dev_token(&json!({
            "sub": "dev-user",
            "email": "dev@example.com",
        }));

        let principal = v.verify(&token).await.expect("dev path should accept");
        assert_eq!(principal.origin, TokenOrigin::Development);
        assert_eq!(principal.user_id.as_str(), "dev-user");
    }

    #[tokio::test]
    async fn test_dev_token_rejected_when_disabled() {
        let v = verifier(false);
        let token = dev_token(&json!({
            "sub": "dev-user",
            "email": "dev@example.com",
        }));

        assert!(matches!(
            v.verify(&token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_dev_token_requires_email() {
        let v = verifier(true);
        let token = dev_token(&json!({ "sub": "dev-user" }));

        assert!(v.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_dev_token_requires_three_segments() {
        let v = verifier(true);
        assert!(v.verify("just-one-segment").await.is_err());
        assert!(v.verify("two.segments").await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let v = verifier(true);
        assert!(v.verify("!!!not.a.token!!!").await.is_err());
        assert!(v.verify("").await.is_err());
    }

    // =====================================================================
    // Federated path
    // =====================================================================

    /// A stub provider accepting exactly one assertion string.
    struct StubProvider;

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn verify_assertion(
            &self,
            assertion: &str,
        ) -> Result<FederatedIdentity, AuthError> {
            if assertion == "good-assertion" {
                Ok(FederatedIdentity {
                    user_id: "fed-1".into(),
                    email: "fed@example.com".into(),
                    display_name: None,
                    avatar: None,
                })
            } else {
                Err(AuthError::ProviderRejected("unknown assertion".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_federated_path_returns_verified_principal() {
        let v = verifier(false).with_provider(Arc::new(StubProvider));

        let principal = v.verify("good-assertion").await.unwrap();

        assert_eq!(principal.origin, TokenOrigin::Verified);
        assert_eq!(principal.user_id.as_str(), "fed-1");
        // No name in the assertion → local part of the email.
        assert_eq!(principal.display_name, "fed");
    }

    #[tokio::test]
    async fn test_federated_failure_falls_through_to_local_path() {
        let v = verifier(false).with_provider(Arc::new(StubProvider));
        let token = hs256_token(&json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "exp": far_future(),
        }));

        let principal = v.verify(&token).await.unwrap();
        assert_eq!(principal.origin, TokenOrigin::AutoCreated);
    }
}
