//! Bearer-token auth for the HTTP admin surface.
//!
//! The spec's non-goals bound auth to "a bearer header" — no wallet
//! signatures, no session exchange. A single shared token (or set of
//! tokens) is configured at startup and checked on every admin request.

use crate::error::{Result, SandboxError};

/// Generate a fresh opaque per-sandbox auth token.
pub fn generate_token() -> String {
    use rand::RngCore;
    use rand::rngs::OsRng;

    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Extract a bearer token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer_token(header_value: &str) -> Result<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| SandboxError::Auth("missing or malformed bearer token".into()))
}

/// Tokens accepted by the admin surface, loaded once from `SANDBOX_ADMIN_TOKENS`
/// (comma-separated). An empty set disables auth — only acceptable for local
/// development, never production.
#[derive(Clone, Debug, Default)]
pub struct AdminTokens(Vec<String>);

impl AdminTokens {
    pub fn from_env() -> Self {
        let raw = std::env::var("SANDBOX_ADMIN_TOKENS").unwrap_or_default();
        let tokens = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self(tokens)
    }

    pub fn accepts(&self, token: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|t| t == token)
    }

    /// True when no tokens are configured — auth is disabled entirely.
    pub fn is_disabled(&self) -> bool {
        self.0.is_empty()
    }
}
