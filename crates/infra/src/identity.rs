//! Static identity provider for tests/dev: opaque token → decoded claims.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use projectgate_auth::{AccessError, IdentityClaims, IdentityProvider, UserContext};

#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<String, IdentityClaims>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, token: impl Into<String>, claims: IdentityClaims) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.into(), claims);
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens
            .write()
            .map(|mut tokens| tokens.remove(token).is_some())
            .unwrap_or(false)
    }

    /// [`IdentityProvider::verify_token`] against an explicit clock.
    pub fn verify_token_at(&self, token: &str, now: DateTime<Utc>) -> Result<UserContext, AccessError> {
        let claims = {
            let tokens = self.tokens.read().map_err(|_| AccessError::AuthenticationRequired)?;
            tokens.get(token).cloned()
        };
        match claims {
            Some(claims) => claims.into_context(now),
            None => {
                tracing::debug!("unknown token");
                Err(AccessError::AuthenticationRequired)
            }
        }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn verify_token(&self, token: &str) -> Result<UserContext, AccessError> {
        self.verify_token_at(token, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use projectgate_core::UserId;

    fn claims(superuser: bool) -> IdentityClaims {
        let now = Utc::now();
        IdentityClaims {
            sub: UserId::new(),
            is_platform_superuser: superuser,
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn issued_token_verifies() {
        let provider = StaticIdentityProvider::new();
        let claims = claims(true);
        let sub = claims.sub;
        provider.issue("t-1", claims);

        let ctx = provider.verify_token("t-1").unwrap();
        assert_eq!(ctx.user_id(), sub);
        assert!(ctx.is_platform_superuser());
    }

    #[test]
    fn unknown_or_revoked_token_requires_authentication() {
        let provider = StaticIdentityProvider::new();
        provider.issue("t-1", claims(false));
        assert!(provider.revoke("t-1"));

        assert_eq!(provider.verify_token("t-1"), Err(AccessError::AuthenticationRequired));
        assert_eq!(provider.verify_token("nope"), Err(AccessError::AuthenticationRequired));
    }

    #[test]
    fn expired_token_is_rejected() {
        let provider = StaticIdentityProvider::new();
        provider.issue("t-1", claims(false));

        let later = Utc::now() + Duration::hours(1);
        assert_eq!(
            provider.verify_token_at("t-1", later),
            Err(AccessError::AuthenticationRequired)
        );
    }
}
