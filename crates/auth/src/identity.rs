//! Verified caller identity.
//!
//! Token issuance and signature verification belong to the external identity
//! provider. Once a token has been decoded, the engine only needs the user id
//! and the platform superuser flag, wrapped in an immutable [`UserContext`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use projectgate_core::UserId;

use crate::error::AccessError;
use crate::roles::PlatformRole;

/// Caller identity for one decision. Immutable for the engine's purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserContext {
    user_id: UserId,
    is_platform_superuser: bool,
}

impl UserContext {
    pub fn new(user_id: UserId, is_platform_superuser: bool) -> Self {
        Self {
            user_id,
            is_platform_superuser,
        }
    }

    pub fn standard(user_id: UserId) -> Self {
        Self::new(user_id, false)
    }

    pub fn superuser(user_id: UserId) -> Self {
        Self::new(user_id, true)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn is_platform_superuser(&self) -> bool {
        self.is_platform_superuser
    }

    pub fn platform_role(&self) -> PlatformRole {
        if self.is_platform_superuser {
            PlatformRole::Superuser
        } else {
            PlatformRole::Standard
        }
    }
}

/// Claims the identity provider hands over after verifying a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject.
    pub sub: UserId,

    #[serde(default)]
    pub is_platform_superuser: bool,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate the time window of decoded claims.
pub fn validate_claims(claims: &IdentityClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

impl IdentityClaims {
    /// Validate the claims and turn them into a [`UserContext`].
    pub fn into_context(self, now: DateTime<Utc>) -> Result<UserContext, AccessError> {
        validate_claims(&self, now).map_err(|e| {
            tracing::debug!(user_id = %self.sub, error = %e, "rejected identity claims");
            AccessError::AuthenticationRequired
        })?;
        Ok(UserContext::new(self.sub, self.is_platform_superuser))
    }
}

/// External identity provider (`VerifyToken`).
pub trait IdentityProvider: Send + Sync {
    /// Returns the verified caller or [`AccessError::AuthenticationRequired`].
    fn verify_token(&self, token: &str) -> Result<UserContext, AccessError>;
}
