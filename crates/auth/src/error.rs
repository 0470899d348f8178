//! Error taxonomy of the engine.
//!
//! Ordinary denials are values ([`crate::Decision`] with `allowed == false`),
//! not errors. [`AccessError::Denied`] exists only for callers that opt into
//! [`crate::PolicyEngine::authorize`].

use projectgate_core::ResourceId;
use thiserror::Error;

use crate::decision::DecisionReason;
use crate::resource::{Action, ResourceType};

/// Failure reaching a backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Normal denial, surfaced as an error by `authorize`.
    #[error("access denied: {0}")]
    Denied(DecisionReason),

    /// No verified identity.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The (resource type, action) pair has no rule. Configuration defect.
    #[error("no rule configured for {resource_type}.{action}")]
    UnknownRule {
        resource_type: ResourceType,
        action: Action,
    },

    /// Resolver depth exceeded, parent chain broken, or no tenant reference.
    #[error("cannot resolve tenant of {resource_type} {id:?}: {detail}")]
    AmbiguousResource {
        resource_type: ResourceType,
        id: Option<ResourceId>,
        detail: String,
    },

    /// Backing store failure. Retryable.
    #[error("membership store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AccessError {
    pub fn ambiguous(
        resource_type: ResourceType,
        id: Option<ResourceId>,
        detail: impl Into<String>,
    ) -> Self {
        Self::AmbiguousResource {
            resource_type,
            id,
            detail: detail.into(),
        }
    }

    /// Only infrastructure failures may be retried; configuration and
    /// resolution errors fail closed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Whether this error represents a configuration defect.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownRule { .. } | Self::AmbiguousResource { .. })
    }

    /// Text safe to show to an end user.
    ///
    /// Denials carry their reason; every other error collapses to a generic
    /// message so rule identifiers never leak.
    pub fn public_message(&self) -> String {
        match self {
            Self::Denied(reason) => format!("Access denied: {reason}"),
            Self::AuthenticationRequired => "Authentication required".to_string(),
            Self::StoreUnavailable(_) => "Service temporarily unavailable, please retry".to_string(),
            Self::UnknownRule { .. } | Self::AmbiguousResource { .. } => {
                "The request could not be processed".to_string()
            }
        }
    }

    /// Short label used in audit records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Denied(_) => "denied",
            Self::AuthenticationRequired => "authentication_required",
            Self::UnknownRule { .. } => "unknown_rule",
            Self::AmbiguousResource { .. } => "ambiguous_resource",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<StoreError> for AccessError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effective::AccessGap;

    #[test]
    fn only_store_errors_are_retryable() {
        assert!(AccessError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!AccessError::AuthenticationRequired.is_retryable());
        assert!(
            !AccessError::UnknownRule {
                resource_type: ResourceType::Timesheet,
                action: Action::Approve,
            }
            .is_retryable()
        );
    }

    #[test]
    fn public_message_hides_rule_identifiers() {
        let err = AccessError::UnknownRule {
            resource_type: ResourceType::Timesheet,
            action: Action::Approve,
        };
        let msg = err.public_message();
        assert!(!msg.contains("timesheet"));
        assert!(!msg.contains("approve"));
        assert!(err.to_string().contains("timesheet.approve"));
    }

    #[test]
    fn public_message_shows_denial_reason() {
        let err = AccessError::Denied(DecisionReason::NoTenancyAccess {
            gap: AccessGap::NoProjectGrant,
        });
        assert_eq!(err.public_message(), "Access denied: no project grant");
    }

    #[test]
    fn store_error_maps_to_store_unavailable() {
        let err: AccessError = StoreError::unavailable("connection reset").into();
        assert_eq!(err, AccessError::StoreUnavailable("connection reset".into()));
        assert_eq!(err.kind(), "store_unavailable");
    }
}
