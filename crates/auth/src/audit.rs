//! Append-only audit records of access decisions.
//!
//! The engine hands every `can` outcome to an [`AuditSink`]. Sinks must not
//! block the decision path: buffering or fire-and-forget only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use projectgate_core::{ResourceId, UserId};

use crate::decision::{Decision, RuleId};
use crate::effective::Scope;
use crate::error::AccessError;
use crate::identity::UserContext;
use crate::resource::{Action, ResourceRef, ResourceType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub superuser: bool,
    pub action: Action,
    pub resource_type: ResourceType,
    pub resource_id: Option<ResourceId>,
    pub scope: Option<Scope>,
    pub allowed: bool,
    pub reason: String,
    pub matched_rule: Option<RuleId>,
    /// Set when the decision failed with an error; such attempts are recorded
    /// as denied.
    pub error_kind: Option<String>,
}

impl AuditRecord {
    pub fn from_decision(
        ctx: &UserContext,
        action: Action,
        target: &ResourceRef,
        scope: Scope,
        decision: &Decision,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            user_id: ctx.user_id(),
            superuser: ctx.is_platform_superuser(),
            action,
            resource_type: target.resource_type(),
            resource_id: target.id(),
            scope: Some(scope),
            allowed: decision.allowed,
            reason: decision.reason.to_string(),
            matched_rule: Some(decision.rule),
            error_kind: None,
        }
    }

    pub fn from_error(
        ctx: &UserContext,
        action: Action,
        target: &ResourceRef,
        error: &AccessError,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            user_id: ctx.user_id(),
            superuser: ctx.is_platform_superuser(),
            action,
            resource_type: target.resource_type(),
            resource_id: target.id(),
            scope: None,
            allowed: false,
            reason: error.to_string(),
            matched_rule: None,
            error_kind: Some(error.kind().to_string()),
        }
    }
}

pub trait AuditSink: Send + Sync {
    /// Must return promptly; never blocks on IO.
    fn record(&self, record: AuditRecord);
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, record: AuditRecord) {
        (**self).record(record)
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: AuditRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionReason;
    use crate::effective::AccessGap;
    use projectgate_core::ProjectId;

    #[test]
    fn denied_decision_keeps_rule_and_reason() {
        let ctx = UserContext::standard(UserId::new());
        let project = ProjectId::new();
        let target = ResourceRef::project(project);
        let decision = Decision::deny(
            RuleId::new(ResourceType::Project, Action::Read),
            DecisionReason::NoTenancyAccess {
                gap: AccessGap::NoProjectGrant,
            },
        );

        let record =
            AuditRecord::from_decision(&ctx, Action::Read, &target, Scope::Project(project), &decision, Utc::now());

        assert!(!record.allowed);
        assert_eq!(record.reason, "no project grant");
        assert_eq!(record.matched_rule.map(|r| r.to_string()).as_deref(), Some("project.read"));
        assert_eq!(record.error_kind, None);
    }

    #[test]
    fn errors_are_recorded_as_denied() {
        let ctx = UserContext::standard(UserId::new());
        let target = ResourceRef::existing(ResourceType::Timesheet, ResourceId::new());
        let err = AccessError::StoreUnavailable("timeout".into());

        let record = AuditRecord::from_error(&ctx, Action::Update, &target, &err, Utc::now());

        assert!(!record.allowed);
        assert_eq!(record.error_kind.as_deref(), Some("store_unavailable"));
        assert_eq!(record.scope, None);
    }

    #[test]
    fn record_serializes_to_json() {
        let ctx = UserContext::standard(UserId::new());
        let target = ResourceRef::existing(ResourceType::Expense, ResourceId::new());
        let record = AuditRecord::from_error(&ctx, Action::Read, &target, &AccessError::AuthenticationRequired, Utc::now());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["resource_type"], "expense");
        assert_eq!(json["allowed"], false);
    }
}
