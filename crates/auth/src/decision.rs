//! Decision values and the evaluation trace behind them.

use serde::{Deserialize, Serialize};

use projectgate_core::{ResourceId, UserId};

use crate::effective::{AccessGap, EffectiveAccess, Elevation, Scope};
use crate::resource::{Action, ResourceType, Status};
use crate::roles::{OrgRole, ProjectRole};

/// Identifies the rule a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId {
    pub resource_type: ResourceType,
    pub action: Action,
}

impl RuleId {
    pub fn new(resource_type: ResourceType, action: Action) -> Self {
        Self {
            resource_type,
            action,
        }
    }
}

impl core::fmt::Display for RuleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.action)
    }
}

/// Clauses in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    GlobalOverride,
    Tenancy,
    Ownership,
    StatusOverride,
    RoleSet,
}

impl Clause {
    pub const ALL: [Clause; 5] = [
        Clause::GlobalOverride,
        Clause::Tenancy,
        Clause::Ownership,
        Clause::StatusOverride,
        Clause::RoleSet,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseOutcome {
    /// Clause decided: allow.
    Allowed,
    /// Clause decided: deny.
    Denied,
    /// Precondition held; evaluation continued.
    Passed,
    /// Clause was evaluated and did not allow.
    Failed,
    /// Rule has no such clause.
    NotApplicable,
    /// Never reached because an earlier clause decided.
    Skipped,
}

/// One line of the evaluation trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub clause: Clause,
    pub outcome: ClauseOutcome,
    pub detail: String,
}

impl TraceStep {
    pub fn new(clause: Clause, outcome: ClauseOutcome, detail: impl Into<String>) -> Self {
        Self {
            clause,
            outcome,
            detail: detail.into(),
        }
    }
}

/// Role that satisfied a role-set clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", content = "role", rename_all = "snake_case")]
pub enum GrantedRole {
    Org(OrgRole),
    Project(ProjectRole),
}

impl core::fmt::Display for GrantedRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GrantedRole::Org(role) => write!(f, "organisation role {role}"),
            GrantedRole::Project(role) => write!(f, "project role {role}"),
        }
    }
}

/// Why a decision came out the way it did.
///
/// `Display` output is safe to show to end users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DecisionReason {
    /// Platform role satisfied the global override.
    GlobalOverride,
    /// Exclusive global override not satisfied.
    GlobalRoleRequired,
    NoTenancyAccess { gap: AccessGap },
    Ownership { field: String },
    StatusOverride { status: Status },
    RoleGranted { role: GrantedRole },
    Elevated { elevation: Elevation },
    NoMatchingClause { evaluated: Vec<Clause> },
}

impl core::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecisionReason::GlobalOverride => f.write_str("platform role override"),
            DecisionReason::GlobalRoleRequired => f.write_str("restricted to platform administrators"),
            DecisionReason::NoTenancyAccess { gap } => write!(f, "{gap}"),
            DecisionReason::Ownership { .. } => f.write_str("owner of the resource"),
            DecisionReason::StatusOverride { status } => write!(f, "owner while status is {status}"),
            DecisionReason::RoleGranted { role } => write!(f, "granted by {role}"),
            DecisionReason::Elevated { elevation } => write!(f, "elevated access ({elevation})"),
            DecisionReason::NoMatchingClause { .. } => f.write_str("insufficient role for this action"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub rule: RuleId,
}

impl Decision {
    pub fn allow(rule: RuleId, reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
            rule,
        }
    }

    pub fn deny(rule: RuleId, reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
            rule,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Full evaluation trace returned by `explain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub rule: RuleId,
    pub user_id: UserId,
    pub action: Action,
    pub resource_type: ResourceType,
    pub resource_id: Option<ResourceId>,
    pub scope: Scope,
    /// Parent links followed to reach the scope.
    pub hops: u8,
    pub access: EffectiveAccess,
    pub steps: Vec<TraceStep>,
    pub decision: Decision,
}

impl Trace {
    pub fn step(&self, clause: Clause) -> Option<&TraceStep> {
        self.steps.iter().find(|s| s.clause == clause)
    }
}
