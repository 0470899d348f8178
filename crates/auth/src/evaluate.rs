//! Pure rule evaluation.
//!
//! [`evaluate`] takes everything it needs as arguments and performs no IO.
//! Clauses run in a fixed order; the first clause that decides wins:
//!
//! 1. global override (allow, or deny when exclusive)
//! 2. tenancy precondition (no effective access → deny)
//! 3. ownership
//! 4. status override
//! 5. role set (or counterpart split)
//!
//! Nothing allows → deny listing the clauses that were evaluated and failed.

use serde::Serialize;

use crate::decision::{Clause, ClauseOutcome, Decision, DecisionReason, RuleId, TraceStep};
use crate::effective::{AccessGap, EffectiveAccess};
use crate::identity::UserContext;
use crate::resource::ResourceInstance;
use crate::rules::{OverrideMode, RuleSpec};

/// A decision plus the clause-by-clause trail that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub decision: Decision,
    pub steps: Vec<TraceStep>,
}

struct Recorder {
    rule: RuleId,
    steps: Vec<TraceStep>,
}

impl Recorder {
    fn record(&mut self, clause: Clause, outcome: ClauseOutcome, detail: impl Into<String>) {
        self.steps.push(TraceStep::new(clause, outcome, detail));
    }

    fn allow(self, reason: DecisionReason) -> Evaluation {
        let decision = Decision::allow(self.rule, reason);
        self.finish(decision)
    }

    fn deny(self, reason: DecisionReason) -> Evaluation {
        let decision = Decision::deny(self.rule, reason);
        self.finish(decision)
    }

    fn finish(mut self, decision: Decision) -> Evaluation {
        for clause in Clause::ALL {
            if !self.steps.iter().any(|s| s.clause == clause) {
                self.steps.push(TraceStep::new(clause, ClauseOutcome::Skipped, "not reached"));
            }
        }
        Evaluation {
            decision,
            steps: self.steps,
        }
    }

    fn failed(&self) -> Vec<Clause> {
        self.steps
            .iter()
            .filter(|s| s.outcome == ClauseOutcome::Failed)
            .map(|s| s.clause)
            .collect()
    }
}

pub fn evaluate(
    spec: &RuleSpec,
    ctx: &UserContext,
    instance: &ResourceInstance,
    access: &EffectiveAccess,
) -> Evaluation {
    let mut rec = Recorder {
        rule: spec.id(),
        steps: Vec::with_capacity(Clause::ALL.len()),
    };
    let user = ctx.user_id();

    match spec.global_override {
        None => rec.record(Clause::GlobalOverride, ClauseOutcome::NotApplicable, "no override"),
        Some(o) if ctx.platform_role().satisfies(o.requires) => {
            rec.record(
                Clause::GlobalOverride,
                ClauseOutcome::Allowed,
                format!("platform role {} satisfies {}", ctx.platform_role(), o.requires),
            );
            return rec.allow(DecisionReason::GlobalOverride);
        }
        Some(o) if o.mode == OverrideMode::Exclusive => {
            rec.record(
                Clause::GlobalOverride,
                ClauseOutcome::Denied,
                format!("exclusive to platform role {}", o.requires),
            );
            return rec.deny(DecisionReason::GlobalRoleRequired);
        }
        Some(o) => rec.record(
            Clause::GlobalOverride,
            ClauseOutcome::Failed,
            format!("platform role {} does not satisfy {}", ctx.platform_role(), o.requires),
        ),
    }

    if !access.present {
        let gap = access.gap.unwrap_or(AccessGap::NoOrgMembership);
        rec.record(Clause::Tenancy, ClauseOutcome::Denied, gap.to_string());
        return rec.deny(DecisionReason::NoTenancyAccess { gap });
    }
    rec.record(Clause::Tenancy, ClauseOutcome::Passed, describe_access(access));

    match &spec.ownership {
        None => rec.record(Clause::Ownership, ClauseOutcome::NotApplicable, "no ownership clause"),
        Some(o) => match instance.owner(&o.field) {
            Some(owner) if owner == user => match o.roles.matching(access) {
                Some(role) => {
                    rec.record(
                        Clause::Ownership,
                        ClauseOutcome::Allowed,
                        format!("owner via {} with {role}", o.field),
                    );
                    return rec.allow(DecisionReason::Ownership { field: o.field.clone() });
                }
                None => rec.record(
                    Clause::Ownership,
                    ClauseOutcome::Failed,
                    format!("owner via {} but role is not self-service", o.field),
                ),
            },
            Some(_) => rec.record(
                Clause::Ownership,
                ClauseOutcome::Failed,
                format!("{} is another user", o.field),
            ),
            None => rec.record(Clause::Ownership, ClauseOutcome::Failed, format!("{} not set", o.field)),
        },
    }

    match &spec.status_override {
        None => rec.record(Clause::StatusOverride, ClauseOutcome::NotApplicable, "no status clause"),
        Some(s) => {
            let owner_ok = s
                .ownership_field
                .as_deref()
                .is_none_or(|field| instance.owner(field) == Some(user));

            match &instance.status {
                None => rec.record(Clause::StatusOverride, ClauseOutcome::Failed, "no status"),
                Some(status) if !s.statuses.contains(status) => rec.record(
                    Clause::StatusOverride,
                    ClauseOutcome::Failed,
                    format!("status {status} not eligible"),
                ),
                Some(_) if !owner_ok => rec.record(
                    Clause::StatusOverride,
                    ClauseOutcome::Failed,
                    format!(
                        "{} is not the caller",
                        s.ownership_field.as_deref().unwrap_or_default()
                    ),
                ),
                Some(status) => match s.roles.matching(access) {
                    Some(role) => {
                        rec.record(
                            Clause::StatusOverride,
                            ClauseOutcome::Allowed,
                            format!("status {status} with {role}"),
                        );
                        return rec.allow(DecisionReason::StatusOverride { status: status.clone() });
                    }
                    None => rec.record(
                        Clause::StatusOverride,
                        ClauseOutcome::Failed,
                        format!("status {status} but role not eligible"),
                    ),
                },
            }
        }
    }

    let (set, via) = match &spec.counterpart_split {
        None => (&spec.allowed_roles, String::new()),
        Some(split) => match instance.flag(&split.flag) {
            Some(value) => (split.select(value), format!(" ({}={value})", split.flag)),
            None => {
                rec.record(
                    Clause::RoleSet,
                    ClauseOutcome::Failed,
                    format!("flag {} missing", split.flag),
                );
                let evaluated = rec.failed();
                return rec.deny(DecisionReason::NoMatchingClause { evaluated });
            }
        },
    };

    if let Some(elevation) = access.elevation {
        rec.record(Clause::RoleSet, ClauseOutcome::Allowed, format!("elevated: {elevation}{via}"));
        return rec.allow(DecisionReason::Elevated { elevation });
    }
    if let Some(role) = set.matching(access) {
        rec.record(Clause::RoleSet, ClauseOutcome::Allowed, format!("{role} in allowed set{via}"));
        return rec.allow(DecisionReason::RoleGranted { role });
    }
    rec.record(Clause::RoleSet, ClauseOutcome::Failed, format!("no allowed role{via}"));

    let evaluated = rec.failed();
    rec.deny(DecisionReason::NoMatchingClause { evaluated })
}

fn describe_access(access: &EffectiveAccess) -> String {
    if let Some(elevation) = access.elevation {
        return format!("elevated: {elevation}");
    }
    match (access.org_role, access.project_role) {
        (Some(org), Some(project)) => format!("org role {org}, project role {project}"),
        (Some(org), None) => format!("org role {org}"),
        (None, Some(project)) => format!("project role {project}"),
        (None, None) => "present".to_string(),
    }
}
