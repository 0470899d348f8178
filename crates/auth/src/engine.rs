//! The policy engine: the only entry point callers use to ask for a decision.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::audit::{AuditRecord, AuditSink, NoopAuditSink};
use crate::cache::DecisionCache;
use crate::decision::{Decision, Trace};
use crate::effective::{EffectiveAccess, EffectiveAccessResolver};
use crate::error::AccessError;
use crate::evaluate::{Evaluation, evaluate};
use crate::identity::UserContext;
use crate::resolver::{ResolvedResource, ScopeResolver};
use crate::resource::{Action, ResourceRef};
use crate::roles::RoleCatalog;
use crate::rules::RuleTable;

struct Run {
    resolved: ResolvedResource,
    access: EffectiveAccess,
    evaluation: Evaluation,
}

pub struct PolicyEngine {
    rules: Arc<RuleTable>,
    scopes: ScopeResolver,
    access: EffectiveAccessResolver,
    audit: Arc<dyn AuditSink>,
}

impl PolicyEngine {
    pub fn new(rules: Arc<RuleTable>, scopes: ScopeResolver, access: EffectiveAccessResolver) -> Self {
        Self {
            rules,
            scopes,
            access,
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn catalog(&self) -> &RoleCatalog {
        self.access.catalog()
    }

    pub fn cache(&self) -> Option<&Arc<DecisionCache>> {
        self.access.cache()
    }

    /// Decide whether `ctx` may perform `action` on `target`.
    ///
    /// Ordinary denial is `Ok` with `allowed == false`. Errors are reserved
    /// for configuration defects, unresolvable resources and store failures.
    /// Every outcome, errors included, is handed to the audit sink.
    #[instrument(
        level = "debug",
        skip(self, ctx, target),
        fields(user_id = %ctx.user_id(), action = %action, resource_type = %target.resource_type())
    )]
    pub fn can(&self, ctx: &UserContext, action: Action, target: &ResourceRef) -> Result<Decision, AccessError> {
        match self.run(ctx, action, target) {
            Ok(run) => {
                let decision = run.evaluation.decision;
                tracing::debug!(
                    allowed = decision.allowed,
                    rule = %decision.rule,
                    reason = %decision.reason,
                    "access decision"
                );
                self.audit.record(AuditRecord::from_decision(
                    ctx,
                    action,
                    target,
                    run.resolved.scope,
                    &decision,
                    Utc::now(),
                ));
                Ok(decision)
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(error = %err, "access decision failed");
                } else {
                    tracing::warn!(error = %err, kind = err.kind(), "access decision refused");
                }
                self.audit
                    .record(AuditRecord::from_error(ctx, action, target, &err, Utc::now()));
                Err(err)
            }
        }
    }

    /// Same evaluation as [`can`](Self::can), returning the full trace.
    /// Not audited.
    #[instrument(
        level = "debug",
        skip(self, ctx, target),
        fields(user_id = %ctx.user_id(), action = %action, resource_type = %target.resource_type())
    )]
    pub fn explain(&self, ctx: &UserContext, action: Action, target: &ResourceRef) -> Result<Trace, AccessError> {
        let Run {
            resolved,
            access,
            evaluation,
        } = self.run(ctx, action, target)?;

        Ok(Trace {
            rule: evaluation.decision.rule,
            user_id: ctx.user_id(),
            action,
            resource_type: target.resource_type(),
            resource_id: resolved.instance.id,
            scope: resolved.scope,
            hops: resolved.hops,
            access,
            steps: evaluation.steps,
            decision: evaluation.decision,
        })
    }

    /// [`can`](Self::can) with denial turned into [`AccessError::Denied`].
    pub fn authorize(&self, ctx: &UserContext, action: Action, target: &ResourceRef) -> Result<Decision, AccessError> {
        let decision = self.can(ctx, action, target)?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(AccessError::Denied(decision.reason))
        }
    }

    fn run(&self, ctx: &UserContext, action: Action, target: &ResourceRef) -> Result<Run, AccessError> {
        // Rule first: an unknown pair is reported before any store is touched.
        let spec = self.rules.lookup(target.resource_type(), action)?;
        let resolved = self.scopes.resolve(target)?;
        let access = self.access.resolve_effective(ctx, resolved.scope)?;
        let evaluation = evaluate(spec, ctx, &resolved.instance, &access);
        Ok(Run {
            resolved,
            access,
            evaluation,
        })
    }
}
