//! `projectgate-auth`: row-level authorization engine.
//!
//! Answers "can user U perform action A on resource R" for every business
//! entity of a multi-tenant project-management application. The crate is
//! storage-agnostic: membership and resource rows are reached through the
//! [`MembershipBackend`] and [`ResourceLookup`] traits, implemented in
//! `projectgate-infra`.
//!
//! Decision path:
//!
//! ```text
//! PolicyEngine::can
//!   ├─ RuleTable::lookup            (resource type, action) → RuleSpec
//!   ├─ ScopeResolver::resolve       resource → organisation | project
//!   ├─ EffectiveAccessResolver      trusted membership reads (+ DecisionCache)
//!   └─ evaluate                     pure clause evaluation → Decision + trace
//! ```

pub mod audit;
pub mod cache;
pub mod decision;
pub mod effective;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod identity;
pub mod limits;
pub mod membership;
pub mod resolver;
pub mod resource;
pub mod roles;
pub mod rules;

pub use audit::{AuditRecord, AuditSink, NoopAuditSink};
pub use cache::{CacheStats, DecisionCache};
pub use decision::{Clause, ClauseOutcome, Decision, DecisionReason, GrantedRole, RuleId, Trace, TraceStep};
pub use effective::{AccessGap, EffectiveAccess, EffectiveAccessResolver, Elevation, Scope};
pub use engine::PolicyEngine;
pub use error::{AccessError, StoreError};
pub use evaluate::{Evaluation, evaluate};
pub use identity::{IdentityClaims, IdentityProvider, TokenValidationError, UserContext, validate_claims};
pub use limits::{LimitChecker, LimitStatus, LimitType};
pub use membership::{
    MembershipBackend, MembershipError, MembershipStore, OrgMembership, ProjectMembership,
    RestoreGrants,
};
pub use resolver::{MAX_PARENT_HOPS, ResolvedResource, ResourceLookup, ScopeResolver};
pub use resource::{Action, ResourceInstance, ResourceKey, ResourceRef, ResourceTarget, ResourceType, Status, Tenancy};
pub use roles::{Counterpart, OrgRole, PlatformRole, ProjectRole, RoleCatalog, RoleCatalogConfig, RoleCatalogError};
pub use rules::{
    CounterpartSplit, GlobalRoleOverride, OverrideMode, OwnershipClause, RoleSet, RuleSpec, RuleTable,
    RuleTableDocument, RuleTableError, StatusOverride,
};
