//! Declarative rule table: (resource type, action) → [`RuleSpec`].
//!
//! Rules are data. Adding a resource type means adding rows to the JSON
//! table, not new control flow. The table is validated once at load time
//! and is immutable afterwards.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decision::{GrantedRole, RuleId};
use crate::effective::EffectiveAccess;
use crate::error::AccessError;
use crate::resource::{Action, ResourceType, Status};
use crate::roles::{OrgRole, PlatformRole, ProjectRole, RoleCatalog};

const BUILTIN_RULES: &str = include_str!("../config/rules.json");

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleTableError {
    #[error("invalid rule table: {0}")]
    Json(String),

    #[error("duplicate rule for {0}")]
    Duplicate(RuleId),

    #[error("no rule for defined pair {0}")]
    MissingRule(RuleId),

    #[error("rule {0} targets an action the resource type does not define")]
    UndefinedAction(RuleId),

    #[error("rule {rule} references role '{role}' which is not enabled")]
    DisabledRole { rule: RuleId, role: String },

    #[error("rule {rule} is inconsistent: {detail}")]
    Conflict { rule: RuleId, detail: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Clauses
// ─────────────────────────────────────────────────────────────────────────────

/// Set of organisation and project roles.
///
/// Organisation roles match the caller's organisation role; project roles
/// match the project grant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleSet {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub org: BTreeSet<OrgRole>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub project: BTreeSet<ProjectRole>,
}

impl RoleSet {
    pub fn project(roles: impl IntoIterator<Item = ProjectRole>) -> Self {
        Self {
            org: BTreeSet::new(),
            project: roles.into_iter().collect(),
        }
    }

    pub fn org(roles: impl IntoIterator<Item = OrgRole>) -> Self {
        Self {
            org: roles.into_iter().collect(),
            project: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.org.is_empty() && self.project.is_empty()
    }

    /// The caller's role that is a member of this set, ignoring elevation.
    pub fn matching(&self, access: &EffectiveAccess) -> Option<GrantedRole> {
        if let Some(role) = access.project_role.filter(|r| self.project.contains(r)) {
            return Some(GrantedRole::Project(role));
        }
        access
            .org_role
            .filter(|r| self.org.contains(r))
            .map(GrantedRole::Org)
    }

    fn first_disabled(&self, catalog: &RoleCatalog) -> Option<String> {
        self.org
            .iter()
            .find(|r| !catalog.is_org_role_enabled(**r))
            .map(|r| format!("org:{r}"))
            .or_else(|| {
                self.project
                    .iter()
                    .find(|r| !catalog.is_project_role_enabled(**r))
                    .map(|r| format!("project:{r}"))
            })
    }
}

/// Owner of the row may act if their role is in the self-service subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OwnershipClause {
    pub field: String,
    pub roles: RoleSet,
}

/// Allow while the row is in one of `statuses`, optionally only for its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusOverride {
    pub statuses: BTreeSet<Status>,
    #[serde(default)]
    pub ownership_field: Option<String>,
    pub roles: RoleSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideMode {
    /// Callers without the platform role are denied outright.
    Exclusive,
    /// Callers without the platform role fall through to the other clauses.
    Grant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalRoleOverride {
    pub requires: PlatformRole,
    pub mode: OverrideMode,
}

/// Role set chosen by a boolean flag on the row (e.g. which side pays).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterpartSplit {
    pub flag: String,
    pub when_true: RoleSet,
    pub when_false: RoleSet,
}

impl CounterpartSplit {
    pub fn select(&self, value: bool) -> &RoleSet {
        if value { &self.when_true } else { &self.when_false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub resource_type: ResourceType,
    pub action: Action,

    #[serde(default)]
    pub allowed_roles: RoleSet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_split: Option<CounterpartSplit>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership: Option<OwnershipClause>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_override: Option<StatusOverride>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_override: Option<GlobalRoleOverride>,
}

impl RuleSpec {
    pub fn new(resource_type: ResourceType, action: Action) -> Self {
        Self {
            resource_type,
            action,
            allowed_roles: RoleSet::default(),
            counterpart_split: None,
            ownership: None,
            status_override: None,
            global_override: None,
        }
    }

    pub fn id(&self) -> RuleId {
        RuleId::new(self.resource_type, self.action)
    }

    pub fn allowing(mut self, roles: RoleSet) -> Self {
        self.allowed_roles = roles;
        self
    }

    pub fn with_ownership(mut self, clause: OwnershipClause) -> Self {
        self.ownership = Some(clause);
        self
    }

    pub fn with_status_override(mut self, clause: StatusOverride) -> Self {
        self.status_override = Some(clause);
        self
    }

    pub fn with_global_override(mut self, clause: GlobalRoleOverride) -> Self {
        self.global_override = Some(clause);
        self
    }

    pub fn with_counterpart_split(mut self, clause: CounterpartSplit) -> Self {
        self.counterpart_split = Some(clause);
        self
    }

    fn role_sets(&self) -> Vec<&RoleSet> {
        let mut sets = vec![&self.allowed_roles];
        if let Some(split) = &self.counterpart_split {
            sets.push(&split.when_true);
            sets.push(&split.when_false);
        }
        if let Some(o) = &self.ownership {
            sets.push(&o.roles);
        }
        if let Some(s) = &self.status_override {
            sets.push(&s.roles);
        }
        sets
    }

    fn validate(&self, catalog: &RoleCatalog) -> Result<(), RuleTableError> {
        let rule = self.id();

        if !self.resource_type.defines(self.action) {
            return Err(RuleTableError::UndefinedAction(rule));
        }

        if self.counterpart_split.is_some() && !self.allowed_roles.is_empty() {
            return Err(RuleTableError::Conflict {
                rule,
                detail: "allowed_roles and counterpart_split are mutually exclusive".to_string(),
            });
        }

        if let Some(s) = &self.status_override {
            if s.statuses.is_empty() {
                return Err(RuleTableError::Conflict {
                    rule,
                    detail: "status_override needs at least one status".to_string(),
                });
            }
        }

        for set in self.role_sets() {
            if let Some(role) = set.first_disabled(catalog) {
                return Err(RuleTableError::DisabledRole { rule, role });
            }
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

/// Serialized form of the rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleTableDocument {
    pub version: u32,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    version: u32,
    rules: BTreeMap<RuleId, RuleSpec>,
}

impl RuleTable {
    /// The bundled default table validated against `catalog`.
    pub fn builtin(catalog: &RoleCatalog) -> Result<Self, RuleTableError> {
        Self::from_json(BUILTIN_RULES, catalog)
    }

    pub fn from_json(json: &str, catalog: &RoleCatalog) -> Result<Self, RuleTableError> {
        let document: RuleTableDocument =
            serde_json::from_str(json).map_err(|e| RuleTableError::Json(e.to_string()))?;
        Self::from_document(document, catalog)
    }

    /// Validate and index a document. The table must be total over every
    /// pair [`ResourceType::actions`] defines, and nothing else.
    pub fn from_document(document: RuleTableDocument, catalog: &RoleCatalog) -> Result<Self, RuleTableError> {
        let mut rules = BTreeMap::new();
        for spec in document.rules {
            spec.validate(catalog)?;
            let id = spec.id();
            if rules.insert(id, spec).is_some() {
                return Err(RuleTableError::Duplicate(id));
            }
        }

        for resource_type in ResourceType::ALL {
            for action in resource_type.actions() {
                let id = RuleId::new(*resource_type, *action);
                if !rules.contains_key(&id) {
                    return Err(RuleTableError::MissingRule(id));
                }
            }
        }

        tracing::debug!(version = document.version, rules = rules.len(), "rule table loaded");
        Ok(Self {
            version: document.version,
            rules,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, resource_type: ResourceType, action: Action) -> Option<&RuleSpec> {
        self.rules.get(&RuleId::new(resource_type, action))
    }

    /// Like [`get`](Self::get) but an unmatched pair is a configuration error.
    pub fn lookup(&self, resource_type: ResourceType, action: Action) -> Result<&RuleSpec, AccessError> {
        self.get(resource_type, action)
            .ok_or(AccessError::UnknownRule {
                resource_type,
                action,
            })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleSpec> {
        self.rules.values()
    }

    pub fn to_document(&self) -> RuleTableDocument {
        RuleTableDocument {
            version: self.version,
            rules: self.rules.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effective::Scope;
    use crate::roles::RoleCatalogConfig;
    use projectgate_core::{OrganisationId, ProjectId};

    fn builtin_document() -> RuleTableDocument {
        serde_json::from_str(BUILTIN_RULES).unwrap()
    }

    #[test]
    fn builtin_table_is_total() {
        let table = RuleTable::builtin(&RoleCatalog::default()).unwrap();
        let defined: usize = ResourceType::ALL.iter().map(|t| t.actions().len()).sum();
        assert_eq!(table.len(), defined);
    }

    #[test]
    fn missing_pair_is_rejected() {
        let mut doc = builtin_document();
        doc.rules
            .retain(|r| !(r.resource_type == ResourceType::Timesheet && r.action == Action::Submit));

        let err = RuleTable::from_document(doc, &RoleCatalog::default()).unwrap_err();
        assert_eq!(
            err,
            RuleTableError::MissingRule(RuleId::new(ResourceType::Timesheet, Action::Submit))
        );
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let mut doc = builtin_document();
        let first = doc.rules[0].clone();
        doc.rules.push(first.clone());

        let err = RuleTable::from_document(doc, &RoleCatalog::default()).unwrap_err();
        assert_eq!(err, RuleTableError::Duplicate(first.id()));
    }

    #[test]
    fn undefined_action_is_rejected() {
        let mut doc = builtin_document();
        doc.rules.push(RuleSpec::new(ResourceType::Organisation, Action::Approve));

        let err = RuleTable::from_document(doc, &RoleCatalog::default()).unwrap_err();
        assert!(matches!(err, RuleTableError::UndefinedAction(_)));
    }

    #[test]
    fn disabled_role_is_rejected() {
        let mut doc = builtin_document();
        doc.rules[0].allowed_roles.project.insert(ProjectRole::Admin);

        let err = RuleTable::from_document(doc, &RoleCatalog::default()).unwrap_err();
        assert!(matches!(err, RuleTableError::DisabledRole { role, .. } if role == "project:admin"));
    }

    #[test]
    fn builtin_avoids_org_supplier_pm() {
        // A catalog with only the two-value organisation taxonomy must still
        // accept the bundled table.
        let mut config = RoleCatalogConfig::default();
        config.org_roles.retain(|r| r.role != OrgRole::SupplierPm);
        let catalog = RoleCatalog::from_config(config).unwrap();

        assert!(RuleTable::builtin(&catalog).is_ok());
    }

    #[test]
    fn split_and_allowed_roles_conflict() {
        let mut doc = builtin_document();
        let validate = doc
            .rules
            .iter_mut()
            .find(|r| r.resource_type == ResourceType::Expense && r.action == Action::Validate)
            .unwrap();
        validate.allowed_roles = RoleSet::project([ProjectRole::SupplierPm]);

        let err = RuleTable::from_document(doc, &RoleCatalog::default()).unwrap_err();
        assert!(matches!(err, RuleTableError::Conflict { .. }));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let json = r#"{ "version": 1, "rules": [
            { "resource_type": "project", "action": "read", "allowed_rolez": {} }
        ] }"#;
        assert!(matches!(
            RuleTable::from_json(json, &RoleCatalog::default()),
            Err(RuleTableError::Json(_))
        ));
    }

    #[test]
    fn lookup_of_unknown_pair_is_configuration_error() {
        let table = RuleTable::builtin(&RoleCatalog::default()).unwrap();
        let err = table.lookup(ResourceType::Organisation, Action::Approve).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn document_round_trips_through_json() {
        let table = RuleTable::builtin(&RoleCatalog::default()).unwrap();
        let json = serde_json::to_string(&table.to_document()).unwrap();
        let reloaded = RuleTable::from_json(&json, &RoleCatalog::default()).unwrap();
        assert_eq!(table, reloaded);
    }

    #[test]
    fn role_set_matching_ignores_elevation() {
        let scope = Scope::Project(ProjectId::new());
        let org = OrganisationId::new();

        let elevated = EffectiveAccess::elevated_by_org(scope, org, OrgRole::OrgAdmin);
        assert_eq!(RoleSet::default().matching(&elevated), None);
        assert_eq!(
            RoleSet::org([OrgRole::OrgAdmin]).matching(&elevated),
            Some(GrantedRole::Org(OrgRole::OrgAdmin))
        );

        let viewer = EffectiveAccess::granted(scope, org, OrgRole::OrgMember, Some(ProjectRole::Viewer));
        assert_eq!(
            RoleSet::project([ProjectRole::Viewer]).matching(&viewer),
            Some(GrantedRole::Project(ProjectRole::Viewer))
        );
    }
}
