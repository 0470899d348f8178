//! Resource model: the closed set of resource types, actions, and the
//! attributes the engine reads from a row.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use projectgate_core::{DomainError, OrganisationId, ProjectId, ResourceId, UserId};

/// How a resource type finds its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tenancy {
    /// Row carries an organisation id.
    Organisation,
    /// Row carries a project id.
    Project,
    /// Row is defined purely by its parent's project.
    Child(ResourceType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Organisation,
    OrganisationMembership,
    Project,
    ProjectMembership,
    Milestone,
    Deliverable,
    DeliverableKpi,
    Timesheet,
    Expense,
    Invoice,
    /// Third-party billing detail, restricted regardless of project role.
    PartnerInvoice,
    Variation,
    VariationMilestone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Submit,
    Validate,
    Approve,
}

use Action::{Approve, Create, Delete, Read, Submit, Update, Validate};

const CRUD: &[Action] = &[Read, Create, Update, Delete];

impl ResourceType {
    pub const ALL: &'static [ResourceType] = &[
        ResourceType::Organisation,
        ResourceType::OrganisationMembership,
        ResourceType::Project,
        ResourceType::ProjectMembership,
        ResourceType::Milestone,
        ResourceType::Deliverable,
        ResourceType::DeliverableKpi,
        ResourceType::Timesheet,
        ResourceType::Expense,
        ResourceType::Invoice,
        ResourceType::PartnerInvoice,
        ResourceType::Variation,
        ResourceType::VariationMilestone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Organisation => "organisation",
            ResourceType::OrganisationMembership => "organisation_membership",
            ResourceType::Project => "project",
            ResourceType::ProjectMembership => "project_membership",
            ResourceType::Milestone => "milestone",
            ResourceType::Deliverable => "deliverable",
            ResourceType::DeliverableKpi => "deliverable_kpi",
            ResourceType::Timesheet => "timesheet",
            ResourceType::Expense => "expense",
            ResourceType::Invoice => "invoice",
            ResourceType::PartnerInvoice => "partner_invoice",
            ResourceType::Variation => "variation",
            ResourceType::VariationMilestone => "variation_milestone",
        }
    }

    pub fn tenancy(&self) -> Tenancy {
        match self {
            ResourceType::Organisation | ResourceType::OrganisationMembership => Tenancy::Organisation,
            ResourceType::DeliverableKpi => Tenancy::Child(ResourceType::Deliverable),
            ResourceType::VariationMilestone => Tenancy::Child(ResourceType::Variation),
            _ => Tenancy::Project,
        }
    }

    /// Actions the application defines for this resource type. The rule table
    /// must cover exactly these pairs.
    pub fn actions(&self) -> &'static [Action] {
        match self {
            ResourceType::Organisation => &[Read, Update],
            ResourceType::Project => &[Read, Update, Delete],
            ResourceType::OrganisationMembership
            | ResourceType::ProjectMembership
            | ResourceType::DeliverableKpi
            | ResourceType::PartnerInvoice
            | ResourceType::VariationMilestone => CRUD,
            ResourceType::Milestone | ResourceType::Invoice => &[Read, Create, Update, Delete, Approve],
            ResourceType::Deliverable | ResourceType::Variation => {
                &[Read, Create, Update, Delete, Submit, Approve]
            }
            ResourceType::Timesheet | ResourceType::Expense => {
                &[Read, Create, Update, Delete, Submit, Validate]
            }
        }
    }

    pub fn defines(&self, action: Action) -> bool {
        self.actions().contains(&action)
    }
}

impl Action {
    pub const ALL: &'static [Action] = &[Read, Create, Update, Delete, Submit, Validate, Approve];

    pub fn as_str(&self) -> &'static str {
        match self {
            Read => "read",
            Create => "create",
            Update => "update",
            Delete => "delete",
            Submit => "submit",
            Validate => "validate",
            Approve => "approve",
        }
    }
}

impl core::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| DomainError::validation(format!("unknown resource type '{s}'")))
    }
}

impl FromStr for Action {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .copied()
            .ok_or_else(|| DomainError::validation(format!("unknown action '{s}'")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Workflow status of a row (`draft`, `submitted`, ...), case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Status(String);

impl Status {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.0
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows and references
// ─────────────────────────────────────────────────────────────────────────────

/// (resource type, id) address of a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: ResourceType,
    pub id: ResourceId,
}

impl ResourceKey {
    pub fn new(resource_type: ResourceType, id: ResourceId) -> Self {
        Self { resource_type, id }
    }
}

/// Attributes of a row, as far as access decisions are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInstance {
    pub resource_type: ResourceType,
    pub id: Option<ResourceId>,
    pub project_id: Option<ProjectId>,
    pub organisation_id: Option<OrganisationId>,
    pub parent: Option<ResourceKey>,
    /// Ownership columns (`user_id`, `created_by`, ...) → user.
    #[serde(default)]
    pub owners: BTreeMap<String, UserId>,
    pub status: Option<Status>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl ResourceInstance {
    pub fn new(resource_type: ResourceType, id: Option<ResourceId>) -> Self {
        Self {
            resource_type,
            id,
            project_id: None,
            organisation_id: None,
            parent: None,
            owners: BTreeMap::new(),
            status: None,
            flags: BTreeMap::new(),
        }
    }

    pub fn in_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn in_organisation(mut self, organisation_id: OrganisationId) -> Self {
        self.organisation_id = Some(organisation_id);
        self
    }

    pub fn with_parent(mut self, parent: ResourceKey) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_owner(mut self, field: impl Into<String>, user: UserId) -> Self {
        self.owners.insert(field.into(), user);
        self
    }

    pub fn with_status(mut self, status: impl Into<Status>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.flags.insert(name.into(), value);
        self
    }

    pub fn owner(&self, field: &str) -> Option<UserId> {
        self.owners.get(field).copied()
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }

    pub fn key(&self) -> Option<ResourceKey> {
        self.id.map(|id| ResourceKey::new(self.resource_type, id))
    }
}

/// What a decision is about: a stored row, or a row about to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTarget {
    Existing(ResourceId),
    Proposed(Box<ResourceInstance>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    resource_type: ResourceType,
    target: ResourceTarget,
}

impl ResourceRef {
    pub fn existing(resource_type: ResourceType, id: ResourceId) -> Self {
        Self {
            resource_type,
            target: ResourceTarget::Existing(id),
        }
    }

    /// Reference to a not-yet-persisted row (used for `create`).
    pub fn proposed(instance: ResourceInstance) -> Self {
        Self {
            resource_type: instance.resource_type,
            target: ResourceTarget::Proposed(Box::new(instance)),
        }
    }

    /// The project row itself.
    pub fn project(project_id: ProjectId) -> Self {
        Self::existing(ResourceType::Project, ResourceId::from_uuid(*project_id.as_uuid()))
    }

    /// The organisation row itself.
    pub fn organisation(organisation_id: OrganisationId) -> Self {
        Self::existing(
            ResourceType::Organisation,
            ResourceId::from_uuid(*organisation_id.as_uuid()),
        )
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn target(&self) -> &ResourceTarget {
        &self.target
    }

    pub fn id(&self) -> Option<ResourceId> {
        match &self.target {
            ResourceTarget::Existing(id) => Some(*id),
            ResourceTarget::Proposed(instance) => instance.id,
        }
    }
}
