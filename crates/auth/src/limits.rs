//! Subscription limits, checked after an access decision and before a
//! mutation. Limits never grant access; they can only refuse it.

use serde::{Deserialize, Serialize};

use projectgate_core::OrganisationId;

use crate::error::AccessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Projects,
    /// Distinct users holding a grant on any project of the organisation.
    ProjectMembers,
    OrgMembers,
}

impl core::fmt::Display for LimitType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            LimitType::Projects => "projects",
            LimitType::ProjectMembers => "project_members",
            LimitType::OrgMembers => "org_members",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitStatus {
    pub allowed: bool,
    pub current: u32,
    /// `None` means unlimited.
    pub max: Option<u32>,
}

impl LimitStatus {
    /// Whether one more item fits.
    pub fn evaluate(current: u32, max: Option<u32>) -> Self {
        Self {
            allowed: max.is_none_or(|m| current < m),
            current,
            max,
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        self.max.map(|m| m.saturating_sub(self.current))
    }
}

pub trait LimitChecker: Send + Sync {
    fn check_limit(&self, organisation: OrganisationId, limit: LimitType) -> Result<LimitStatus, AccessError>;
}
