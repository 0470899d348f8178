//! Subscription limits backed by the in-memory membership store counts.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use projectgate_auth::{AccessError, LimitChecker, LimitStatus, LimitType};
use projectgate_core::OrganisationId;
use projectgate_events::{EventBus, InvalidationEvent};

use crate::membership::InMemoryMembershipStore;

/// Plan limits: a default per [`LimitType`] plus per-organisation overrides.
/// A limit with no entry is unlimited.
pub struct InMemoryLimitChecker<B> {
    store: Arc<InMemoryMembershipStore<B>>,
    defaults: RwLock<HashMap<LimitType, u32>>,
    overrides: RwLock<HashMap<(OrganisationId, LimitType), Option<u32>>>,
}

impl<B> InMemoryLimitChecker<B>
where
    B: EventBus<InvalidationEvent>,
{
    pub fn new(store: Arc<InMemoryMembershipStore<B>>) -> Self {
        Self {
            store,
            defaults: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_default(self, limit: LimitType, max: u32) -> Self {
        if let Ok(mut defaults) = self.defaults.write() {
            defaults.insert(limit, max);
        }
        self
    }

    /// `None` lifts the limit for this organisation.
    pub fn set_limit(&self, organisation: OrganisationId, limit: LimitType, max: Option<u32>) {
        if let Ok(mut overrides) = self.overrides.write() {
            overrides.insert((organisation, limit), max);
        }
    }

    fn max_for(&self, organisation: OrganisationId, limit: LimitType) -> Result<Option<u32>, AccessError> {
        let overrides = self
            .overrides
            .read()
            .map_err(|_| AccessError::StoreUnavailable("limit table poisoned".into()))?;
        if let Some(max) = overrides.get(&(organisation, limit)) {
            return Ok(*max);
        }
        let defaults = self
            .defaults
            .read()
            .map_err(|_| AccessError::StoreUnavailable("limit table poisoned".into()))?;
        Ok(defaults.get(&limit).copied())
    }
}

impl<B> LimitChecker for InMemoryLimitChecker<B>
where
    B: EventBus<InvalidationEvent>,
{
    fn check_limit(&self, organisation: OrganisationId, limit: LimitType) -> Result<LimitStatus, AccessError> {
        let counts = self.store.counts(organisation)?;
        let current = match limit {
            LimitType::Projects => counts.projects,
            LimitType::ProjectMembers => counts.project_members,
            LimitType::OrgMembers => counts.org_members,
        };
        let status = LimitStatus::evaluate(current, self.max_for(organisation, limit)?);
        if !status.allowed {
            tracing::info!(
                organisation_id = %organisation,
                limit = %limit,
                current,
                max = ?status.max,
                "subscription limit reached"
            );
        }
        Ok(status)
    }
}
