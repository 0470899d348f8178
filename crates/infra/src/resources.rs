//! Resource rows for scope resolution.
//!
//! [`InMemoryResourceStore`] holds business rows (milestones, timesheets,
//! expenses, ...). [`RoutedResourceLookup`] sends membership row types to the
//! membership store and everything else to the resource store, so the
//! resolver sees one [`ResourceLookup`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use projectgate_auth::{ResourceInstance, ResourceKey, ResourceLookup, ResourceType, StoreError};
use projectgate_core::ResourceId;

/// In-memory resource rows for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    inner: RwLock<HashMap<ResourceKey, ResourceInstance>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a row, assigning an id when it has none. Returns its key.
    pub fn insert(&self, mut instance: ResourceInstance) -> Result<ResourceKey, StoreError> {
        let id = *instance.id.get_or_insert_with(ResourceId::new);
        let key = ResourceKey::new(instance.resource_type, id);
        let mut rows = self
            .inner
            .write()
            .map_err(|_| StoreError::unavailable("resource store lock poisoned"))?;
        rows.insert(key, instance);
        Ok(key)
    }

    pub fn remove(&self, key: ResourceKey) -> Result<Option<ResourceInstance>, StoreError> {
        let mut rows = self
            .inner
            .write()
            .map_err(|_| StoreError::unavailable("resource store lock poisoned"))?;
        Ok(rows.remove(&key))
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceLookup for InMemoryResourceStore {
    fn load(&self, resource_type: ResourceType, id: ResourceId) -> Result<Option<ResourceInstance>, StoreError> {
        let rows = self
            .inner
            .read()
            .map_err(|_| StoreError::unavailable("resource store lock poisoned"))?;
        Ok(rows.get(&ResourceKey::new(resource_type, id)).cloned())
    }
}

/// One lookup over membership rows and business rows.
pub struct RoutedResourceLookup {
    memberships: Arc<dyn ResourceLookup>,
    resources: Arc<dyn ResourceLookup>,
}

impl RoutedResourceLookup {
    pub fn new(memberships: Arc<dyn ResourceLookup>, resources: Arc<dyn ResourceLookup>) -> Self {
        Self { memberships, resources }
    }
}

impl ResourceLookup for RoutedResourceLookup {
    fn load(&self, resource_type: ResourceType, id: ResourceId) -> Result<Option<ResourceInstance>, StoreError> {
        match resource_type {
            ResourceType::OrganisationMembership | ResourceType::ProjectMembership => {
                self.memberships.load(resource_type, id)
            }
            _ => self.resources.load(resource_type, id),
        }
    }
}
