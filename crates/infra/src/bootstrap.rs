//! In-memory wiring of the engine and its collaborators from an
//! [`EngineConfig`].
//!
//! Bus → cache listener → membership store → resolvers → engine. The cache is
//! attached to the bus before any mutation can happen.

use std::sync::Arc;

use projectgate_auth::{
    AuditSink, DecisionCache, EffectiveAccessResolver, NoopAuditSink, PolicyEngine, RoleCatalog, RuleTable,
    ScopeResolver,
};
use projectgate_events::{EventBus, InMemoryEventBus, InvalidationEvent};

use crate::audit::{AuditReceiver, BufferedAuditSink, TracingAuditSink};
use crate::config::{AuditKind, ConfigError, EngineConfig};
use crate::membership::InMemoryMembershipStore;
use crate::resources::{InMemoryResourceStore, RoutedResourceLookup};

pub type InvalidationBus = Arc<InMemoryEventBus<InvalidationEvent>>;

pub struct InMemoryServices {
    pub engine: Arc<PolicyEngine>,
    pub catalog: Arc<RoleCatalog>,
    pub bus: InvalidationBus,
    pub memberships: Arc<InMemoryMembershipStore<InvalidationBus>>,
    pub resources: Arc<InMemoryResourceStore>,
    pub cache: Option<Arc<DecisionCache>>,
    pub audit_sink: Arc<dyn AuditSink>,
    /// Present when the audit kind is `buffered`.
    pub audit: Option<AuditReceiver>,
}

impl InMemoryServices {
    /// Load roles and rules as configured and wire everything.
    pub fn build(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let catalog = config.load_catalog()?;
        let rules = config.load_rules(&catalog)?;
        Ok(Self::with_tables(config, catalog, rules))
    }

    /// Wire already-validated tables. `config` supplies cache, resolver and
    /// audit settings only.
    pub fn with_tables(config: &EngineConfig, catalog: RoleCatalog, rules: RuleTable) -> Self {
        let catalog = Arc::new(catalog);
        let bus: InvalidationBus = Arc::new(InMemoryEventBus::new());

        let cache = config.cache.enabled.then(|| {
            let cache = Arc::new(DecisionCache::new(config.cache_ttl()));
            bus.attach(cache.clone());
            cache
        });

        let memberships = Arc::new(InMemoryMembershipStore::new(catalog.clone(), bus.clone()));
        let resources = Arc::new(InMemoryResourceStore::new());

        let lookup = RoutedResourceLookup::new(memberships.clone(), resources.clone());
        let scopes = ScopeResolver::new(Arc::new(lookup)).with_max_hops(config.resolver.max_parent_hops);

        let mut access = EffectiveAccessResolver::new(memberships.clone(), catalog.clone());
        if let Some(cache) = &cache {
            access = access.with_cache(cache.clone());
        }

        let (audit_sink, audit): (Arc<dyn AuditSink>, Option<AuditReceiver>) = match config.audit.kind {
            AuditKind::Buffered => {
                let (sink, receiver) = BufferedAuditSink::new(config.audit.buffer);
                (Arc::new(sink) as Arc<dyn AuditSink>, Some(receiver))
            }
            AuditKind::Tracing => (Arc::new(TracingAuditSink) as Arc<dyn AuditSink>, None),
            AuditKind::None => (Arc::new(NoopAuditSink) as Arc<dyn AuditSink>, None),
        };

        let engine = PolicyEngine::new(Arc::new(rules), scopes, access).with_audit(audit_sink.clone());

        tracing::info!(
            rules = engine.rules().len(),
            cache = cache.is_some(),
            cache_ttl_secs = config.cache.ttl_secs,
            max_parent_hops = config.resolver.max_parent_hops,
            audit = ?config.audit.kind,
            "policy engine ready"
        );

        Self {
            engine: Arc::new(engine),
            catalog,
            bus,
            memberships,
            resources,
            cache,
            audit_sink,
            audit,
        }
    }
}
