//! Infrastructure layer: in-memory stores, audit sinks, configuration and
//! engine wiring.

pub mod admin;
pub mod audit;
pub mod bootstrap;
pub mod config;
pub mod identity;
pub mod limits;
pub mod membership;
pub mod resources;

#[cfg(test)]
mod integration_tests;

pub use admin::{AdminError, MembershipAdmin};
pub use audit::{AuditReceiver, BufferedAuditSink, TracingAuditSink};
pub use bootstrap::{InMemoryServices, InvalidationBus};
pub use config::{AuditConfig, AuditKind, CacheConfig, ConfigError, EngineConfig, ResolverConfig};
pub use identity::StaticIdentityProvider;
pub use limits::InMemoryLimitChecker;
pub use membership::{InMemoryMembershipStore, MembershipCounts};
pub use resources::{InMemoryResourceStore, RoutedResourceLookup};
