//! Engine configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional JSON
//! file, then `PROJECTGATE_<SECTION>_<FIELD>` environment variables. The
//! result is validated once; an invalid value fails startup.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use projectgate_auth::{MAX_PARENT_HOPS, RoleCatalog, RoleCatalogError, RuleTable, RuleTableError};
use projectgate_observability::LogFormat;

pub const ENV_PREFIX: &str = "PROJECTGATE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("role catalog: {0}")]
    Roles(#[from] RoleCatalogError),

    #[error("rule table: {0}")]
    Rules(#[from] RuleTableError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    /// 1..=60.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// 1..=2.
    pub max_parent_hops: u8,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { max_parent_hops: 1 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    #[default]
    Buffered,
    Tracing,
    None,
}

impl FromStr for AuditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(AuditKind::Buffered),
            "tracing" => Ok(AuditKind::Tracing),
            "none" => Ok(AuditKind::None),
            other => Err(format!("unknown audit kind '{other}' (expected buffered, tracing or none)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub kind: AuditKind,
    /// Capacity of the buffered sink; must be > 0.
    pub buffer: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            kind: AuditKind::Buffered,
            buffer: 1024,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EngineConfig
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub audit: AuditConfig,
    /// Rule table JSON; the bundled table when unset.
    pub rules_path: Option<PathBuf>,
    /// Role catalog JSON; the built-in taxonomy when unset.
    pub roles_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with an injectable environment.
    pub fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading engine config file");
                let content = read_file(path)?;
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let env = Env(env);

        if let Some(v) = env.bool("CACHE_ENABLED") {
            self.cache.enabled = v;
        }
        if let Some(v) = env.parse::<u64>("CACHE_TTL_SECS")? {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = env.parse::<u8>("RESOLVER_MAX_PARENT_HOPS")? {
            self.resolver.max_parent_hops = v;
        }
        if let Some(v) = env.parse::<AuditKind>("AUDIT_KIND")? {
            self.audit.kind = v;
        }
        if let Some(v) = env.parse::<usize>("AUDIT_BUFFER")? {
            self.audit.buffer = v;
        }
        if let Some(v) = env.var("RULES_PATH") {
            self.rules_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env.var("ROLES_PATH") {
            self.roles_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env.parse::<LogFormat>("LOG_FORMAT")? {
            self.log_format = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=60).contains(&self.cache.ttl_secs) {
            return Err(invalid("cache.ttl_secs", format!("{} is outside 1..=60", self.cache.ttl_secs)));
        }
        if !(1..=MAX_PARENT_HOPS).contains(&self.resolver.max_parent_hops) {
            return Err(invalid(
                "resolver.max_parent_hops",
                format!("{} is outside 1..={MAX_PARENT_HOPS}", self.resolver.max_parent_hops),
            ));
        }
        if self.audit.buffer == 0 {
            return Err(invalid("audit.buffer", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn load_catalog(&self) -> Result<RoleCatalog, ConfigError> {
        match &self.roles_path {
            Some(path) => {
                let catalog = RoleCatalog::from_json(&read_file(path)?)?;
                tracing::info!(path = %path.display(), "role catalog loaded");
                Ok(catalog)
            }
            None => Ok(RoleCatalog::default()),
        }
    }

    pub fn load_rules(&self, catalog: &RoleCatalog) -> Result<RuleTable, ConfigError> {
        match &self.rules_path {
            Some(path) => {
                let rules = RuleTable::from_json(&read_file(path)?, catalog)?;
                tracing::info!(path = %path.display(), rules = rules.len(), "rule table loaded");
                Ok(rules)
            }
            None => Ok(RuleTable::builtin(catalog)?),
        }
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

/// Prefixed environment reads. Empty values count as unset.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn key(name: &str) -> String {
        format!("{ENV_PREFIX}_{name}")
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.0)(&Self::key(name)).filter(|s| !s.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        match self.var(name) {
            Some(v) => v.parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidValue {
                key: Self::key(name),
                message: format!("invalid value '{v}': {e}"),
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::load_with(None, env(&[])).unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache_ttl(), Duration::from_secs(5));
        assert_eq!(config.resolver.max_parent_hops, 1);
        assert_eq!(config.audit.kind, AuditKind::Buffered);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = EngineConfig::load_with(
            None,
            env(&[
                ("PROJECTGATE_CACHE_ENABLED", "false"),
                ("PROJECTGATE_CACHE_TTL_SECS", "30"),
                ("PROJECTGATE_RESOLVER_MAX_PARENT_HOPS", "2"),
                ("PROJECTGATE_AUDIT_KIND", "tracing"),
                ("PROJECTGATE_LOG_FORMAT", "pretty"),
                ("PROJECTGATE_RULES_PATH", ""),
            ]),
        )
        .unwrap();

        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.resolver.max_parent_hops, 2);
        assert_eq!(config.audit.kind, AuditKind::Tracing);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.rules_path, None);
    }

    #[test]
    fn unparsable_env_value_names_the_key() {
        let err = EngineConfig::load_with(None, env(&[("PROJECTGATE_CACHE_TTL_SECS", "soon")])).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "PROJECTGATE_CACHE_TTL_SECS"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for pairs in [
            [("PROJECTGATE_CACHE_TTL_SECS", "61")],
            [("PROJECTGATE_CACHE_TTL_SECS", "0")],
            [("PROJECTGATE_RESOLVER_MAX_PARENT_HOPS", "3")],
            [("PROJECTGATE_AUDIT_BUFFER", "0")],
        ] {
            assert!(matches!(
                EngineConfig::load_with(None, env(&pairs)),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
    }

    #[test]
    fn json_rejects_unknown_fields() {
        assert!(EngineConfig::from_json(r#"{ "cache": { "ttl": 5 } }"#).is_err());

        let config = EngineConfig::from_json(r#"{ "cache": { "ttl_secs": 10 }, "audit": { "kind": "none" } }"#).unwrap();
        assert_eq!(config.cache.ttl_secs, 10);
        assert!(config.cache.enabled);
        assert_eq!(config.audit.kind, AuditKind::None);
    }

    #[test]
    fn missing_rules_file_is_a_read_error() {
        let config = EngineConfig {
            rules_path: Some(PathBuf::from("/nonexistent/rules.json")),
            ..EngineConfig::default()
        };
        let catalog = config.load_catalog().unwrap();
        assert!(matches!(config.load_rules(&catalog), Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn builtin_rules_load_without_paths() {
        let config = EngineConfig::default();
        let catalog = config.load_catalog().unwrap();
        assert!(!config.load_rules(&catalog).unwrap().is_empty());
    }
}
