//! Validate a role catalog and rule table and print a JSON summary.
//!
//! Exits non-zero when configuration, roles or rules are invalid.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;

use projectgate_auth::{Counterpart, OrgRole, ProjectRole, RoleCatalog, RuleSpec, RuleTable};
use projectgate_infra::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "projectgate-rules")]
struct Args {
    /// Engine config file (JSON)
    #[arg(long, env = "PROJECTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Rule table, overriding the config
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Role catalog, overriding the config
    #[arg(long)]
    roles: Option<PathBuf>,

    /// Print the normalized rule table instead of the summary
    #[arg(long)]
    dump: bool,
}

#[derive(Serialize)]
struct Summary {
    version: u32,
    rules: usize,
    org_roles: Vec<OrgRoleSummary>,
    project_roles: Vec<ProjectRoleSummary>,
    clauses: ClauseCounts,
    actions: BTreeMap<String, Vec<String>>,
}

#[derive(Serialize)]
struct OrgRoleSummary {
    role: OrgRole,
    elevated: bool,
    level: Option<u8>,
}

#[derive(Serialize)]
struct ProjectRoleSummary {
    role: ProjectRole,
    level: Option<u8>,
    counterpart: Option<Counterpart>,
    capabilities: Vec<String>,
}

#[derive(Serialize, Default)]
struct ClauseCounts {
    ownership: usize,
    status_override: usize,
    global_override: usize,
    counterpart_split: usize,
    elevated_only: usize,
}

impl ClauseCounts {
    fn add(&mut self, spec: &RuleSpec) {
        self.ownership += spec.ownership.is_some() as usize;
        self.status_override += spec.status_override.is_some() as usize;
        self.global_override += spec.global_override.is_some() as usize;
        self.counterpart_split += spec.counterpart_split.is_some() as usize;
        let grants_nothing = spec.allowed_roles.is_empty()
            && spec.counterpart_split.is_none()
            && spec.ownership.is_none()
            && spec.status_override.is_none()
            && spec.global_override.is_none();
        self.elevated_only += grants_nothing as usize;
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = EngineConfig::load(args.config.as_deref()).context("loading engine config")?;
    projectgate_observability::init(config.log_format);

    if args.rules.is_some() {
        config.rules_path = args.rules;
    }
    if args.roles.is_some() {
        config.roles_path = args.roles;
    }

    let catalog = config.load_catalog().context("loading role catalog")?;
    let rules = config.load_rules(&catalog).context("loading rule table")?;

    if args.dump {
        println!("{}", serde_json::to_string_pretty(&rules.to_document())?);
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&summarize(&catalog, &rules))?);
    Ok(())
}

fn summarize(catalog: &RoleCatalog, rules: &RuleTable) -> Summary {
    let mut clauses = ClauseCounts::default();
    let mut actions: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for spec in rules.iter() {
        clauses.add(spec);
        actions
            .entry(spec.resource_type.to_string())
            .or_default()
            .push(spec.action.to_string());
    }

    Summary {
        version: rules.version(),
        rules: rules.len(),
        org_roles: catalog
            .org_roles()
            .map(|role| OrgRoleSummary {
                role,
                elevated: catalog.is_elevated_org_role(role),
                level: catalog.org_level(role),
            })
            .collect(),
        project_roles: catalog
            .project_roles()
            .map(|role| ProjectRoleSummary {
                role,
                level: catalog.level(role),
                counterpart: catalog.counterpart(role),
                capabilities: catalog.capabilities(role).to_vec(),
            })
            .collect(),
        clauses,
        actions,
    }
}
