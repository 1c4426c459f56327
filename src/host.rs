//! Host targets: a local machine with a flat resource pool, or an HPC front-end
//! exposing heterogeneous node classes and a batch submission contract.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::error::{OrchestratorError, Result};
use crate::hpc::NodeClass;
use crate::resource::{Amount, ResourceMapper, ResourceProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HpcSubmitDefaults {
    pub queue: Option<String>,
    pub account: Option<String>,
    pub job_id_pattern: String,
}

/// The two host shapes this crate plans for. A trait-object hierarchy was
/// considered (mirroring the base/subclass split in the source material) but a
/// closed sum type fits better: every host is exactly one of these two things, and
/// matching on a variant at the scheduler's single call site is simpler than
/// dispatching through a trait object for a two-member hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostKind {
    Local {
        resources: ResourceProvider,
    },
    Hpc {
        #[serde(skip)]
        node_classes: Vec<NodeClass>,
        submit_defaults: HpcSubmitDefaults,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub aliases: Vec<String>,
    pub kind: HostKind,
    pub environments: HashMap<String, Environment>,
    pub default_environment: Option<String>,
    #[serde(skip)]
    pub resource_mapper: ResourceMapper,
}

impl Host {
    pub fn new_local(name: impl Into<String>) -> Self {
        Host {
            name: name.into(),
            aliases: Vec::new(),
            kind: HostKind::Local {
                resources: ResourceProvider::new(),
            },
            environments: HashMap::new(),
            default_environment: None,
            resource_mapper: ResourceMapper::new(),
        }
    }

    pub fn new_hpc(name: impl Into<String>, submit_defaults: HpcSubmitDefaults) -> Self {
        Host {
            name: name.into(),
            aliases: Vec::new(),
            kind: HostKind::Hpc {
                node_classes: Vec::new(),
                submit_defaults,
            },
            environments: HashMap::new(),
            default_environment: None,
            resource_mapper: ResourceMapper::new(),
        }
    }

    /// Substring match against a candidate identifier (typically the local FQDN),
    /// checked against the host's name and every alias.
    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.to_ascii_lowercase();
        if candidate.contains(&self.name.to_ascii_lowercase()) {
            return true;
        }
        self.aliases
            .iter()
            .any(|a| candidate.contains(&a.to_ascii_lowercase()))
    }

    pub fn add_environment(&mut self, env: Environment) {
        if env.default {
            self.default_environment = Some(env.name.clone());
        }
        self.environments.insert(env.name.clone(), env);
    }

    /// Resolves the environment an action should run under: the action's explicit
    /// choice, or this host's default if the action left it unset.
    pub fn has_environment(&self, requested: Option<&str>) -> Option<&Environment> {
        match requested {
            Some(name) => self.environments.get(name),
            None => self
                .default_environment
                .as_ref()
                .and_then(|name| self.environments.get(name)),
        }
    }

    pub fn is_hpc(&self) -> bool {
        matches!(self.kind, HostKind::Hpc { .. })
    }

    /// Checks whether `amount` of `resource` could be acquired right now, without
    /// acquiring it. HPC hosts have no flat pool to check against -- feasibility is
    /// resolved per-submission by the requisition planner -- so they always report
    /// available.
    pub fn resources_available(&self, resource: &str, amount: Amount) -> Result<bool> {
        match &self.kind {
            HostKind::Local { resources } => {
                let canonical = self.resource_mapper.resolve(resource).to_string();
                resources.resources_available(&canonical, amount)
            }
            HostKind::Hpc { .. } => Ok(true),
        }
    }

    pub fn acquire_resources(&mut self, action: &str, resource: &str, amount: Amount) -> Result<()> {
        match &mut self.kind {
            HostKind::Local { resources } => {
                let canonical = self.resource_mapper.resolve(resource).to_string();
                resources.acquire_resources(action, &canonical, amount)
            }
            HostKind::Hpc { .. } => Err(OrchestratorError::Config(
                "HPC hosts acquire resources per-requisition, not per-action".to_string(),
            )),
        }
    }

    pub fn release_resources(&mut self, resource: &str, amount: Amount) {
        if let HostKind::Local { resources } = &mut self.kind {
            let canonical = self.resource_mapper.resolve(resource).to_string();
            resources.release_resources(&canonical, amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_alias_case_insensitively() {
        let mut host = Host::new_local("login1");
        host.aliases.push("Frontend".to_string());
        assert!(host.matches("LOGIN1.cluster.example.com"));
        assert!(host.matches("frontend.cluster.example.com"));
        assert!(!host.matches("other.cluster.example.com"));
    }

    #[test]
    fn default_environment_used_when_action_leaves_it_unset() {
        let mut host = Host::new_local("login1");
        let mut env = Environment::new("gcc");
        env.default = true;
        host.add_environment(env);
        assert!(host.has_environment(None).is_some());
        assert!(host.has_environment(Some("missing")).is_none());
    }
}
