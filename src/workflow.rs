//! Loads one declarative workflow definition file into a set of [`Action`]s and
//! [`Host`]s.
//!
//! This is a deliberately minimal stand-in for full path/glob-based workflow
//! *discovery* across a tree of user modules, which stays out of scope here (see
//! SPEC_FULL.md). It reads a single JSON document shaped as:
//!
//! ```json
//! {
//!   "actions": { "<id>": { "command": "...", "dependencies": {"upstream": "after_ok"}, "resources": {"cpus": "4"} } },
//!   "hosts": { "<name>": { "type": "local", "resources": {"cpus": "8"} } }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::action::{Action, DependencyKind};
use crate::environment::Environment;
use crate::error::{OrchestratorError, Result};
use crate::hpc::NodeClass;
use crate::host::{Host, HostKind, HpcSubmitDefaults};
use crate::resource::Amount;

pub struct WorkflowDefinition {
    pub actions: HashMap<String, Action>,
    pub hosts: HashMap<String, Host>,
}

pub fn load(path: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(path).map_err(|source| OrchestratorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let root: Value = serde_json::from_str(&text)?;
    parse(&root)
}

fn parse(root: &Value) -> Result<WorkflowDefinition> {
    let mut actions = HashMap::new();
    if let Some(map) = root.get("actions").and_then(Value::as_object) {
        for (id, def) in map {
            actions.insert(id.clone(), parse_action(id, def)?);
        }
    }

    let mut hosts = HashMap::new();
    if let Some(map) = root.get("hosts").and_then(Value::as_object) {
        for (name, def) in map {
            hosts.insert(name.clone(), parse_host(name, def)?);
        }
    }

    Ok(WorkflowDefinition { actions, hosts })
}

fn parse_action(id: &str, def: &Value) -> Result<Action> {
    let mut action = Action::new(id);

    if let Some(obj) = def.as_object() {
        if let Some(config) = obj.get("config").and_then(Value::as_object) {
            for (k, v) in config {
                action.config.insert(k.clone(), v.clone());
            }
        }
        if let Some(command) = obj.get("command") {
            action.config.insert("command".to_string(), command.clone());
        }
        if let Some(arguments) = obj.get("arguments") {
            action.config.insert("arguments".to_string(), arguments.clone());
        }
        if let Some(env) = obj.get("environment").and_then(Value::as_str) {
            action.environment = Some(env.to_string());
        }
        if let Some(local) = obj.get("local").and_then(Value::as_bool) {
            action.local = Some(local);
        }
        if let Some(verbose) = obj.get("verbose").and_then(Value::as_bool) {
            action.verbose = verbose;
        }
        if let Some(timelimit) = obj.get("timelimit").and_then(Value::as_str) {
            action.timelimit = Some(timelimit.to_string());
        }
        if let Some(deps) = obj.get("dependencies").and_then(Value::as_object) {
            for (upstream, kind) in deps {
                let kind = parse_dependency_kind(kind.as_str().unwrap_or("after_ok"), id, upstream)?;
                action.dependencies.insert(upstream.clone(), kind);
            }
        }
        if let Some(resources) = obj.get("resources").and_then(Value::as_object) {
            for (resource, amount) in resources {
                let amount = match amount {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => {
                        return Err(OrchestratorError::Config(format!(
                            "action {id}: resource {resource:?} must be a string or number"
                        )))
                    }
                };
                action.resources.insert(resource.clone(), amount);
            }
        }
    }

    Ok(action)
}

fn parse_dependency_kind(raw: &str, action: &str, upstream: &str) -> Result<DependencyKind> {
    match raw {
        "after_ok" => Ok(DependencyKind::AfterOk),
        "after_not_ok" => Ok(DependencyKind::AfterNotOk),
        "after_any" => Ok(DependencyKind::AfterAny),
        "after" => Ok(DependencyKind::After),
        other => Err(OrchestratorError::Config(format!(
            "action {action}: unknown dependency kind {other:?} for upstream {upstream:?}"
        ))),
    }
}

fn parse_host(name: &str, def: &Value) -> Result<Host> {
    let obj = def.as_object().ok_or_else(|| {
        OrchestratorError::Config(format!("host {name:?} definition must be an object"))
    })?;
    let host_type = obj.get("type").and_then(Value::as_str).unwrap_or("local");

    let mut host = match host_type {
        "local" => {
            let mut host = Host::new_local(name);
            if let HostKind::Local { resources } = &mut host.kind {
                if let Some(res) = obj.get("resources").and_then(Value::as_object) {
                    for (resource, amount) in res {
                        let amount = Amount::parse(amount.as_str().unwrap_or_default())?;
                        resources.add_resource(resource, amount, false)?;
                    }
                }
            }
            host
        }
        "hpc" => {
            let submit_defaults = HpcSubmitDefaults {
                queue: obj
                    .get("submit_defaults")
                    .and_then(|v| v.get("queue"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                account: obj
                    .get("submit_defaults")
                    .and_then(|v| v.get("account"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                job_id_pattern: obj
                    .get("submit_defaults")
                    .and_then(|v| v.get("job_id_pattern"))
                    .and_then(Value::as_str)
                    .unwrap_or(r"\d{5,}")
                    .to_string(),
            };
            let mut host = Host::new_hpc(name, submit_defaults);
            if let HostKind::Hpc { node_classes, .. } = &mut host.kind {
                if let Some(classes) = obj.get("node_classes").and_then(Value::as_object) {
                    for (class_name, class_def) in classes {
                        node_classes.push(parse_node_class(class_name, class_def)?);
                    }
                }
            }
            host
        }
        other => {
            return Err(OrchestratorError::Config(format!(
                "host {name:?} has unknown type {other:?}"
            )))
        }
    };

    if let Some(aliases) = obj.get("aliases").and_then(Value::as_array) {
        host.aliases = aliases
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }

    if let Some(environments) = obj.get("environments").and_then(Value::as_object) {
        for (env_name, env_def) in environments {
            host.add_environment(parse_environment(env_name, env_def)?);
        }
    }

    Ok(host)
}

fn parse_node_class(name: &str, def: &Value) -> Result<NodeClass> {
    let obj = def
        .as_object()
        .ok_or_else(|| OrchestratorError::Config(format!("node class {name:?} must be an object")))?;
    let exclusive = obj.get("exclusive").and_then(Value::as_bool).unwrap_or(false);
    let node_count = obj
        .get("nodes")
        .and_then(Value::as_u64)
        .ok_or_else(|| OrchestratorError::Config(format!("node class {name:?} is missing \"nodes\"")))?;

    let mut per_node = HashMap::new();
    if let Some(res) = obj.get("resources").and_then(Value::as_object) {
        for (resource, amount) in res {
            let amount = match amount {
                Value::String(s) => Amount::parse(s)?,
                Value::Number(n) => Amount::parse(&n.to_string())?,
                _ => {
                    return Err(OrchestratorError::Config(format!(
                        "node class {name:?}: resource {resource:?} must be a string or number"
                    )))
                }
            };
            per_node.insert(resource.clone(), amount);
        }
    }

    Ok(NodeClass {
        name: name.to_string(),
        exclusive,
        per_node,
        node_count,
    })
}

fn parse_environment(name: &str, def: &Value) -> Result<Environment> {
    let mut env = Environment::new(name);
    let Some(obj) = def.as_object() else {
        return Ok(env);
    };
    env.default = obj.get("default").and_then(Value::as_bool).unwrap_or(false);
    if let Some(modules) = obj.get("module_commands").and_then(Value::as_object) {
        for (category, commands) in modules {
            if let Some(list) = commands.as_array() {
                for command in list.iter().filter_map(Value::as_str) {
                    env.add_module_command(category, command);
                }
            }
        }
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_actions_and_local_host() {
        let root = json!({
            "actions": {
                "build": {"command": "make", "resources": {"cpus": "4"}},
                "test": {"command": "make test", "dependencies": {"build": "after_ok"}}
            },
            "hosts": {
                "login1": {"type": "local", "resources": {"cpus": "8"}}
            }
        });
        let wf = parse(&root).unwrap();
        assert_eq!(wf.actions.len(), 2);
        assert_eq!(
            wf.actions["test"].dependencies.get("build"),
            Some(&DependencyKind::AfterOk)
        );
        assert!(wf.hosts.contains_key("login1"));
    }

    #[test]
    fn parses_hpc_node_classes() {
        let root = json!({
            "hosts": {
                "cluster": {
                    "type": "hpc",
                    "node_classes": {
                        "cpu_nodes": {"exclusive": true, "nodes": 10, "resources": {"ncpus": 128}}
                    }
                }
            }
        });
        let wf = parse(&root).unwrap();
        let host = &wf.hosts["cluster"];
        assert!(host.is_hpc());
    }

    #[test]
    fn unknown_dependency_kind_errors() {
        let root = json!({
            "actions": {"a": {"command": "x", "dependencies": {"b": "bogus"}}}
        });
        assert!(parse(&root).is_err());
    }
}
