//! Named, ordered collections of module-system commands and environment-variable
//! mutations, replayed once per action launch.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EnvVarOp {
    Set { name: String, value: String },
    Unset { name: String },
    Prepend { name: String, value: String, separator: String },
    Append { name: String, value: String, separator: String },
}

/// A single step in the replay sequence: either a module-system command (recorded,
/// not executed here -- actual `module load` invocation is environment-specific and
/// lives outside this crate) or an environment variable mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvStep {
    ModuleCommand { category: String, command: String },
    EnvVar { category: String, op: EnvVarOp },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Environment {
    pub name: String,
    pub default: bool,
    steps: Vec<EnvStep>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Environment {
            name: name.into(),
            default: false,
            steps: Vec::new(),
        }
    }

    pub fn add_module_command(&mut self, category: impl Into<String>, command: impl Into<String>) {
        self.steps.push(EnvStep::ModuleCommand {
            category: category.into(),
            command: command.into(),
        });
    }

    pub fn add_env_var(&mut self, category: impl Into<String>, op: EnvVarOp) {
        self.steps.push(EnvStep::EnvVar {
            category: category.into(),
            op,
        });
    }

    /// Replays every recorded step in registration order, mutating the current
    /// process's environment. Module commands are logged, not executed: invoking an
    /// actual module system is left to the process that runs this (see the child
    /// launcher binary), which may run in a shell this crate does not control.
    pub fn setup(&self) {
        for step in &self.steps {
            match step {
                EnvStep::ModuleCommand { category, command } => {
                    debug!(environment = %self.name, category, command, "module command recorded");
                }
                EnvStep::EnvVar { category, op } => {
                    debug!(environment = %self.name, category, ?op, "applying environment variable");
                    apply_env_var(op);
                }
            }
        }
    }
}

fn apply_env_var(op: &EnvVarOp) {
    match op {
        EnvVarOp::Set { name, value } => unsafe { std::env::set_var(name, value) },
        EnvVarOp::Unset { name } => unsafe { std::env::remove_var(name) },
        EnvVarOp::Prepend { name, value, separator } => {
            let existing = std::env::var(name).unwrap_or_default();
            let combined = if existing.is_empty() {
                value.clone()
            } else {
                format!("{value}{separator}{existing}")
            };
            unsafe { std::env::set_var(name, combined) };
        }
        EnvVarOp::Append { name, value, separator } => {
            let existing = std::env::var(name).unwrap_or_default();
            let combined = if existing.is_empty() {
                value.clone()
            } else {
                format!("{existing}{separator}{value}")
            };
            unsafe { std::env::set_var(name, combined) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_prepend_then_append_compose() {
        let name = "CAUSEWAY_TEST_ENV_VAR_COMPOSE";
        unsafe { std::env::remove_var(name) };
        let mut env = Environment::new("test");
        env.add_env_var("paths", EnvVarOp::Set { name: name.into(), value: "mid".into() });
        env.add_env_var(
            "paths",
            EnvVarOp::Prepend { name: name.into(), value: "start".into(), separator: ":".into() },
        );
        env.add_env_var(
            "paths",
            EnvVarOp::Append { name: name.into(), value: "end".into(), separator: ":".into() },
        );
        env.setup();
        assert_eq!(std::env::var(name).unwrap(), "start:mid:end");
        unsafe { std::env::remove_var(name) };
    }
}
