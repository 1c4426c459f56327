//! Action data model: identity, dependencies, resource requirements, and the
//! state/status machine the run loop advances.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How an action relates to one of its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Upstream must finish with `Success`.
    AfterOk,
    /// Upstream must finish with `Failure`.
    AfterNotOk,
    /// Upstream must finish, with any status.
    AfterAny,
    /// Upstream must have left the `Pending` state at all (running counts).
    After,
}

/// Where an action currently sits in the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Inactive,
    Pending,
    Running,
    Finished,
    Skipped,
    Error,
}

/// The outcome of a finished action. `Submitted` covers HPC jobs accepted by the
/// batch scheduler but not yet resolved to success or failure -- see
/// [`dependency_met`] for how it is treated by each dependency kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    None,
    Success,
    Failure,
    Submitted,
}

/// Evaluates whether an upstream action in `state`/`status` satisfies `dep`.
///
/// `Submitted` is deliberately treated as satisfying both `AfterOk` and
/// `AfterNotOk`: once a job has been handed to a batch scheduler without the
/// orchestrator itself resolving its outcome, requiring a specific status would
/// permanently stall any dependent action. This mirrors the source behavior and is
/// flagged in DESIGN.md as a candidate for a future run-mode flag rather than a
/// silent default.
pub fn dependency_met(dep: DependencyKind, state: ActionState, status: ActionStatus) -> bool {
    match dep {
        DependencyKind::After => matches!(state, ActionState::Running | ActionState::Finished),
        DependencyKind::AfterAny => state == ActionState::Finished,
        DependencyKind::AfterOk => {
            state == ActionState::Finished
                && matches!(status, ActionStatus::Success | ActionStatus::Submitted)
        }
        DependencyKind::AfterNotOk => {
            state == ActionState::Finished
                && matches!(status, ActionStatus::Failure | ActionStatus::Submitted)
        }
    }
}

/// A unit of work: a command to run, under some environment, on some host, once its
/// dependencies and resource requirements are satisfied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub config: HashMap<String, Value>,
    pub environment: Option<String>,
    pub local: Option<bool>,
    pub verbose: bool,
    pub dry_run: bool,
    pub timelimit: Option<String>,
    pub log_location: Option<PathBuf>,
    pub dependencies: HashMap<String, DependencyKind>,
    pub resources: HashMap<String, String>,

    pub state: ActionState,
    pub status: ActionStatus,
}

impl Action {
    pub fn new(id: impl Into<String>) -> Self {
        Action {
            id: id.into(),
            config: HashMap::new(),
            environment: None,
            local: None,
            verbose: false,
            dry_run: false,
            timelimit: None,
            log_location: None,
            dependencies: HashMap::new(),
            resources: HashMap::new(),
            state: ActionState::Inactive,
            status: ActionStatus::None,
        }
    }

    pub fn add_dependency(&mut self, upstream: impl Into<String>, kind: DependencyKind) {
        self.dependencies.insert(upstream.into(), kind);
    }

    pub fn add_resource_requirement(&mut self, resource: impl Into<String>, amount: impl Into<String>) {
        self.resources.insert(resource.into(), amount.into());
    }

    /// Resets the action to `Pending` with no status, ready to be reconsidered by
    /// the run loop. Used both for first activation and for resuming a durable
    /// snapshot.
    pub fn mark_pending(&mut self) {
        self.state = ActionState::Pending;
        self.status = ActionStatus::None;
    }

    pub fn mark_running(&mut self) {
        self.state = ActionState::Running;
        self.status = ActionStatus::None;
    }

    pub fn mark_finished(&mut self, status: ActionStatus) {
        self.state = ActionState::Finished;
        self.status = status;
    }

    pub fn mark_skipped(&mut self) {
        self.state = ActionState::Skipped;
        self.status = ActionStatus::None;
    }

    pub fn mark_error(&mut self) {
        self.state = ActionState::Error;
        self.status = ActionStatus::None;
    }

    /// The command line to execute, derived from `config["command"]` plus optional
    /// `config["arguments"]` (a JSON array of strings).
    pub fn command_line(&self) -> Option<(String, Vec<String>)> {
        let command = self.config.get("command")?.as_str()?.to_string();
        let args = self
            .config
            .get("arguments")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        Some((command, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_ok_accepts_submitted() {
        assert!(dependency_met(
            DependencyKind::AfterOk,
            ActionState::Finished,
            ActionStatus::Submitted
        ));
    }

    #[test]
    fn after_ok_rejects_failure() {
        assert!(!dependency_met(
            DependencyKind::AfterOk,
            ActionState::Finished,
            ActionStatus::Failure
        ));
    }

    #[test]
    fn after_any_ignores_status_but_requires_finished() {
        assert!(dependency_met(
            DependencyKind::AfterAny,
            ActionState::Finished,
            ActionStatus::Failure
        ));
        assert!(!dependency_met(
            DependencyKind::AfterAny,
            ActionState::Skipped,
            ActionStatus::None
        ));
        assert!(!dependency_met(
            DependencyKind::AfterAny,
            ActionState::Error,
            ActionStatus::None
        ));
    }

    #[test]
    fn after_is_satisfied_while_running_or_finished() {
        assert!(!dependency_met(
            DependencyKind::After,
            ActionState::Pending,
            ActionStatus::None
        ));
        assert!(dependency_met(DependencyKind::After, ActionState::Running, ActionStatus::None));
        assert!(dependency_met(DependencyKind::After, ActionState::Finished, ActionStatus::None));
        assert!(!dependency_met(DependencyKind::After, ActionState::Skipped, ActionStatus::None));
        assert!(!dependency_met(DependencyKind::After, ActionState::Error, ActionStatus::None));
    }

    #[test]
    fn mark_pending_clears_status() {
        let mut a = Action::new("x");
        a.mark_finished(ActionStatus::Failure);
        a.mark_pending();
        assert_eq!(a.state, ActionState::Pending);
        assert_eq!(a.status, ActionStatus::None);
    }
}
