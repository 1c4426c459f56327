//! Durable state: snapshot/restore of scheduler and action state to a save
//! directory, written atomically so a crash mid-write never leaves a torn file
//! behind for the next invocation to trip over.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionState, ActionStatus};
use crate::error::{OrchestratorError, Result};
use crate::host::Host;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSummary {
    pub state: ActionState,
    pub status: ActionStatus,
}

/// The top-level `orchestrator.json` sidecar: enough to resume a run without
/// reloading the workflow definition from scratch, plus enough identifying state
/// (host, directories) that a resumed run behaves identically to the run that wrote
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    pub actions: HashMap<String, ActionSummary>,
    pub current_host: Option<String>,
    pub dry_run: bool,
    pub verbose: bool,
    pub save_location: PathBuf,
    pub log_location: PathBuf,
    pub working_directory: PathBuf,
}

/// Writes `value` as pretty JSON to `path` via write-then-rename: the new content
/// lands fully formed in a sibling temp file before replacing the target, so a
/// process killed mid-write leaves the previous snapshot intact rather than a
/// half-written one.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| OrchestratorError::Io {
        path: parent.to_path_buf(),
        source,
    })?;
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot")
    ));
    {
        let mut file = fs::File::create(&tmp_path).map_err(|source| OrchestratorError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(value)?;
        file.write_all(json.as_bytes()).map_err(|source| OrchestratorError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }
    fs::rename(&tmp_path, path).map_err(|source| OrchestratorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

pub fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).map_err(|source| OrchestratorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&data)?)
}

impl OrchestratorSnapshot {
    pub fn save(&self, save_location: &Path) -> Result<()> {
        save_json(&save_location.join("orchestrator.json"), self)
    }

    pub fn load(save_location: &Path) -> Result<Self> {
        load_json(&save_location.join("orchestrator.json"))
    }
}

/// Writes one JSON sidecar per action (named `<id>.action.json`) and one for the
/// active host (`host.json`), suitable for the external launcher binary to load
/// independently of the main process.
pub fn save_action_sidecar(save_location: &Path, action: &Action) -> Result<PathBuf> {
    let path = save_location.join(format!("{}.action.json", action.id));
    save_json(&path, action)?;
    Ok(path)
}

pub fn load_action_sidecar(path: &Path) -> Result<Action> {
    load_json(path)
}

pub fn save_host_sidecar(save_location: &Path, host: &Host) -> Result<PathBuf> {
    let path = save_location.join("host.json");
    save_json(&path, host)?;
    Ok(path)
}

pub fn load_host_sidecar(path: &Path) -> Result<Host> {
    load_json(path)
}

/// Resume policy applied to every action loaded from a snapshot, before the run
/// loop resumes: an action caught mid-flight when the process died is re-queued,
/// and errors/failures are optionally cleared so a rerun retries them rather than
/// treating them as terminal.
#[derive(Debug, Clone, Copy)]
pub struct ResumePolicy {
    pub clear_errors: bool,
    pub clear_failures: bool,
}

/// Applies [`ResumePolicy`] to a loaded action's state in place, per §4.6:
/// `Running -> Pending` unconditionally (nothing is still running, the process that
/// was running it is gone); `Error -> Pending` when `clear_errors`; a `Finished`
/// action whose status was `Failure` returns to `Pending` when `clear_failures`.
/// Every other state/status combination is left untouched.
pub fn apply_resume_policy(summary: &ActionSummary, policy: ResumePolicy) -> ActionSummary {
    let mut summary = summary.clone();
    match summary.state {
        ActionState::Running => {
            summary.state = ActionState::Pending;
            summary.status = ActionStatus::None;
        }
        ActionState::Error if policy.clear_errors => {
            summary.state = ActionState::Pending;
            summary.status = ActionStatus::None;
        }
        ActionState::Finished if summary.status == ActionStatus::Failure && policy.clear_failures => {
            summary.state = ActionState::Pending;
            summary.status = ActionStatus::None;
        }
        _ => {}
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut actions = HashMap::new();
        actions.insert(
            "build".to_string(),
            ActionSummary {
                state: ActionState::Finished,
                status: ActionStatus::Success,
            },
        );
        let snap = OrchestratorSnapshot {
            actions,
            current_host: Some("login1".to_string()),
            dry_run: false,
            verbose: false,
            save_location: dir.path().to_path_buf(),
            log_location: dir.path().join("log"),
            working_directory: dir.path().to_path_buf(),
        };
        snap.save(dir.path()).unwrap();
        let loaded = OrchestratorSnapshot::load(dir.path()).unwrap();
        assert_eq!(loaded.current_host.as_deref(), Some("login1"));
        assert_eq!(loaded.actions["build"].status, ActionStatus::Success);
    }

    #[test]
    fn running_always_resumes_to_pending() {
        let summary = ActionSummary {
            state: ActionState::Running,
            status: ActionStatus::None,
        };
        let resumed = apply_resume_policy(
            &summary,
            ResumePolicy {
                clear_errors: false,
                clear_failures: false,
            },
        );
        assert_eq!(resumed.state, ActionState::Pending);
    }

    #[test]
    fn failure_preserved_unless_clear_failures_set() {
        let summary = ActionSummary {
            state: ActionState::Finished,
            status: ActionStatus::Failure,
        };
        let preserved = apply_resume_policy(
            &summary,
            ResumePolicy {
                clear_errors: true,
                clear_failures: false,
            },
        );
        assert_eq!(preserved.state, ActionState::Finished);

        let cleared = apply_resume_policy(
            &summary,
            ResumePolicy {
                clear_errors: true,
                clear_failures: true,
            },
        );
        assert_eq!(cleared.state, ActionState::Pending);
    }
}
