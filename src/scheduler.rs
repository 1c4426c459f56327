//! The run loop: advances actions through their state machine, acquiring host
//! resources, launching child processes, and persisting state after every
//! transition.
//!
//! Concurrency model: single-threaded and cooperative. The only suspension points
//! are reading a child process's stdout to completion and the fixed interval
//! between HPC job-status polls; nothing here runs two actions' launch sequences
//! interleaved.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::action::{dependency_met, Action, ActionState, ActionStatus};
use crate::config::OrchestratorSettings;
use crate::dag::Dag;
use crate::error::{OrchestratorError, Result};
use crate::host::{Host, HostKind};
use crate::resource::Amount;
use crate::state::{self, ActionSummary, OrchestratorSnapshot, ResumePolicy};

pub struct Scheduler {
    pub actions: HashMap<String, Action>,
    pub hosts: HashMap<String, Host>,
    pub current_host: String,
    pub settings: OrchestratorSettings,
    dag: Dag,
}

/// The outcome of a single `run_actions` invocation: `true` when every action in
/// the traversal reached `Finished`/`Skipped` without error, `false` otherwise. The
/// caller (the CLI binary) maps this to a process exit code.
pub type RunOutcome = bool;

impl Scheduler {
    pub fn new(
        actions: HashMap<String, Action>,
        hosts: HashMap<String, Host>,
        current_host: String,
        settings: OrchestratorSettings,
    ) -> Self {
        Scheduler {
            actions,
            hosts,
            current_host,
            settings,
            dag: Dag::new(),
        }
    }

    fn construct_dag(&mut self) -> Result<()> {
        let mut dag = Dag::new();
        for action in self.actions.values() {
            dag.add_node(&action.id);
            for upstream in action.dependencies.keys() {
                if !self.actions.contains_key(upstream) {
                    return Err(OrchestratorError::Config(format!(
                        "action {:?} depends on unknown action {:?}",
                        action.id, upstream
                    )));
                }
                dag.add_edge(upstream, &action.id);
            }
        }
        dag.check_acyclic()?;
        self.dag = dag;
        Ok(())
    }

    /// Walks the full traversal and collects every action whose environment the
    /// current host cannot provide, raising once with the complete list rather
    /// than failing on the first action and leaving later ones undiagnosed.
    fn check_environments(&self, traversal: &[String]) -> Result<()> {
        let host = self.host()?;
        let mut missing = Vec::new();
        for id in traversal {
            let action = &self.actions[id];
            // An action that doesn't name an environment runs with none; only an
            // explicitly named environment the host lacks is an error.
            if let Some(name) = action.environment.as_deref() {
                if host.has_environment(Some(name)).is_none() {
                    missing.push(format!("{id} needs {name:?}"));
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Config(format!(
                "host {:?} is missing environments: {}",
                self.current_host,
                missing.join(", ")
            )))
        }
    }

    /// Walks the full traversal and collects every action whose resource request
    /// can never be satisfied by the current host (unknown resource, or a request
    /// exceeding total capacity outright), raising once with the complete list
    /// rather than discovering offenders one at a time as the run loop reaches them.
    fn check_resource_feasibility(&self, traversal: &[String]) -> Result<()> {
        let host = self.host()?;
        if host.is_hpc() {
            // HPC requests are packed per-submission by the requisition planner
            // (and may carry a manual "select" string rather than a plain amount);
            // feasibility is resolved there, not against a flat pool.
            return Ok(());
        }
        let mut offenders = Vec::new();
        for id in traversal {
            let action = &self.actions[id];
            for (resource, raw) in &action.resources {
                let amount = Amount::parse(raw)?;
                match host.resources_available(resource, amount) {
                    Ok(_) => {}
                    Err(OrchestratorError::ResourceOvercommit { resource, requested, total, .. }) => {
                        offenders.push(format!("{id} requests {requested} of {resource:?}, exceeding total {total}"));
                    }
                    Err(OrchestratorError::UnknownResource(name)) => {
                        offenders.push(format!("{id} requests unknown resource {name:?}"));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        if offenders.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Config(format!(
                "host {:?} cannot satisfy resource requests: {}",
                self.current_host,
                offenders.join(", ")
            )))
        }
    }

    fn host(&self) -> Result<&Host> {
        self.hosts
            .get(&self.current_host)
            .ok_or_else(|| OrchestratorError::Config(format!("unknown host {:?}", self.current_host)))
    }

    fn host_mut(&mut self) -> Result<&mut Host> {
        self.hosts
            .get_mut(&self.current_host)
            .ok_or_else(|| OrchestratorError::Config(format!("unknown host {:?}", self.current_host)))
    }

    /// Runs every action reachable (by dependency) from `goal_ids`, returning
    /// whether the whole traversal completed without an unrecovered error.
    pub fn run_actions(&mut self, goal_ids: &[String]) -> Result<RunOutcome> {
        self.construct_dag()?;
        let traversal = self.dag.traversal_to(goal_ids);
        self.check_environments(&traversal)?;
        self.check_resource_feasibility(&traversal)?;

        let mut list = self.dag.traversal_list(goal_ids);
        for id in &traversal {
            let action = self.actions.get_mut(id).unwrap();
            if action.state == ActionState::Inactive {
                action.mark_pending();
            }
        }

        let mut retry_buffer: VecDeque<String> = VecDeque::new();
        let mut success = true;

        loop {
            let mut ready = Dag::ready_nodes(&mut list);
            ready.extend(retry_buffer.drain(..));
            if ready.is_empty() {
                break;
            }

            let mut made_progress = false;
            let mut still_blocked = Vec::new();

            for id in ready {
                match self.try_run_one(&id) {
                    Ok(true) => {
                        made_progress = true;
                        self.dag.node_complete(&id, &mut list);
                        self.save_snapshot()?;
                    }
                    Ok(false) => {
                        still_blocked.push(id);
                    }
                    Err(e) if e.is_transient() => {
                        still_blocked.push(id);
                    }
                    Err(OrchestratorError::RequirementUnmet { action, reason }) => {
                        if self.settings.skip_unrunnable {
                            warn!(action, reason, "skipping unrunnable action");
                            self.actions.get_mut(&action).unwrap().mark_skipped();
                            self.dag.node_complete(&action, &mut list);
                            made_progress = true;
                            self.save_snapshot()?;
                        } else {
                            return Err(OrchestratorError::RequirementUnmet { action, reason });
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            if !made_progress && !still_blocked.is_empty() {
                warn!(blocked = ?still_blocked, "no action could make progress this pass; stopping");
                success = false;
                break;
            }
            retry_buffer.extend(still_blocked);
        }

        for id in &traversal {
            if self.actions[id].state == ActionState::Error
                || (self.actions[id].state == ActionState::Finished
                    && self.actions[id].status == ActionStatus::Failure)
            {
                success = false;
            }
        }
        Ok(success)
    }

    /// Attempts to advance one ready action. `Ok(true)` means it reached a terminal
    /// state and its children may now be considered; `Ok(false)` means its
    /// dependency kinds are not (yet, or ever) satisfied and the dependency check
    /// itself handled the outcome without raising.
    fn try_run_one(&mut self, id: &str) -> Result<bool> {
        if matches!(
            self.actions[id].state,
            ActionState::Finished | ActionState::Skipped | ActionState::Error
        ) {
            // Already resolved by a prior run (or preset by the caller); nothing to
            // launch, but its dependents still need to see it as complete.
            return Ok(true);
        }

        let unmet: Vec<String> = {
            let action = &self.actions[id];
            action
                .dependencies
                .iter()
                .filter(|(upstream, kind)| {
                    let up = &self.actions[upstream.as_str()];
                    !dependency_met(**kind, up.state, up.status)
                })
                .map(|(upstream, _)| upstream.clone())
                .collect()
        };
        if !unmet.is_empty() {
            return Err(OrchestratorError::RequirementUnmet {
                action: id.to_string(),
                reason: format!("unmet dependencies: {}", unmet.join(", ")),
            });
        }

        let is_hpc = self.host()?.is_hpc();
        if !is_hpc {
            // Parsed here, not for HPC actions: an HPC request's resources may carry
            // a manual "select" string rather than a single amount, which
            // `hpc::requisition` parses itself.
            let resources: Vec<(String, Amount)> = {
                let action = &self.actions[id];
                let mut parsed = Vec::new();
                for (resource, raw) in &action.resources {
                    parsed.push((resource.clone(), Amount::parse(raw)?));
                }
                parsed
            };
            let mut acquired: Vec<(String, Amount)> = Vec::new();
            for (resource, amount) in &resources {
                match self.host_mut()?.acquire_resources(id, resource, *amount) {
                    Ok(()) => acquired.push((resource.clone(), *amount)),
                    Err(e) => {
                        for (resource, amount) in &acquired {
                            self.host_mut()?.release_resources(resource, *amount);
                        }
                        return Err(e);
                    }
                }
            }
            self.actions.get_mut(id).unwrap().mark_running();
            self.save_snapshot()?;
            let outcome = self.launch_local(id);
            for (resource, amount) in &acquired {
                self.host_mut()?.release_resources(resource, *amount);
            }
            if let Err(e) = outcome {
                self.actions.get_mut(id).unwrap().mark_error();
                self.save_snapshot()?;
                return Err(e);
            }
        } else {
            self.actions.get_mut(id).unwrap().mark_running();
            self.save_snapshot()?;
            if let Err(e) = self.launch_hpc(id) {
                self.actions.get_mut(id).unwrap().mark_error();
                self.save_snapshot()?;
                return Err(e);
            }
        }
        Ok(true)
    }

    fn logfile_path(&self, id: &str) -> PathBuf {
        self.settings.log_location.join(format!("{id}.log"))
    }

    fn save_snapshot(&self) -> Result<()> {
        let summaries = self
            .actions
            .iter()
            .map(|(id, a)| {
                (
                    id.clone(),
                    ActionSummary {
                        state: a.state,
                        status: a.status,
                    },
                )
            })
            .collect();
        let snapshot = OrchestratorSnapshot {
            actions: summaries,
            current_host: Some(self.current_host.clone()),
            dry_run: self.actions.values().any(|a| a.dry_run),
            verbose: self.actions.values().any(|a| a.verbose),
            save_location: self.settings.save_location.clone(),
            log_location: self.settings.log_location.clone(),
            working_directory: self.settings.working_directory.clone(),
        };
        snapshot.save(&self.settings.save_location)
    }

    /// Restores action state from a prior snapshot, applying the configured resume
    /// policy. Actions with no recorded summary (new since the snapshot was
    /// written) are left untouched.
    pub fn resume_from_snapshot(&mut self) -> Result<()> {
        let snapshot = match OrchestratorSnapshot::load(&self.settings.save_location) {
            Ok(s) => s,
            Err(OrchestratorError::Io { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let policy = ResumePolicy {
            clear_errors: self.settings.clear_errors,
            clear_failures: self.settings.clear_failures,
        };
        for (id, summary) in &snapshot.actions {
            let Some(action) = self.actions.get_mut(id) else {
                continue;
            };
            let resumed = state::apply_resume_policy(summary, policy);
            action.state = resumed.state;
            action.status = resumed.status;
        }
        Ok(())
    }

    fn launch_local(&mut self, id: &str) -> Result<()> {
        let action = self.actions[id].clone();
        if action.dry_run {
            info!(action = id, "dry run: skipping launch");
            self.actions.get_mut(id).unwrap().mark_finished(ActionStatus::Success);
            return Ok(());
        }

        let action_sidecar = state::save_action_sidecar(&self.settings.save_location, &action)?;
        let host_sidecar = state::save_host_sidecar(&self.settings.save_location, self.host()?)?;
        self.actions
            .get_mut(id)
            .unwrap()
            .config
            .insert("host_file".to_string(), serde_json::json!(host_sidecar));
        state::save_action_sidecar(&self.settings.save_location, &self.actions[id])?;

        let logfile = self.logfile_path(id);
        if let Some(parent) = logfile.parent() {
            std::fs::create_dir_all(parent).map_err(|source| OrchestratorError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut child = Command::new(&self.settings.launcher_path)
            .arg(&self.settings.working_directory)
            .arg(&action_sidecar)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| OrchestratorError::LaunchError {
                action: id.to_string(),
                source,
            })?;

        let mut log = File::create(&logfile).ok();
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(std::result::Result::ok) {
                if action.verbose {
                    println!("[{id}] {line}");
                }
                if let Some(log) = log.as_mut() {
                    let _ = writeln!(log, "{line}");
                }
            }
        }

        let status = child.wait().map_err(|source| OrchestratorError::LaunchError {
            action: id.to_string(),
            source,
        })?;

        let success = status.success();
        self.actions
            .get_mut(id)
            .unwrap()
            .mark_finished(if success { ActionStatus::Success } else { ActionStatus::Failure });
        Ok(())
    }

    fn launch_hpc(&mut self, id: &str) -> Result<()> {
        // Raw strings, not pre-parsed amounts: a "select" entry carries a manual
        // PBS-style string rather than a single amount, and `hpc::requisition`
        // dispatches on its presence before parsing anything else.
        let request: HashMap<String, String> = self.actions[id].resources.clone();

        let (node_classes, queue, account, submit_command, status_command) = match &self.host()?.kind {
            HostKind::Hpc {
                node_classes,
                submit_defaults,
            } => (
                node_classes.clone(),
                submit_defaults.queue.clone(),
                submit_defaults.account.clone(),
                vec!["qsub".to_string()],
                vec!["qstat".to_string(), "{job_id}".to_string()],
            ),
            HostKind::Local { .. } => {
                return Err(OrchestratorError::Config(format!(
                    "host {:?} is not an HPC host",
                    self.current_host
                )))
            }
        };

        let chunks = crate::hpc::requisition(&request, &node_classes)?;
        let mut args = crate::hpc::requisition_to_submit_args(&chunks);
        if let Some(queue) = queue {
            args.push("-q".to_string());
            args.push(queue);
        }
        if let Some(account) = account {
            args.push("-A".to_string());
            args.push(account);
        }
        if let Some(timelimit) = self.actions[id].timelimit.clone() {
            args.push("-l".to_string());
            args.push(format!("walltime={timelimit}"));
        }
        if let Some((command, rest)) = self.actions[id].command_line() {
            args.push("--".to_string());
            args.push(command);
            args.extend(rest);
        }

        let output = Command::new(&submit_command[0])
            .args(&submit_command[1..])
            .args(&args)
            .output()
            .map_err(|source| OrchestratorError::LaunchError {
                action: id.to_string(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let job_id = crate::hpc::extract_job_id(&stdout).ok_or_else(|| OrchestratorError::LaunchError {
            action: id.to_string(),
            source: std::io::Error::other("submission produced no job id"),
        })?;
        info!(action = id, job_id, "submitted HPC job");

        self.actions.get_mut(id).unwrap().mark_finished(ActionStatus::Submitted);

        let poll_interval = Duration::from_secs(self.settings.hpc_poll_interval_secs);
        loop {
            let status_args: Vec<String> = status_command
                .iter()
                .map(|s| s.replace("{job_id}", &job_id))
                .collect();
            let poll = Command::new(&status_args[0]).args(&status_args[1..]).output();
            let (code, text) = match poll {
                Ok(out) => (out.status.code().unwrap_or(-1), String::from_utf8_lossy(&out.stdout).to_string()),
                Err(_) => (-1, String::new()),
            };
            if !crate::hpc::job_still_running(code, &text) {
                break;
            }
            thread::sleep(poll_interval);
        }
        Ok(())
    }
}
