//! `causeway` CLI: loads a workflow definition and drives the scheduler.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use tracing::info;

use causeway::config::OrchestratorSettings;
use causeway::scheduler::Scheduler;
use causeway::workflow;

/// Entry point for orchestrating actions declared in a workflow definition file.
#[derive(Parser, Debug)]
#[command(name = "causeway", about = "Run or inspect a workflow of dependent actions")]
struct Cli {
    /// Path to the workflow definition file (JSON).
    #[arg(short, long)]
    workflow: PathBuf,

    /// Actions to run; if omitted, every action matching --filter is selected.
    #[arg(short, long, num_args = 1..)]
    actions: Vec<String>,

    /// Regex selecting actions to run when --actions is not given.
    #[arg(short, long, default_value = ".*")]
    filter: String,

    /// Run as a specific host rather than matching the local machine.
    #[arg(long = "host")]
    specific_host: Option<String>,

    #[arg(long)]
    save_location: Option<PathBuf>,

    #[arg(long)]
    log_location: Option<PathBuf>,

    #[arg(long)]
    working_dir: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    /// List matching actions instead of running them.
    #[arg(short, long)]
    list: bool,

    /// Run matching actions as a dry run (no child processes are launched).
    #[arg(short, long = "dry-run")]
    dry_run: bool,

    /// Start fresh, ignoring any previously saved state.
    #[arg(short, long)]
    new: bool,

    #[arg(long)]
    settings: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    causeway::logging::init(cli.verbose);

    let mut settings = OrchestratorSettings::load(cli.settings.as_deref())?;
    if let Some(v) = cli.save_location.clone() {
        settings.save_location = v;
    }
    if let Some(v) = cli.log_location.clone() {
        settings.log_location = v;
    }
    if let Some(v) = cli.working_dir.clone() {
        settings.working_directory = v;
    }

    let definition = workflow::load(&cli.workflow)
        .with_context(|| format!("loading workflow definition {:?}", cli.workflow))?;

    let host_name = select_host(&definition.hosts, cli.specific_host.as_deref())?;

    let mut actions = definition.actions;
    if cli.verbose || cli.dry_run {
        for action in actions.values_mut() {
            if cli.verbose {
                action.verbose = true;
            }
            if cli.dry_run {
                action.dry_run = true;
            }
        }
    }

    let action_ids: Vec<String> = if !cli.actions.is_empty() {
        cli.actions.clone()
    } else {
        let pattern = Regex::new(&cli.filter).context("invalid --filter pattern")?;
        let mut matched: Vec<String> = actions.keys().filter(|id| pattern.is_match(id)).cloned().collect();
        matched.sort();
        matched
    };

    if action_ids.is_empty() {
        eprintln!("no actions selected");
        return Ok(ExitCode::FAILURE);
    }

    if cli.list {
        for id in &action_ids {
            println!("{id}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut scheduler = Scheduler::new(actions, definition.hosts, host_name, settings);
    if !cli.new {
        scheduler.resume_from_snapshot()?;
    }

    let success = scheduler.run_actions(&action_ids)?;
    info!(success, "run finished");
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Picks the host to run as: an explicit `--host` override, or the first declared
/// host whose name/alias matches the local machine's hostname.
fn select_host(hosts: &HashMap<String, causeway::host::Host>, specific: Option<&str>) -> Result<String> {
    if let Some(name) = specific {
        if hosts.contains_key(name) {
            return Ok(name.to_string());
        }
        anyhow::bail!("no such host {name:?} in workflow definition");
    }

    let fqdn = local_fqdn();
    hosts
        .values()
        .find(|h| h.matches(&fqdn))
        .map(|h| h.name.clone())
        .with_context(|| format!("no host in workflow definition matches local machine {fqdn:?}"))
}

fn local_fqdn() -> String {
    Command::new("hostname")
        .arg("-f")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_default()
}
