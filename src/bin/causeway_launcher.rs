//! `causeway-launcher`: the external child-process entry point. Invoked as
//! `causeway-launcher <working_directory> <action_artifact_path>`, chdir's into the
//! working directory, loads the action and its host from their JSON sidecars,
//! applies the resolved environment, and runs the action's command.

use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::{bail, Context, Result};

use causeway::state;

fn main() -> Result<ExitCode> {
    causeway::logging::init(false);

    let mut args = std::env::args().skip(1);
    let working_directory: PathBuf = args
        .next()
        .context("missing working_directory argument")?
        .into();
    let action_file: PathBuf = args.next().context("missing action_file argument")?.into();

    std::env::set_current_dir(&working_directory)
        .with_context(|| format!("changing directory to {working_directory:?}"))?;

    let action = state::load_action_sidecar(&action_file)
        .with_context(|| format!("loading action from {action_file:?}"))?;

    let host_file = action
        .config
        .get("host_file")
        .and_then(|v| v.as_str())
        .context("action is missing \"host_file\" in its config")?;
    let host = state::load_host_sidecar(std::path::Path::new(host_file))
        .with_context(|| format!("loading host from {host_file:?}"))?;

    match host.has_environment(action.environment.as_deref()) {
        Some(environment) => environment.setup(),
        None if action.environment.is_some() => {
            bail!(
                "host {:?} is missing environment {:?}",
                host.name,
                action.environment
            )
        }
        None => {}
    }

    let Some((command, arguments)) = action.command_line() else {
        bail!("action {:?} has no \"command\" in its config", action.id);
    };

    if action.dry_run {
        println!("12345");
        return Ok(ExitCode::SUCCESS);
    }

    let status = Command::new(&command)
        .args(&arguments)
        .status()
        .with_context(|| format!("launching command {command:?}"))?;

    let code = status.code().unwrap_or(-1);
    Ok(ExitCode::from(code.clamp(0, 255) as u8))
}
