//! Orchestrator-level settings: directory locations and run-loop policy, loaded
//! from an optional TOML file and overridden by `CAUSEWAY_*` environment variables.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub save_location: PathBuf,
    pub log_location: PathBuf,
    pub working_directory: PathBuf,
    pub clear_errors: bool,
    pub clear_failures: bool,
    pub skip_unrunnable: bool,
    pub hpc_poll_interval_secs: u64,
    pub launcher_path: PathBuf,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            save_location: PathBuf::from("./tmp"),
            log_location: PathBuf::from("./log"),
            working_directory: PathBuf::from("./"),
            clear_errors: true,
            clear_failures: true,
            skip_unrunnable: false,
            hpc_poll_interval_secs: 60,
            launcher_path: PathBuf::from("causeway-launcher"),
        }
    }
}

impl OrchestratorSettings {
    /// Loads settings from `path` if given (a TOML file), falling back to defaults,
    /// then applies any `CAUSEWAY_*` environment variable overrides on top -- the
    /// same file-then-environment precedence the rest of the crate's configuration
    /// loading uses.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| OrchestratorError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text)
                    .map_err(|e| OrchestratorError::Config(format!("invalid settings file {path:?}: {e}")))?
            }
            None => OrchestratorSettings::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CAUSEWAY_SAVE_LOCATION") {
            self.save_location = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_LOG_LOCATION") {
            self.log_location = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_WORKING_DIRECTORY") {
            self.working_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_CLEAR_ERRORS") {
            self.clear_errors = parse_bool_env(&v, self.clear_errors);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_CLEAR_FAILURES") {
            self.clear_failures = parse_bool_env(&v, self.clear_failures);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_SKIP_UNRUNNABLE") {
            self.skip_unrunnable = parse_bool_env(&v, self.skip_unrunnable);
        }
        if let Ok(v) = std::env::var("CAUSEWAY_HPC_POLL_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.hpc_poll_interval_secs = n;
            }
        }
    }
}

fn parse_bool_env(v: &str, fallback: bool) -> bool {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.hpc_poll_interval_secs, 60);
        assert!(settings.clear_errors);
    }

    #[test]
    fn env_override_wins_over_file_default() {
        unsafe { std::env::set_var("CAUSEWAY_HPC_POLL_INTERVAL_SECS", "5") };
        let settings = OrchestratorSettings::load(None).unwrap();
        assert_eq!(settings.hpc_poll_interval_secs, 5);
        unsafe { std::env::remove_var("CAUSEWAY_HPC_POLL_INTERVAL_SECS") };
    }
}
