use crate::env::Environment;
use std::env as stdenv;
use std::path::PathBuf;

/// Variable holding the colon-separated scope search path.
pub const SEARCH_PATH_VAR: &str = "PIPEKIT_PATH";

/// Variable switching on non-zero exit codes for failing function commands.
pub const REPORT_FAULTS_VAR: &str = "PIPEKIT_REPORT_FAULTS";

/// Scope order used when no search path is configured.
pub const STANDARD_SEARCH_PATH: [&str; 4] = ["local", "user", "global", "standard"];

/// When a resolved call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// When the caller reads its output or calls it explicitly.
    #[default]
    OnRead,
    /// As soon as it is constructed. Not implemented.
    OnInit,
}

/// Settings a [`crate::Shell`] is built from.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub working_dir: PathBuf,
    /// Scope names searched in order; an empty list resolves everything to processes.
    pub search_path: Vec<String>,
    pub execution_mode: ExecutionMode,
    pub report_faults: bool,
}

impl ShellConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| stdenv::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let search_path = match lookup(SEARCH_PATH_VAR) {
            Some(path) => parse_search_path(&path),
            None => STANDARD_SEARCH_PATH.iter().map(|s| s.to_string()).collect(),
        };
        let report_faults = lookup(REPORT_FAULTS_VAR)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false);
        Self {
            working_dir: Environment::new().current_dir,
            search_path,
            execution_mode: ExecutionMode::OnRead,
            report_faults,
        }
    }

    /// Same configuration with another working directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_search_path(path: &str) -> Vec<String> {
    path.split(':')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
