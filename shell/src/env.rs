use std::collections::HashMap;
use std::env as stdenv;
use std::path::{Path, PathBuf};

/// What a command sees of its surroundings when it is created.
///
/// The environment contains:
/// - `vars`: exported variables passed on top of the inherited process environment.
/// - `current_dir`: the working directory the command runs in.
/// - `report_faults`: whether a failing function command exits non-zero.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Exported variables (e.g. set through [`crate::Shell::export`]).
    pub vars: HashMap<String, String>,
    /// The working directory for command execution.
    pub current_dir: PathBuf,
    /// Surface function-command faults as exit code 1 instead of 0.
    pub report_faults: bool,
}

impl Environment {
    /// Start from the current working directory with nothing exported.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::in_dir(current_dir)
    }

    /// Environment rooted at `dir` with nothing exported.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            vars: HashMap::new(),
            current_dir: dir.into(),
            report_faults: false,
        }
    }

    /// Get the value of a variable.
    ///
    /// Looks up exported variables first, falling back to `std::env::var`.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Set or override an exported variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Resolve `path` against the working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir.join(path)
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::env::Environment;
    use std::path::Path;

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::in_dir("/tmp");

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE".to_string()));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
    }

    #[test]
    fn test_resolve_relative_against_current_dir() {
        let env = Environment::in_dir("/work");
        assert_eq!(env.resolve(Path::new("out.txt")), Path::new("/work/out.txt"));
        assert_eq!(env.resolve(Path::new("/abs/out.txt")), Path::new("/abs/out.txt"));
    }
}
