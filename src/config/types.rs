//! Core types shared by the builder, the launcher and the inner runner

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Name of the marker file that records which payload entry to execute
pub const TARGET_MARKER: &str = ".target_name";

/// File name the launcher stores the compressed payload under before unpacking
pub const STAGED_ARCHIVE: &str = ".parker.tar.gz";

/// Reserved `argv[0]` that routes the runner binary into the inner-runner entry
pub const INNER_ENTRY: &str = "parker-run-target";

/// Subdirectory under the cgroup hierarchy that holds every launch group
pub const CGROUP_PARENT_DIR: &str = "parker";

/// Default mount point of the cgroup hierarchy
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

pub const ENV_VERBOSE: &str = "PARKER_VERBOSE";
pub const ENV_RUNNER_PATH: &str = "RUNNER_PATH";
pub const ENV_CGROUP_ROOT: &str = "PARKER_CGROUP_ROOT";

/// Runtime configuration, threaded explicitly into every entry point.
#[derive(Clone, Debug, PartialEq)]
pub struct ParkerConfig {
    /// Emit debug diagnostics on standard output
    pub verbose: bool,
    /// Explicit runner stub location used by the builder
    pub runner_path: Option<PathBuf>,
    /// Mount point of the cgroup hierarchy
    pub cgroup_root: PathBuf,
}

impl Default for ParkerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            runner_path: None,
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
        }
    }
}

impl ParkerConfig {
    /// Build configuration from `PARKER_VERBOSE`, `RUNNER_PATH` and `PARKER_CGROUP_ROOT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ParkerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Self {
            verbose: non_empty(ENV_VERBOSE).is_some(),
            runner_path: non_empty(ENV_RUNNER_PATH).map(PathBuf::from),
            cgroup_root: non_empty(ENV_CGROUP_ROOT)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CGROUP_ROOT)),
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_runner_path(mut self, runner_path: Option<PathBuf>) -> Self {
        if runner_path.is_some() {
            self.runner_path = runner_path;
        }
        self
    }

    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = root.into();
        self
    }
}

/// Steps of a launch, in execution order. Used to label fatal diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchStep {
    ExtractPayload,
    IsolateNamespace,
    WritePayloadToDisk,
    Unpack,
    ResolveTarget,
    CreateCgroup,
    SpawnChild,
    Supervising,
    Cleanup,
    InnerArguments,
    InnerRegister,
    InnerExec,
}

impl LaunchStep {
    pub fn name(self) -> &'static str {
        match self {
            Self::ExtractPayload => "extract-payload",
            Self::IsolateNamespace => "isolate-namespace",
            Self::WritePayloadToDisk => "write-payload",
            Self::Unpack => "unpack",
            Self::ResolveTarget => "resolve-target",
            Self::CreateCgroup => "create-cgroup",
            Self::SpawnChild => "spawn-child",
            Self::Supervising => "supervise",
            Self::Cleanup => "cleanup",
            Self::InnerArguments => "inner-arguments",
            Self::InnerRegister => "inner-register",
            Self::InnerExec => "inner-exec",
        }
    }
}

impl fmt::Display for LaunchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a successful build, printed by `parker --json`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BuildReport {
    pub output: PathBuf,
    pub target: String,
    pub payload_root: PathBuf,
    pub runner: PathBuf,
    pub entries: usize,
    pub archive_bytes: u64,
}

/// Error types for packing, launching and running payloads
#[derive(Error, Debug)]
pub enum ParkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Build error: {0}")]
    Build(String),

    #[error("Trailer corrupt: {0}")]
    TrailerCorrupt(String),

    #[error("Truncated read: expected {expected} bytes, got {actual}")]
    TruncatedRead { expected: u64, actual: u64 },

    #[error("Extract error: {0}")]
    Extract(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Cgroup register failed: {0}")]
    RegisterFailed(String),

    #[error("Launch aborted: {0}")]
    AbortLaunch(String),

    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Target not found: {0}")]
    TargetNotFound(PathBuf),

    #[error("Exec failed: {0}")]
    ExecFailed(String),
}

pub type Result<T> = std::result::Result<T, ParkerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults_when_env_empty() {
        let config = ParkerConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, ParkerConfig::default());
        assert!(!config.verbose);
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
    }

    #[test]
    fn test_config_verbose_any_non_empty_value() {
        let config = ParkerConfig::from_lookup(lookup_from(&[(ENV_VERBOSE, "0")]));
        assert!(config.verbose);

        let config = ParkerConfig::from_lookup(lookup_from(&[(ENV_VERBOSE, "")]));
        assert!(!config.verbose);
    }

    #[test]
    fn test_config_runner_and_cgroup_overrides() {
        let config = ParkerConfig::from_lookup(lookup_from(&[
            (ENV_RUNNER_PATH, "/opt/parker/runner"),
            (ENV_CGROUP_ROOT, "/tmp/cg"),
        ]));
        assert_eq!(config.runner_path, Some(PathBuf::from("/opt/parker/runner")));
        assert_eq!(config.cgroup_root, PathBuf::from("/tmp/cg"));
    }

    #[test]
    fn test_with_runner_path_keeps_existing_on_none() {
        let config = ParkerConfig::default()
            .with_runner_path(Some(PathBuf::from("/a/runner")))
            .with_runner_path(None);
        assert_eq!(config.runner_path, Some(PathBuf::from("/a/runner")));
    }

    #[test]
    fn test_launch_step_display() {
        assert_eq!(LaunchStep::IsolateNamespace.to_string(), "isolate-namespace");
        assert_eq!(LaunchStep::InnerExec.to_string(), "inner-exec");
    }
}
