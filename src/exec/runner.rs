//! Inner runner: the re-executed image that joins the cgroup and becomes the target.
//!
//! Reached only through `argv[0] == INNER_ENTRY`. Everything it needs arrives
//! as explicit arguments: `[target-path, cgroup-id, args...]`.

use crate::config::types::{LaunchStep, ParkerConfig, ParkerError, Result};
use crate::exec::launcher::{at, LaunchFailure};
use crate::kernel::cgroup::Cgroup;
use nix::unistd::execv;
use std::convert::Infallible;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Parsed hand-off arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerArgs {
    pub target: PathBuf,
    pub cgroup_id: String,
    /// `[basename(target), args...]`
    pub exec_argv: Vec<CString>,
}

fn to_cstring(value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes())
        .map_err(|_| ParkerError::Argument(format!("argument {:?} contains a NUL byte", value)))
}

impl InnerArgs {
    /// Parse the arguments that follow `argv[0]`.
    pub fn parse(args: &[OsString]) -> Result<Self> {
        if args.len() < 2 {
            return Err(ParkerError::Argument(format!(
                "expected <target-path> <cgroup-id> [args...], got {} argument(s)",
                args.len()
            )));
        }

        let target = PathBuf::from(&args[0]);
        let cgroup_id = args[1]
            .to_str()
            .ok_or_else(|| ParkerError::Argument(format!("cgroup id {:?} is not UTF-8", args[1])))?
            .to_string();

        let display_name = target
            .file_name()
            .ok_or_else(|| {
                ParkerError::Argument(format!("target {} has no file name", target.display()))
            })?;

        let mut exec_argv = Vec::with_capacity(args.len() - 1);
        exec_argv.push(to_cstring(display_name)?);
        for arg in &args[2..] {
            exec_argv.push(to_cstring(arg)?);
        }

        Ok(Self {
            target,
            cgroup_id,
            exec_argv,
        })
    }
}

/// Replace the current image with `target`. Only returns on failure.
pub fn exec_target(target: &Path, argv: &[CString]) -> Result<Infallible> {
    if !target.exists() {
        return Err(ParkerError::TargetNotFound(target.to_path_buf()));
    }

    let path = to_cstring(target.as_os_str())?;
    log::debug!("will exec, target: {}, args: {:?}", target.display(), argv);
    // environment is inherited unchanged
    execv(&path, argv)
        .map_err(|e| ParkerError::ExecFailed(format!("exec {}: {}", target.display(), e)))
}

/// Inner runner entry. Never returns on success.
pub fn run_inner(
    config: &ParkerConfig,
    args: &[OsString],
) -> std::result::Result<Infallible, LaunchFailure> {
    log::debug!("inner runner start, args: {:?}", args);
    let inner = at(LaunchStep::InnerArguments, InnerArgs::parse(args))?;

    let cgroup = at(
        LaunchStep::InnerRegister,
        Cgroup::open(config, &inner.cgroup_id),
    )?;
    let pid = std::process::id();
    at(LaunchStep::InnerRegister, cgroup.register(pid))?;
    log::debug!("pid {} registered in cgroup {}", pid, cgroup.id());

    at(
        LaunchStep::InnerExec,
        exec_target(&inner.target, &inner.exec_argv),
    )
}
