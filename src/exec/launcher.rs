//! Launcher supervisor: unpack, isolate, confine and supervise one payload.
//!
//! The launch sequence is a type-state chain so steps cannot be reordered:
//!
//! Fresh -> PayloadLoaded -> Isolated -> PayloadWritten -> Unpacked ->
//! TargetResolved -> CgroupReady -> Supervised -> Finished
//!
//! Each step consumes the prior state. Any failure ends the launch; there is
//! no retry and no degraded mode.

use crate::archive::extract::{read_embedded_archive, unpack_file, UnpackSummary};
use crate::config::types::{
    LaunchStep, ParkerConfig, ParkerError, Result, INNER_ENTRY, STAGED_ARCHIVE, TARGET_MARKER,
};
use crate::exec::supervisor;
use crate::kernel::cgroup::Cgroup;
use crate::kernel::namespace;
use crate::kernel::signal::SignalRelay;
use crossbeam_channel::Receiver;
use nix::sched::{unshare, CloneFlags};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::os::unix::process::CommandExt;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};

/// Path that always resolves to the running image, even after the
/// executable's directory has been shadowed by the tmpfs.
pub const SELF_EXE: &str = "/proc/self/exe";

/// A failed launch step with the place it was detected
#[derive(Debug)]
pub struct LaunchFailure {
    pub step: LaunchStep,
    pub error: ParkerError,
    pub location: &'static Location<'static>,
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at {}:{}: {}",
            self.step,
            self.location.file(),
            self.location.line(),
            self.error
        )
    }
}

impl std::error::Error for LaunchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Tag a step result with its step and the caller's location.
#[track_caller]
pub fn at<T>(step: LaunchStep, result: Result<T>) -> std::result::Result<T, LaunchFailure> {
    let location = Location::caller();
    result.map_err(|error| LaunchFailure {
        step,
        error,
        location,
    })
}

/// Type-state marker: nothing done yet
pub struct Fresh;

/// Type-state marker: compressed archive recovered from the trailer
pub struct PayloadLoaded {
    archive: Vec<u8>,
}

/// Type-state marker: private mount namespace with tmpfs on the workdir
pub struct Isolated {
    archive: Vec<u8>,
}

/// Type-state marker: archive staged inside the tmpfs
pub struct PayloadWritten {
    archive_path: PathBuf,
}

/// Type-state marker: payload tree unpacked
pub struct Unpacked {
    summary: UnpackSummary,
}

/// Type-state marker: entry executable located
pub struct TargetResolved {
    target: PathBuf,
}

/// Type-state marker: control group created, child not yet started
pub struct CgroupReady {
    target: PathBuf,
    cgroup: Cgroup,
}

/// One launch moving through its steps
pub struct Launch<S> {
    config: ParkerConfig,
    exe: PathBuf,
    workdir: PathBuf,
    state: S,
}

impl<S> Launch<S> {
    fn advance<N>(self, state: N) -> Launch<N> {
        Launch {
            config: self.config,
            exe: self.exe,
            workdir: self.workdir,
            state,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }
}

impl Launch<Fresh> {
    /// Launch of the running executable; the workdir is the executable's directory.
    pub fn current(config: ParkerConfig) -> Result<Self> {
        let exe = std::env::current_exe()?;
        Self::for_image(config, exe)
    }

    /// Launch of an explicit self-extracting image.
    pub fn for_image(config: ParkerConfig, exe: PathBuf) -> Result<Self> {
        let workdir = exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ParkerError::NotFound(format!("{} has no parent", exe.display())))?;

        log::debug!("exe_path: {}, workdir: {}", exe.display(), workdir.display());
        Ok(Self {
            config,
            exe,
            workdir,
            state: Fresh,
        })
    }

    pub fn extract_payload(self) -> Result<Launch<PayloadLoaded>> {
        let archive = read_embedded_archive(&self.exe)?;
        Ok(self.advance(PayloadLoaded { archive }))
    }
}

impl Launch<PayloadLoaded> {
    pub fn isolate_namespace(self) -> Result<Launch<Isolated>> {
        namespace::isolate_workdir(&self.workdir)?;
        let archive = self.state.archive;
        Ok(Launch {
            config: self.config,
            exe: self.exe,
            workdir: self.workdir,
            state: Isolated { archive },
        })
    }
}

impl Launch<Isolated> {
    pub fn write_payload(self) -> Result<Launch<PayloadWritten>> {
        let archive_path = self.workdir.join(STAGED_ARCHIVE);
        fs::write(&archive_path, &self.state.archive)?;
        log::debug!(
            "write archive success: {}, buf len: {}",
            archive_path.display(),
            self.state.archive.len()
        );
        Ok(self.advance(PayloadWritten { archive_path }))
    }
}

impl Launch<PayloadWritten> {
    pub fn unpack(self) -> Result<Launch<Unpacked>> {
        let summary = unpack_file(&self.state.archive_path, &self.workdir)?;
        fs::remove_file(&self.state.archive_path)?;
        Ok(self.advance(Unpacked { summary }))
    }
}

impl Launch<Unpacked> {
    pub fn summary(&self) -> UnpackSummary {
        self.state.summary
    }

    pub fn resolve_target(self) -> Result<Launch<TargetResolved>> {
        let target = read_target(&self.workdir)?;
        Ok(self.advance(TargetResolved { target }))
    }
}

impl Launch<TargetResolved> {
    pub fn target(&self) -> &Path {
        &self.state.target
    }

    pub fn create_cgroup(self) -> Result<Launch<CgroupReady>> {
        let cgroup = Cgroup::new(&self.config, None)?;
        let target = self.state.target.clone();
        Ok(self.advance(CgroupReady { target, cgroup }))
    }
}

impl Launch<CgroupReady> {
    pub fn cgroup(&self) -> &Cgroup {
        &self.state.cgroup
    }

    /// Run a pre-spawn setup step. The group is cleared if the step fails.
    pub fn prepare<T>(self, step: impl FnOnce() -> Result<T>) -> Result<(Self, T)> {
        match step() {
            Ok(value) => Ok((self, value)),
            Err(e) => Err(self.abandon(e)),
        }
    }

    /// Drop the launch before a child exists, removing the group it created.
    fn abandon(self, error: ParkerError) -> ParkerError {
        if let Err(clear_err) = self.state.cgroup.clear() {
            log::warn!("Failed to clear cgroup after launch error: {}", clear_err);
        }
        error
    }

    /// Re-exec the running image as the inner runner.
    pub fn spawn(self, args: &[OsString]) -> Result<Supervised> {
        let mut command = inner_command(&self.state.target, self.state.cgroup.id(), args);

        match command.spawn() {
            Ok(child) => {
                log::debug!("start inner runner success, pid: {}", child.id());
                Ok(Supervised {
                    child,
                    cgroup: self.state.cgroup,
                })
            }
            Err(e) => Err(self.abandon(ParkerError::AbortLaunch(format!(
                "failed to start inner runner: {}",
                e
            )))),
        }
    }
}

/// Running child plus the group it will register into
pub struct Supervised {
    child: Child,
    cgroup: Cgroup,
}

impl Supervised {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Relay signals until the child completes.
    pub fn supervise(self, signals: &Receiver<libc::c_int>) -> Result<Finished> {
        let Supervised { child, cgroup } = self;
        match supervisor::supervise(child, signals) {
            Ok(status) => Ok(Finished { status, cgroup }),
            Err(e) => {
                if let Err(clear_err) = cgroup.clear() {
                    log::warn!("Failed to clear cgroup after supervise error: {}", clear_err);
                }
                Err(e)
            }
        }
    }
}

/// Child reaped; only teardown is left
pub struct Finished {
    status: ExitStatus,
    cgroup: Cgroup,
}

impl Finished {
    pub fn status(&self) -> ExitStatus {
        self.status
    }

    /// Kill remaining members and remove the group.
    pub fn cleanup(self) -> Result<ExitStatus> {
        self.cgroup.clear()?;
        log::debug!("cgroup {} cleared", self.cgroup.id());
        Ok(self.status)
    }
}

/// Read the marker and resolve the entry executable inside `workdir`.
pub fn read_target(workdir: &Path) -> Result<PathBuf> {
    let marker = workdir.join(TARGET_MARKER);
    let raw = fs::read_to_string(&marker).map_err(|e| {
        ParkerError::TargetNotFound(PathBuf::from(format!("{} ({})", marker.display(), e)))
    })?;

    let name = raw.trim_end_matches(['\n', '\r']);
    if name.is_empty() {
        return Err(ParkerError::TargetNotFound(marker));
    }

    let target = workdir.join(name);
    if !target.exists() {
        return Err(ParkerError::TargetNotFound(target));
    }
    Ok(target)
}

/// `argv = [INNER_ENTRY, target, cgroup-id, args...]`, mount namespace copied
/// from the already-isolated parent.
pub fn inner_command(target: &Path, cgroup_id: &str, args: &[OsString]) -> Command {
    let mut command = Command::new(SELF_EXE);
    command.arg0(INNER_ENTRY).arg(target).arg(cgroup_id).args(args);

    // SAFETY: unshare(2) is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| unshare(CloneFlags::CLONE_NEWNS).map_err(std::io::Error::from));
    }
    command
}

/// Drive a whole launch of the running image. Returns the child's exit status.
pub fn launch(
    config: ParkerConfig,
    args: &[OsString],
) -> std::result::Result<ExitStatus, LaunchFailure> {
    let launch = at(LaunchStep::ExtractPayload, Launch::current(config))?;
    let launch = at(LaunchStep::ExtractPayload, launch.extract_payload())?;
    let launch = at(LaunchStep::IsolateNamespace, launch.isolate_namespace())?;
    let launch = at(LaunchStep::WritePayloadToDisk, launch.write_payload())?;
    let launch = at(LaunchStep::Unpack, launch.unpack())?;
    log::debug!("unpacked payload: {:?}", launch.summary());
    let launch = at(LaunchStep::ResolveTarget, launch.resolve_target())?;
    log::debug!("target: {}", launch.target().display());
    let launch = at(LaunchStep::CreateCgroup, launch.create_cgroup())?;

    let (launch, relay) = at(
        LaunchStep::SpawnChild,
        launch.prepare(|| SignalRelay::install().map_err(ParkerError::from)),
    )?;
    let supervised = at(LaunchStep::SpawnChild, launch.spawn(args))?;
    log::debug!("supervising pid {}", supervised.pid());

    let finished = at(LaunchStep::Supervising, supervised.supervise(relay.receiver()))?;
    drop(relay);

    at(LaunchStep::Cleanup, finished.cleanup())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_target_from_marker() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app"), b"#!/bin/sh\n").unwrap();
        fs::write(dir.path().join(TARGET_MARKER), b"app\n").unwrap();

        assert_eq!(read_target(dir.path()).unwrap(), dir.path().join("app"));
    }

    #[test]
    fn test_read_target_missing_marker_or_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_target(dir.path()),
            Err(ParkerError::TargetNotFound(_))
        ));

        fs::write(dir.path().join(TARGET_MARKER), b"ghost").unwrap();
        assert!(matches!(
            read_target(dir.path()),
            Err(ParkerError::TargetNotFound(_))
        ));
    }

    #[test]
    fn test_inner_command_argument_contract() {
        let args = vec![OsString::from("--port"), OsString::from("8080")];
        let command = inner_command(Path::new("/w/app"), "abc", &args);

        assert_eq!(command.get_program(), SELF_EXE);
        let got: Vec<_> = command.get_args().collect();
        assert_eq!(got, vec!["/w/app", "abc", "--port", "8080"]);
    }

    #[test]
    fn test_failure_display_names_step_and_location() {
        let failure = at::<()>(
            LaunchStep::Cleanup,
            Err(ParkerError::AbortLaunch("boom".to_string())),
        )
        .unwrap_err();
        let text = failure.to_string();
        assert!(text.starts_with("cleanup failed at "));
        assert!(text.contains("launcher.rs:"));
        assert!(text.ends_with("Launch aborted: boom"));
    }

    fn fake_ready_launch(root: &Path) -> Launch<CgroupReady> {
        fs::write(root.join("cgroup.controllers"), "").unwrap();
        let config = ParkerConfig::default().with_cgroup_root(root);
        let cgroup = Cgroup::new(&config, None).unwrap();
        Launch {
            config,
            exe: root.join("app-c"),
            workdir: root.to_path_buf(),
            state: CgroupReady {
                target: root.join("app"),
                cgroup,
            },
        }
    }

    #[test]
    fn test_failed_prepare_clears_cgroup() {
        let dir = tempfile::tempdir().unwrap();
        let launch = fake_ready_launch(dir.path());
        let group = launch.cgroup().path().to_path_buf();
        assert!(group.is_dir());

        let result = launch.prepare(|| -> Result<()> {
            Err(ParkerError::Io(std::io::Error::other("no signal relay")))
        });
        assert!(matches!(result, Err(ParkerError::Io(_))));
        assert!(!group.exists());
    }

    #[test]
    fn test_successful_prepare_keeps_cgroup() {
        let dir = tempfile::tempdir().unwrap();
        let launch = fake_ready_launch(dir.path());

        let (launch, value) = launch.prepare(|| Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert!(launch.cgroup().path().is_dir());
        launch.cgroup().clear().unwrap();
    }

    #[test]
    fn test_missing_image_fails_extract() {
        let launch = Launch::for_image(
            ParkerConfig::default(),
            PathBuf::from("/nonexistent/parker/app-c"),
        )
        .unwrap();
        assert!(launch.extract_payload().is_err());
    }
}
