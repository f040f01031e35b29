//! Per-launch control group: create, register members, kill and remove.

use crate::config::types::{ParkerConfig, ParkerError, Result};
use crate::kernel::cgroup::backend::{detect_version, CgroupVersion, PROCS_FILE};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const ID_LEN: usize = 32;

/// How long `clear` waits for killed members to leave the group
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Handle to one launch's control group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cgroup {
    id: String,
    version: CgroupVersion,
    path: PathBuf,
    procs_path: PathBuf,
}

/// Random alphanumeric group identifier
pub fn generate_id() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(ID_LEN)
        .collect()
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 255
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ParkerError::Argument(format!("invalid cgroup id {:?}", id)))
    }
}

impl Cgroup {
    fn locate(config: &ParkerConfig, id: String) -> Result<Self> {
        validate_id(&id)?;
        let version = detect_version(&config.cgroup_root)?;
        let path = version.groups_dir(&config.cgroup_root).join(&id);
        let procs_path = path.join(PROCS_FILE);

        Ok(Self {
            id,
            version,
            path,
            procs_path,
        })
    }

    /// Create (or reuse) the group `id`, generating a random id when none is given.
    pub fn new(config: &ParkerConfig, id: Option<&str>) -> Result<Self> {
        let id = id.map(str::to_string).unwrap_or_else(generate_id);
        let cgroup = Self::locate(config, id)?;

        fs::create_dir_all(&cgroup.path).map_err(|e| {
            ParkerError::Unsupported(format!(
                "failed to create cgroup directory {}: {}",
                cgroup.path.display(),
                e
            ))
        })?;

        log::debug!(
            "cgroup v{} ready at {}",
            cgroup.version.as_u8(),
            cgroup.path.display()
        );
        Ok(cgroup)
    }

    /// Open an existing group. Never creates one.
    pub fn open(config: &ParkerConfig, id: &str) -> Result<Self> {
        let cgroup = Self::locate(config, id.to_string())?;
        if !cgroup.path.is_dir() {
            return Err(ParkerError::RegisterFailed(format!(
                "cgroup {} does not exist",
                cgroup.path.display()
            )));
        }
        Ok(cgroup)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> CgroupVersion {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn procs_path(&self) -> &Path {
        &self.procs_path
    }

    /// Append `pid` to the membership file.
    pub fn register(&self, pid: u32) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(false)
            .open(&self.procs_path)
            .map_err(|e| {
                ParkerError::RegisterFailed(format!(
                    "failed to open {}: {}",
                    self.procs_path.display(),
                    e
                ))
            })?;

        file.write_all(format!("{}\n", pid).as_bytes())
            .map_err(|e| {
                ParkerError::RegisterFailed(format!(
                    "failed to register PID {} in {}: {}",
                    pid,
                    self.procs_path.display(),
                    e
                ))
            })?;

        log::debug!("registered pid {} in cgroup {}", pid, self.id);
        Ok(())
    }

    /// Current members. A missing membership file reads as empty.
    pub fn pids(&self) -> Result<Vec<i32>> {
        let raw = match fs::read_to_string(&self.procs_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ParkerError::AbortLaunch(format!(
                    "failed to read PIDs from {}: {}",
                    self.procs_path.display(),
                    e
                )))
            }
        };

        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<i32>().map_err(|e| {
                    ParkerError::AbortLaunch(format!("bad PID {:?} in cgroup: {}", line, e))
                })
            })
            .collect()
    }

    /// Kill every member, then remove the group directory.
    ///
    /// Any kill failure is fatal except ESRCH: a member that exited between
    /// reading `cgroup.procs` and the kill is already gone, so it is logged
    /// and skipped rather than aborting cleanup.
    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            log::debug!("cgroup {} already removed", self.path.display());
            return Ok(());
        }

        let pids = self.pids()?;
        if pids.is_empty() {
            log::debug!("no pids in cgroup: {}", self.procs_path.display());
        } else {
            log::debug!("killing cgroup members: {:?}", pids);
            for pid in &pids {
                match kill(Pid::from_raw(*pid), Signal::SIGKILL) {
                    Ok(()) => {}
                    // exited between the read and the kill
                    Err(Errno::ESRCH) => log::debug!("pid {} already gone", pid),
                    Err(e) => {
                        return Err(ParkerError::AbortLaunch(format!(
                            "failed to kill PID {}: {}",
                            pid, e
                        )))
                    }
                }
            }
            self.wait_drained();
        }

        self.remove_dir()
    }

    fn wait_drained(&self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while Instant::now() < deadline {
            match self.pids() {
                Ok(pids) if pids.is_empty() => return,
                Ok(_) => std::thread::sleep(DRAIN_POLL),
                Err(_) => return,
            }
        }
        log::warn!("cgroup {} still has members after kill", self.id);
    }

    fn remove_dir(&self) -> Result<()> {
        // cgroupfs only accepts rmdir; plain directories need the recursive form
        let first = match fs::remove_dir(&self.path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => e,
        };

        fs::remove_dir_all(&self.path).map_err(|_| {
            ParkerError::AbortLaunch(format!(
                "failed to remove cgroup directory {}: {}",
                self.path.display(),
                first
            ))
        })?;

        log::debug!("removed cgroup {}", self.path.display());
        Ok(())
    }
}
