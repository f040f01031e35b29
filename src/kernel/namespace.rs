//! Mount namespace isolation for the extracted payload
//!
//! The working directory is shadowed by a tmpfs inside a private mount
//! namespace, so payload files never reach the host disk and vanish with
//! the namespace's last process.

use crate::config::types::{ParkerError, Result};
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use std::path::Path;

/// Check if mount namespaces are available on this system
pub fn is_supported() -> bool {
    Path::new("/proc/self/ns/mnt").exists()
}

/// Detach the calling process into a new mount namespace.
pub fn unshare_mount_namespace() -> Result<()> {
    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| {
        ParkerError::AbortLaunch(format!("Failed to unshare mount namespace: {}", e))
    })?;
    log::debug!("entered new mount namespace");
    Ok(())
}

/// mount(NULL, "/", NULL, MS_REC | MS_PRIVATE, NULL)
/// Must succeed, otherwise the tmpfs below would propagate to the host.
pub fn harden_mount_propagation() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| {
        ParkerError::AbortLaunch(format!(
            "Failed to make mount tree private (MS_PRIVATE|MS_REC on /): {}",
            e
        ))
    })?;

    log::debug!("mount propagation hardened: / set to MS_PRIVATE|MS_REC");
    Ok(())
}

/// Mount an unbounded tmpfs over `dir`, shadowing whatever is on disk there.
pub fn mount_tmpfs(dir: &Path) -> Result<()> {
    mount(
        Some("tmpfs"),
        dir,
        Some("tmpfs"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| {
        ParkerError::AbortLaunch(format!("Failed to mount tmpfs on {}: {}", dir.display(), e))
    })?;

    log::debug!("tmpfs mounted on {}", dir.display());
    Ok(())
}

/// Full isolation sequence for a launch. Must run before any payload file is written.
pub fn isolate_workdir(dir: &Path) -> Result<()> {
    log::debug!("isolating {} start", dir.display());
    if !is_supported() {
        return Err(ParkerError::AbortLaunch(
            "mount namespaces are not available on this kernel".to_string(),
        ));
    }
    unshare_mount_namespace()?;
    harden_mount_propagation()?;
    mount_tmpfs(dir)?;
    log::debug!("isolating {} success", dir.display());
    Ok(())
}
