//! Cgroup hierarchy detection for v1/v2 hosts.

use crate::config::types::{ParkerError, Result, CGROUP_PARENT_DIR};
use std::path::{Path, PathBuf};

/// v1 subsystem that hosts launch groups
pub const V1_SUBSYSTEM: &str = "freezer";

/// Process-membership file, identical name on both layouts
pub const PROCS_FILE: &str = "cgroup.procs";

/// Present only at the root of a unified (v2) hierarchy
pub const V2_MARKER: &str = "cgroup.controllers";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

impl CgroupVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Directory that holds every parker group for this layout
    pub fn groups_dir(self, root: &Path) -> PathBuf {
        match self {
            Self::V1 => root.join(V1_SUBSYSTEM).join(CGROUP_PARENT_DIR),
            Self::V2 => root.join(CGROUP_PARENT_DIR),
        }
    }
}

/// Detect the layout under `root`: v2 preferred, v1 with freezer as fallback.
pub fn detect_version(root: &Path) -> Result<CgroupVersion> {
    if !root.exists() {
        return Err(ParkerError::Unsupported(format!(
            "cgroup hierarchy {} not present",
            root.display()
        )));
    }

    if root.join(V2_MARKER).exists() {
        return Ok(CgroupVersion::V2);
    }

    if root.join(V1_SUBSYSTEM).is_dir() {
        return Ok(CgroupVersion::V1);
    }

    Err(ParkerError::Unsupported(format!(
        "cgroup v1 {} subsystem not available under {}",
        V1_SUBSYSTEM,
        root.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_root_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("absent");
        assert!(matches!(
            detect_version(&root),
            Err(ParkerError::Unsupported(_))
        ));
        assert!(!root.exists());
    }

    #[test]
    fn test_v2_preferred_over_v1() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(V2_MARKER), "cpu memory pids\n").unwrap();
        fs::create_dir(dir.path().join(V1_SUBSYSTEM)).unwrap();
        assert_eq!(detect_version(dir.path()).unwrap(), CgroupVersion::V2);
    }

    #[test]
    fn test_v1_requires_freezer() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("memory")).unwrap();
        assert!(matches!(
            detect_version(dir.path()),
            Err(ParkerError::Unsupported(_))
        ));

        fs::create_dir(dir.path().join(V1_SUBSYSTEM)).unwrap();
        assert_eq!(detect_version(dir.path()).unwrap(), CgroupVersion::V1);
    }

    #[test]
    fn test_groups_dir_layout() {
        let root = Path::new("/sys/fs/cgroup");
        assert_eq!(
            CgroupVersion::V1.groups_dir(root),
            PathBuf::from("/sys/fs/cgroup/freezer/parker")
        );
        assert_eq!(
            CgroupVersion::V2.groups_dir(root),
            PathBuf::from("/sys/fs/cgroup/parker")
        );
        assert_eq!(CgroupVersion::V2.as_u8(), 2);
    }
}
