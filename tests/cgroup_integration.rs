//! Integration tests for cgroup lifecycle
//!
//! These run against a scratch directory laid out like a cgroup mount, so
//! they need no privileges. The kernel would populate `cgroup.procs` itself;
//! here the tests create it.

use parker::config::types::{ParkerConfig, ParkerError, CGROUP_PARENT_DIR};
use parker::kernel::cgroup::{Cgroup, CgroupVersion};
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

fn v2_root() -> (tempfile::TempDir, ParkerConfig) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("cgroup.controllers"), "cpu memory pids\n").unwrap();
    let config = ParkerConfig::default().with_cgroup_root(dir.path());
    (dir, config)
}

fn with_procs_file(cgroup: &Cgroup) {
    fs::write(cgroup.procs_path(), "").unwrap();
}

#[test]
fn test_unsupported_host_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = ParkerConfig::default().with_cgroup_root(dir.path());

    assert!(matches!(
        Cgroup::new(&config, None),
        Err(ParkerError::Unsupported(_))
    ));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_v1_freezer_layout() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("freezer")).unwrap();
    let config = ParkerConfig::default().with_cgroup_root(dir.path());

    let cgroup = Cgroup::new(&config, None).unwrap();
    assert_eq!(cgroup.version(), CgroupVersion::V1);
    assert_eq!(
        cgroup.path(),
        dir.path().join("freezer").join(CGROUP_PARENT_DIR).join(cgroup.id())
    );
    cgroup.clear().unwrap();
    assert!(!cgroup.path().exists());
}

#[test]
fn test_concurrent_launches_get_distinct_groups() {
    let (_dir, config) = v2_root();
    let first = Cgroup::new(&config, None).unwrap();
    let second = Cgroup::new(&config, None).unwrap();

    assert_ne!(first.id(), second.id());
    assert_ne!(first.path(), second.path());

    first.clear().unwrap();
    assert!(!first.path().exists());
    assert!(second.path().is_dir());
    second.clear().unwrap();
}

#[test]
fn test_open_joins_group_created_by_launcher() {
    let (_dir, config) = v2_root();
    let created = Cgroup::new(&config, None).unwrap();
    with_procs_file(&created);

    let joined = Cgroup::open(&config, created.id()).unwrap();
    joined.register(4242).unwrap();
    assert_eq!(created.pids().unwrap(), vec![4242]);

    fs::write(created.procs_path(), "").unwrap();
    created.clear().unwrap();
    assert!(matches!(
        Cgroup::open(&config, created.id()),
        Err(ParkerError::RegisterFailed(_))
    ));
}

#[test]
fn test_clear_kills_registered_members() {
    let (_dir, config) = v2_root();
    let cgroup = Cgroup::new(&config, None).unwrap();
    with_procs_file(&cgroup);

    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    cgroup.register(child.id()).unwrap();

    cgroup.clear().unwrap();
    let status = child.wait().unwrap();
    assert_eq!(status.signal(), Some(libc::SIGKILL));
    assert!(!cgroup.path().exists());
}

#[test]
fn test_clear_is_idempotent() {
    let (_dir, config) = v2_root();
    let cgroup = Cgroup::new(&config, None).unwrap();

    cgroup.clear().unwrap();
    cgroup.clear().unwrap();
}
