/*!
 * Cgroup Attach Tests
 * Resolution and retry behaviour
 */

use super::common::*;
use pretty_assertions::assert_eq;
use scx_host::backend::ReleaseEvent;
use scx_host::{ExtensionImage, HostConfig, PolicyConfig, ResourceHandle, Session, SessionState};
use std::time::{Duration, Instant};

fn loaded(backend: &std::sync::Arc<scx_host::SimulationBackend>, root: &tempfile::TempDir) -> scx_host::Session {
    let mut session = session(backend, root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();
    session
}

fn closed_fds(backend: &scx_host::SimulationBackend) -> usize {
    backend
        .release_log()
        .iter()
        .filter(|event| matches!(event, ReleaseEvent::Fd(_)))
        .count()
}

#[test]
fn test_transient_failures_are_retried() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = loaded(&backend, &root);
    backend.fail_next_cgroup_attaches(2);

    let handle = session.attach_cgroup("on_sock", "workers").unwrap();
    let ResourceHandle::AttachedLink { link, .. } = handle else {
        panic!("cgroup attach returned {handle}");
    };
    assert_eq!(backend.linked_program(link), Some(session.program("on_sock").unwrap().id));
    assert_eq!(backend.cgroup_attach_attempts(), 3);
    // Descriptors of the failed attempts are closed right away
    assert_eq!(closed_fds(&backend), 2);
    assert_eq!(session.state(), SessionState::Attached);

    session.close().unwrap();
    assert_eq!(closed_fds(&backend), 3);
}

#[test]
fn test_persistent_failure_surfaces_last_error() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = loaded(&backend, &root);
    backend.fail_next_cgroup_attaches(10);

    let err = session.attach_cgroup("on_sock", "workers").unwrap_err();
    assert_eq!(err.errno(), Some(nix::errno::Errno::EBUSY));
    // One attempt plus three retries
    assert_eq!(backend.cgroup_attach_attempts(), 4);
    assert_eq!(closed_fds(&backend), 4);
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_missing_cgroup_is_not_found_after_retries() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = loaded(&backend, &root);

    let started = Instant::now();
    let err = session.attach_cgroup("on_sock", "batch").unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
    // Three backoffs of 10 ms, with slack for a loaded machine
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(30), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "returned after {elapsed:?}");
    // Never reached the kernel
    assert_eq!(backend.cgroup_attach_attempts(), 0);
}

#[test]
fn test_nested_cgroups_are_not_matched() {
    let backend = backend();
    let root = cgroup_root();
    std::fs::create_dir(root.path().join("workers").join("inner")).unwrap();
    let mut session = loaded(&backend, &root);

    assert!(session.attach_cgroup("on_sock", "inner").unwrap_err().is_not_found());
}

#[test]
fn test_wrong_hook_is_rejected_without_retry() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = loaded(&backend, &root);

    let err = session.attach_cgroup("pass", "workers").unwrap_err();
    assert!(matches!(err, scx_host::ExtError::Attach { errno: None, .. }));
    assert_eq!(backend.cgroup_attach_attempts(), 0);
}

#[test]
fn test_default_retry_policy_bounds_the_wait() {
    let backend = backend();
    let root = cgroup_root();
    let host = HostConfig::default().with_cgroup_root(root.path());
    let mut session = Session::new(backend.clone(), host, PolicyConfig::default());
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();

    let started = Instant::now();
    let err = session.attach_cgroup("on_sock", "batch").unwrap_err();
    let elapsed = started.elapsed();
    assert!(err.is_not_found(), "unexpected error: {err}");
    // 3 x 100 ms between four attempts
    assert!(elapsed >= Duration::from_millis(300), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "returned after {elapsed:?}");
}
