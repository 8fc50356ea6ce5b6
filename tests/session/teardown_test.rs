/*!
 * Teardown Tests
 * Release order, error aggregation and TC qdisc handling
 */

use super::common::*;
use pretty_assertions::assert_eq;
use scx_host::backend::SimulationBackend;
use scx_host::core::types::TcDirection;
use scx_host::{ExtError, ExtensionImage, PolicyKind, ResourceHandle, Session};

/// Attach one of everything and return the kprobe link handle
fn attach_everything(session: &mut Session) -> ResourceHandle {
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();
    session.attach_scheduler(PolicyKind::RoundRobin).unwrap();
    let kprobe = session.attach("count_open").unwrap();
    session.attach_cgroup("on_sock", "workers").unwrap();
    session.attach_xdp("pass", &[IFINDEX]).unwrap();
    session.attach_tc("classify", IFINDEX, TcDirection::Ingress).unwrap();
    kprobe
}

/// Release categories in order, with consecutive repeats collapsed
fn release_order(backend: &SimulationBackend, skip: usize) -> Vec<&'static str> {
    let mut order: Vec<&'static str> = Vec::new();
    for event in backend.release_log().iter().skip(skip) {
        let category = event.category();
        if order.last() != Some(&category) {
            order.push(category);
        }
    }
    order
}

#[test]
fn test_close_releases_in_dependency_order() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    attach_everything(&mut session);
    let before = backend.release_log().len();

    session.close().unwrap();

    assert_eq!(
        release_order(&backend, before),
        vec!["struct_ops", "link", "xdp", "tc", "map", "object", "fd"]
    );
    assert!(!backend.class().is_active());
    assert_eq!(backend.live_links(), 0);
    assert_eq!(backend.live_objects(), 0);
    assert_eq!(backend.xdp_program(IFINDEX), None);
    assert_eq!(backend.tc_program(IFINDEX, TcDirection::Ingress), None);
}

#[test]
fn test_drop_closes_the_session() {
    let backend = backend();
    let root = cgroup_root();
    {
        let mut session = session(&backend, &root);
        attach_everything(&mut session);
    }
    assert!(!backend.class().is_active());
    assert_eq!(backend.live_links(), 0);
    assert_eq!(backend.live_objects(), 0);
}

#[test]
fn test_release_failures_are_aggregated() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    let kprobe = attach_everything(&mut session);
    let ResourceHandle::AttachedLink { link, .. } = kprobe else {
        panic!("kprobe attach returned {kprobe}");
    };
    backend.fail_link_destroy(link);
    backend.fail_xdp_detach(IFINDEX);

    let err = session.close().unwrap_err();
    let ExtError::Teardown { failures } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .all(|failure| failure.errno() == Some(nix::errno::Errno::EIO)));

    // Everything else still went away
    assert!(!backend.class().is_active());
    assert_eq!(backend.tc_program(IFINDEX, TcDirection::Ingress), None);
    assert_eq!(backend.live_objects(), 0);
    let log = backend.release_log();
    assert!(log.iter().any(|e| e.category() == "fd"));
    assert!(log.iter().any(|e| e.category() == "map"));
}

#[test]
fn test_tc_directions_share_one_qdisc() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();

    session.attach_tc("classify", IFINDEX, TcDirection::Ingress).unwrap();
    // The qdisc created for ingress must survive the egress attach
    session.attach_tc("classify", IFINDEX, TcDirection::Egress).unwrap();
    assert!(backend.tc_program(IFINDEX, TcDirection::Ingress).is_some());
    assert!(backend.tc_program(IFINDEX, TcDirection::Egress).is_some());
}

#[test]
fn test_stale_qdisc_is_replaced() {
    let backend = backend();
    backend.add_stale_qdisc(IFINDEX);
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();

    session.attach_tc("classify", IFINDEX, TcDirection::Egress).unwrap();
    assert!(backend.has_qdisc(IFINDEX));
    assert!(backend.tc_program(IFINDEX, TcDirection::Egress).is_some());
}

#[test]
fn test_qdisc_cleanup_failure_is_ignored() {
    let backend = backend();
    backend.fail_qdisc_cleanup(true);
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();

    session.attach_tc("classify", IFINDEX, TcDirection::Ingress).unwrap();
    session.close().unwrap();
}

#[test]
fn test_xdp_tracks_each_interface() {
    let backend = std::sync::Arc::new(SimulationBackend::new(1).with_interfaces(&[IFINDEX, 3]));
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();

    let handles = session.attach_xdp("pass", &[IFINDEX, 3]).unwrap();
    assert_eq!(handles.len(), 2);
    session.detach(&handles[0]).unwrap();
    assert_eq!(backend.xdp_program(IFINDEX), None);
    assert!(backend.xdp_program(3).is_some());

    // A second program on a busy interface is refused
    let err = session.attach_xdp("pass", &[3]).unwrap_err();
    assert_eq!(err.errno(), Some(nix::errno::Errno::EBUSY));
}

#[test]
fn test_failed_detach_is_retried_at_close() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();
    let handles = session.attach_xdp("pass", &[IFINDEX]).unwrap();

    backend.fail_xdp_detach(IFINDEX);
    let err = session.detach(&handles[0]).unwrap_err();
    assert!(matches!(err, ExtError::Detach { .. }));
    assert!(session.resources().contains(&handles[0]));
    assert!(backend.xdp_program(IFINDEX).is_some());

    backend.clear_faults();
    session.close().unwrap();
    assert_eq!(backend.xdp_program(IFINDEX), None);
}

#[test]
fn test_failed_detach_is_reported_at_close() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();
    let handles = session.attach_xdp("pass", &[IFINDEX]).unwrap();

    backend.fail_xdp_detach(IFINDEX);
    assert!(session.detach(&handles[0]).is_err());
    let err = session.close().unwrap_err();
    let ExtError::Teardown { failures } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].errno(), Some(nix::errno::Errno::EIO));
}
