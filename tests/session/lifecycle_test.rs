/*!
 * Session Lifecycle Tests
 * Load/close round trips, state transitions and handle misuse
 */

use super::common::*;
use pretty_assertions::assert_eq;
use scx_host::core::types::TcDirection;
use scx_host::maps::MapKind;
use scx_host::resources::ReleaseStage;
use scx_host::sched::policies::ENQUEUE_TIME_MAP;
use scx_host::{
    AttachmentManager, ExtError, ExtensionHandle, ExtensionImage, HostConfig, PolicyKind, ResourceSet,
    Scheduler, ScxContext, SessionState, Task,
};
use std::sync::Arc;

#[test]
fn test_load_close_leaves_nothing_behind() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);

    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();
    assert_eq!(session.state(), SessionState::Loaded);
    assert_eq!(backend.live_objects(), 1);

    session.close().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(backend.live_objects(), 0);
    let paths = backend.opened_paths();
    assert_eq!(paths.len(), 1);
    assert!(!paths[0].exists());

    // Idempotent
    session.close().unwrap();
}

#[test]
fn test_corrupt_image_is_a_load_error() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    let manifest = full_manifest();
    let image = ExtensionImage::from_parts(manifest, b"\x7fELF\x02\x01\x01".to_vec()).unwrap();

    let err = session.load(&image).unwrap_err();
    assert_eq!(err.errno(), Some(nix::errno::Errno::ENOEXEC));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(backend.opened_paths().iter().all(|p| !p.exists()));
}

#[test]
fn test_double_detach_is_illegal_for_every_kind() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();

    let mut handles = vec![
        session.attach_scheduler(PolicyKind::RoundRobin).unwrap(),
        session.attach("count_open").unwrap(),
        session.attach_cgroup("on_sock", "workers").unwrap(),
        session.attach_tc("classify", IFINDEX, TcDirection::Egress).unwrap(),
    ];
    handles.extend(session.attach_lsm().unwrap());
    handles.extend(session.attach_xdp("pass", &[IFINDEX]).unwrap());
    assert_eq!(session.state(), SessionState::Attached);

    for handle in &handles {
        session.detach(handle).unwrap();
        let err = session.detach(handle).unwrap_err();
        assert!(err.is_illegal_state(), "{} detached twice: {}", handle, err);
    }
    assert!(!backend.class().is_active());
    assert_eq!(backend.live_links(), 0);
}

#[test]
fn test_detach_after_close_is_illegal() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();
    let handle = session.attach("count_open").unwrap();

    session.close().unwrap();
    assert!(session.detach(&handle).unwrap_err().is_illegal_state());
}

#[test]
fn test_map_kind_mismatch_is_reported() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();

    let err = session
        .map::<u32, u64>(ENQUEUE_TIME_MAP, MapKind::Hash)
        .unwrap_err();
    match err {
        ExtError::TypeMismatch {
            map,
            expected,
            actual,
        } => {
            assert_eq!(map, ENQUEUE_TIME_MAP);
            assert_eq!(expected, "hash");
            assert_eq!(actual, "lru_hash");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(session.map::<u32, u64>("missing", MapKind::Hash).unwrap_err().is_not_found());
    // Lookup failures leave the session usable
    assert_eq!(session.state(), SessionState::Loaded);
    session.map::<u32, u64>(ENQUEUE_TIME_MAP, MapKind::LruHash).unwrap();
}

#[test]
fn test_second_scheduler_is_rejected_and_session_closes() {
    let backend = backend();
    let root = cgroup_root();
    let image = ExtensionImage::simulated(PolicyKind::Fifo.manifest()).unwrap();

    let mut first = session(&backend, &root);
    first.load(&image).unwrap();
    first.attach_scheduler(PolicyKind::Fifo).unwrap();

    let mut second = session(&backend, &root);
    second.load(&image).unwrap();
    let err = second.attach_scheduler(PolicyKind::Fifo).unwrap_err();
    assert_eq!(err.errno(), Some(nix::errno::Errno::EBUSY));
    assert_eq!(second.state(), SessionState::Closed);

    // The first scheduler is untouched
    assert_eq!(backend.class().policy_name().as_deref(), Some("fifo"));
    assert_eq!(backend.live_objects(), 1);
}

/// Rejects every installation
struct RefusesInit;

impl Scheduler for RefusesInit {
    fn name(&self) -> &str {
        "refuses_init"
    }

    fn init(&self, _ctx: &ScxContext<'_>) -> i32 {
        -(nix::errno::Errno::ENOMEM as i32)
    }

    fn select_cpu(&self, _ctx: &ScxContext<'_>, _task: &Task, prev_cpu: u32, _wake_flags: u64) -> u32 {
        prev_cpu
    }

    fn enqueue(&self, _ctx: &ScxContext<'_>, _task: &Task, _enq_flags: u64) {}

    fn dispatch(&self, _ctx: &ScxContext<'_>, _cpu: u32, _prev: Option<&Task>) {}
}

#[test]
fn test_failed_init_keeps_default_scheduler() {
    let backend = backend();
    let image = ExtensionImage::simulated(PolicyKind::Fifo.manifest()).unwrap();
    let extension = ExtensionHandle::load(backend.clone(), &image).unwrap();
    let manager = AttachmentManager::new(backend.clone(), HostConfig::default());
    let mut resources = ResourceSet::new();

    let err = manager
        .attach_struct_ops(&mut resources, &extension, "fifo_ops", Arc::new(RefusesInit))
        .unwrap_err();
    assert!(matches!(err, ExtError::Attach { .. }));
    assert_eq!(err.errno(), Some(nix::errno::Errno::ENOMEM));
    assert!(resources.is_empty());
    assert!(!backend.class().is_active());
}

#[test]
fn test_scoped_session_always_closes() {
    let backend = backend();
    let root = cgroup_root();
    let host = HostConfig::default().with_cgroup_root(root.path());

    let result: Result<(), ExtError> =
        scx_host::Session::scoped(backend.clone(), host, Default::default(), |session| {
            session.load(&ExtensionImage::simulated(full_manifest()).unwrap())?;
            session.attach_scheduler(PolicyKind::RoundRobin)?;
            session.attach("missing_program")?;
            Ok(())
        });

    assert!(result.unwrap_err().is_not_found());
    assert!(!backend.class().is_active());
    assert_eq!(backend.live_objects(), 0);
    assert_eq!(backend.live_links(), 0);
}

#[test]
fn test_reopening_a_map_keeps_one_handle() {
    let backend = backend();
    let root = cgroup_root();
    let mut session = session(&backend, &root);
    session
        .load(&ExtensionImage::simulated(full_manifest()).unwrap())
        .unwrap();
    session.attach_scheduler(PolicyKind::RoundRobin).unwrap();

    // The scheduler already holds the task map open
    let first = session.map::<u32, u64>(ENQUEUE_TIME_MAP, MapKind::LruHash).unwrap();
    session.map::<u32, u64>(ENQUEUE_TIME_MAP, MapKind::LruHash).unwrap();
    assert_eq!(session.resources().count(ReleaseStage::Maps), 1);
    first.put(&42, &1_000).unwrap();
    assert_eq!(first.get(&42), Some(1_000));

    session.close().unwrap();
}
