/*!
 * Shared session fixtures
 */

use scx_host::{HostConfig, Manifest, PolicyConfig, PolicyKind, Session, SimulationBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const IFINDEX: u32 = 2;

/// Round-robin scheduler plus one program of every other hook kind
pub fn full_manifest() -> Manifest {
    PolicyKind::RoundRobin
        .manifest()
        .auto_entry("count_open", "kprobe/do_sys_openat2")
        .entry("check_open", "lsm/file_open")
        .entry("on_sock", "cgroup/sock_create")
        .entry("pass", "xdp")
        .entry("classify", "tc")
}

/// Fake cgroup hierarchy with a `workers` group
pub fn cgroup_root() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("workers")).unwrap();
    root
}

pub fn backend() -> Arc<SimulationBackend> {
    Arc::new(SimulationBackend::new(2).with_interfaces(&[IFINDEX]))
}

pub fn session(backend: &Arc<SimulationBackend>, root: &TempDir) -> Session {
    let host = HostConfig::default()
        .with_cgroup_root(root.path())
        .with_cgroup_backoff(Duration::from_millis(10));
    Session::new(backend.clone(), host, PolicyConfig::default())
}
