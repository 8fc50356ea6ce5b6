/*!
 * Synthetic Workload Tests
 * Sample policies under a mixed CPU/I/O workload
 */

use scx_host::sched::{ExtClass, PolicyKind, TaskMaps, TaskProfile, Workload};
use scx_host::PolicyConfig;
use std::sync::Arc;

fn run(kind: PolicyKind, cpus: u32) -> (Arc<ExtClass>, Workload) {
    let class = Arc::new(ExtClass::new(cpus));
    let policy = kind.build(&PolicyConfig::default(), TaskMaps::standalone());
    class.install(policy).unwrap();
    let mut workload = Workload::spawn(class.clone(), &TaskProfile::mixed(1, 6)).unwrap();
    workload.run_for(200_000_000).unwrap();
    (class, workload)
}

#[test]
fn test_every_policy_survives_mixed_load() {
    for kind in [
        PolicyKind::Fifo,
        PolicyKind::RoundRobin,
        PolicyKind::IoPriority,
        PolicyKind::WeightedAvg,
    ] {
        let (class, _workload) = run(kind, 2);
        assert!(class.is_active(), "{} was aborted: {:?}", kind, class.exit_info());
        assert!(class.now_ns() >= 200_000_000);
    }
}

#[test]
fn test_weighted_avg_collects_wait_statistics() {
    let (class, _workload) = run(PolicyKind::WeightedAvg, 1);
    let snapshot = class.counters().unwrap().snapshot_and_reset();
    assert!(snapshot.enqueues > 0);
    assert!(snapshot.slices > 0);
    assert!(snapshot.avg_wait_ns().is_some());
    assert!(class.counters().unwrap().snapshot().is_empty());
}
