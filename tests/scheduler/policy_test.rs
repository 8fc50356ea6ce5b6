/*!
 * Sample Policy Tests
 * Dispatch order of the shipped policies on the scheduling class
 */

use pretty_assertions::assert_eq;
use scx_host::core::limits::WAKE_TTWU;
use scx_host::sched::policies::{Fifo, IoPriority, RoundRobin, UsageModel, RR_DSQ_ID};
use scx_host::sched::{ExtClass, TaskMaps};
use scx_host::{PolicyConfig, Scheduler, Task};
use std::sync::Arc;

/// Pick and retire the next task on `cpu`
fn run_next(class: &ExtClass, cpu: u32) -> Option<u32> {
    let pid = class.pick_next(cpu).unwrap()?;
    class.advance_clock(1_000);
    class.stop(cpu, 1_000, false).unwrap();
    Some(pid)
}

/// Put a blocker on CPU 0 so nothing is idle while tasks queue up
fn occupy(class: &ExtClass, pid: u32) {
    class.add_task(Task::new(pid)).unwrap();
    class.wake(pid, WAKE_TTWU).unwrap();
    assert_eq!(class.pick_next(0).unwrap(), Some(pid));
}

#[test]
fn test_fifo_single_cpu_consumes_in_order() {
    let class = ExtClass::new(1);
    class.install(Arc::new(Fifo::new())).unwrap();

    for pid in [10, 11, 12] {
        class.add_task(Task::new(pid)).unwrap();
        class.enqueue_task(pid, 0).unwrap();
    }

    let order: Vec<u32> = (0..3).filter_map(|_| run_next(&class, 0)).collect();
    assert_eq!(order, vec![10, 11, 12]);
    assert_eq!(run_next(&class, 0), None);
    assert!(class.is_active());
}

#[test]
fn test_fifo_direct_dispatch_to_idle_cpu() {
    let class = ExtClass::new(2);
    class.install(Arc::new(Fifo::new())).unwrap();
    class.add_task(Task::new(1)).unwrap();

    class.wake(1, WAKE_TTWU).unwrap();
    assert_eq!(class.local_len(0), 1);
    assert_eq!(class.nr_queued(0), Some(0));
}

#[test]
fn test_round_robin_preserves_enqueue_order() {
    let class = ExtClass::new(1);
    let policy = RoundRobin::new(5_000_000, TaskMaps::standalone().enqueue_time);
    class.install(Arc::new(policy)).unwrap();
    occupy(&class, 100);

    let tasks: Vec<u32> = (1..=6).collect();
    for &pid in &tasks {
        class.add_task(Task::new(pid)).unwrap();
        class.wake(pid, WAKE_TTWU).unwrap();
    }
    assert_eq!(class.nr_queued(RR_DSQ_ID), Some(tasks.len()));

    class.stop(0, 1_000, false).unwrap();
    let order: Vec<u32> = tasks.iter().filter_map(|_| run_next(&class, 0)).collect();
    assert_eq!(order, tasks);
}

#[test]
fn test_round_robin_grants_configured_slice() {
    let class = ExtClass::new(1);
    let policy = Arc::new(RoundRobin::new(3_000_000, TaskMaps::standalone().enqueue_time));
    let counters = policy.counters().unwrap();
    class.install(policy).unwrap();
    class.add_task(Task::new(1)).unwrap();
    class.wake(1, WAKE_TTWU).unwrap();

    assert_eq!(class.pick_next(0).unwrap(), Some(1));
    assert_eq!(class.task(1).unwrap().slice_ns, 3_000_000);
    class.stop(0, 1_000_000, false).unwrap();

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.direct_dispatches, 1);
    assert_eq!(snapshot.slice_used_ns, 1_000_000);
    assert_eq!(snapshot.slice_granted_ns, 3_000_000);
}

#[test]
fn test_io_priority_drains_priority_queue_first() {
    let class = ExtClass::new(1);
    let maps = TaskMaps::standalone();
    // Task 1 used 0.5% of its last slice, task 2 was never seen
    maps.slice_usage.put(&1, &100_000).unwrap();
    let policy = IoPriority::new(&PolicyConfig::default(), UsageModel::LastSample, maps.clone());
    class.install(Arc::new(policy)).unwrap();
    occupy(&class, 100);

    for pid in [2, 1] {
        class.add_task(Task::new(pid)).unwrap();
        class.wake(pid, WAKE_TTWU).unwrap();
    }

    class.stop(0, 1_000, false).unwrap();
    assert_eq!(run_next(&class, 0), Some(1));
    assert_eq!(run_next(&class, 0), Some(2));
}

#[test]
fn test_weighted_average_records_usage() {
    let class = ExtClass::new(1);
    let maps = TaskMaps::standalone();
    let config = PolicyConfig::default();
    let model = UsageModel::Ewma {
        weight_fp: 0,
        initial_ns: config.initial_usage_ns(),
    };
    class
        .install(Arc::new(IoPriority::new(&config, model, maps.clone())))
        .unwrap();
    class.add_task(Task::new(1)).unwrap();
    class.wake(1, WAKE_TTWU).unwrap();

    assert_eq!(class.pick_next(0).unwrap(), Some(1));
    class.stop(0, 2_000_000, false).unwrap();
    // c = 0 keeps only the new sample
    assert_eq!(maps.slice_usage.get(&1), Some(2_000_000));
}
