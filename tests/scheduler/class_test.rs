/*!
 * Scheduling Class Tests
 * Callback order, dispatch queue rules and abort handling
 */

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use scx_host::core::limits::{DSQ_AUTO_ASSIGN, DSQ_GLOBAL, DSQ_LOCAL, SLICE_DFL_NS, WAKE_TTWU};
use scx_host::sched::policies::Fifo;
use scx_host::sched::ExtClass;
use scx_host::{Scheduler, ScxContext, ScxError, Task};
use std::sync::Arc;

/// Records callback names and routes everything through one user queue
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    queue: Mutex<Option<u64>>,
}

impl Recorder {
    fn log(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Scheduler for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn init(&self, ctx: &ScxContext<'_>) -> i32 {
        self.log("init");
        match ctx.create_dsq(DSQ_AUTO_ASSIGN) {
            Ok(id) => {
                *self.queue.lock() = Some(id);
                0
            }
            Err(err) => err.as_rc(),
        }
    }

    fn select_cpu(&self, _ctx: &ScxContext<'_>, task: &Task, prev_cpu: u32, _wake_flags: u64) -> u32 {
        self.log(format!("select_cpu {}", task.pid));
        prev_cpu
    }

    fn enqueue(&self, ctx: &ScxContext<'_>, task: &Task, enq_flags: u64) {
        self.log(format!("enqueue {}", task.pid));
        if let Some(queue) = *self.queue.lock() {
            ctx.dispatch(task, queue, SLICE_DFL_NS, enq_flags);
        }
    }

    fn dispatch(&self, ctx: &ScxContext<'_>, cpu: u32, _prev: Option<&Task>) {
        self.log(format!("dispatch {}", cpu));
        if let Some(queue) = *self.queue.lock() {
            ctx.consume(queue);
        }
    }

    fn running(&self, _ctx: &ScxContext<'_>, task: &Task) {
        self.log(format!("running {}", task.pid));
    }

    fn stopping(&self, _ctx: &ScxContext<'_>, task: &Task, runnable: bool) {
        self.log(format!("stopping {} {}", task.pid, runnable));
    }

    fn enable(&self, _ctx: &ScxContext<'_>, task: &mut Task) {
        self.log(format!("enable {}", task.pid));
    }
}

/// Creates the same queue twice
struct DoubleCreate;

impl Scheduler for DoubleCreate {
    fn name(&self) -> &str {
        "double_create"
    }

    fn init(&self, ctx: &ScxContext<'_>) -> i32 {
        if let Err(err) = ctx.create_dsq(7) {
            return err.as_rc();
        }
        match ctx.create_dsq(7) {
            Ok(_) => 0,
            Err(err) => err.as_rc(),
        }
    }

    fn select_cpu(&self, _ctx: &ScxContext<'_>, _task: &Task, prev_cpu: u32, _wake_flags: u64) -> u32 {
        prev_cpu
    }

    fn enqueue(&self, ctx: &ScxContext<'_>, task: &Task, enq_flags: u64) {
        ctx.dispatch(task, DSQ_GLOBAL, SLICE_DFL_NS, enq_flags);
    }

    fn dispatch(&self, _ctx: &ScxContext<'_>, _cpu: u32, _prev: Option<&Task>) {}
}

/// Dispatches to a queue that was never created
struct StrayDispatch;

impl Scheduler for StrayDispatch {
    fn name(&self) -> &str {
        "stray"
    }

    fn init(&self, _ctx: &ScxContext<'_>) -> i32 {
        0
    }

    fn select_cpu(&self, _ctx: &ScxContext<'_>, _task: &Task, prev_cpu: u32, _wake_flags: u64) -> u32 {
        prev_cpu
    }

    fn enqueue(&self, ctx: &ScxContext<'_>, task: &Task, enq_flags: u64) {
        ctx.dispatch(task, 42, SLICE_DFL_NS, enq_flags);
    }

    fn dispatch(&self, _ctx: &ScxContext<'_>, _cpu: u32, _prev: Option<&Task>) {}
}

/// Picks a CPU that does not exist
struct BadCpu;

impl Scheduler for BadCpu {
    fn name(&self) -> &str {
        "bad_cpu"
    }

    fn init(&self, _ctx: &ScxContext<'_>) -> i32 {
        0
    }

    fn select_cpu(&self, ctx: &ScxContext<'_>, _task: &Task, _prev_cpu: u32, _wake_flags: u64) -> u32 {
        ctx.nr_cpus() + 3
    }

    fn enqueue(&self, ctx: &ScxContext<'_>, task: &Task, enq_flags: u64) {
        ctx.dispatch(task, DSQ_LOCAL, SLICE_DFL_NS, enq_flags);
    }

    fn dispatch(&self, _ctx: &ScxContext<'_>, _cpu: u32, _prev: Option<&Task>) {}
}

#[test]
fn test_callback_order_through_one_slice() {
    let class = ExtClass::new(1);
    class.add_task(Task::new(5)).unwrap();
    let recorder = Arc::new(Recorder::default());
    class.install(recorder.clone()).unwrap();

    class.wake(5, WAKE_TTWU).unwrap();
    assert_eq!(class.pick_next(0).unwrap(), Some(5));
    class.advance_clock(500);
    class.stop(0, 500, true).unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "init",
            "enable 5",
            "select_cpu 5",
            "enqueue 5",
            "dispatch 0",
            "running 5",
            "stopping 5 true",
            "enqueue 5",
        ]
    );
    assert_eq!(class.task(5).unwrap().slice_ns, SLICE_DFL_NS);
}

#[test]
fn test_colliding_dsq_fails_init() {
    let class = ExtClass::new(1);
    let err = class.install(Arc::new(DoubleCreate)).unwrap_err();

    assert_eq!(err, ScxError::InitFailed(-(nix::errno::Errno::EEXIST as i32)));
    assert_eq!(err.errno(), nix::errno::Errno::EEXIST);
    assert!(!class.is_active());

    // The half-created queue went away with the failed policy
    class.install(Arc::new(Fifo::new())).unwrap();
    assert_eq!(class.nr_queued(7), None);
}

#[test]
fn test_second_policy_is_rejected_while_active() {
    let class = ExtClass::new(1);
    class.install(Arc::new(Fifo::new())).unwrap();
    let err = class.install(Arc::new(Fifo::new())).unwrap_err();
    assert_eq!(err, ScxError::Busy("fifo".into()));
}

#[test]
fn test_unknown_dsq_aborts_to_default_scheduler() {
    let class = ExtClass::new(1);
    class.install(Arc::new(StrayDispatch)).unwrap();
    class.add_task(Task::new(1)).unwrap();

    class.wake(1, WAKE_TTWU).unwrap();
    assert!(!class.is_active());
    let exit = class.exit_info().unwrap();
    assert_eq!(exit.policy, "stray");
    assert_eq!(exit.reason, ScxError::DsqNotFound(42));

    // The task still runs, from the global queue
    assert_eq!(class.nr_queued(DSQ_GLOBAL), Some(1));
    assert_eq!(class.pick_next(0).unwrap(), Some(1));
}

#[test]
fn test_invalid_cpu_aborts_policy() {
    let class = ExtClass::new(2);
    class.install(Arc::new(BadCpu)).unwrap();
    class.add_task(Task::new(3)).unwrap();

    class.wake(3, WAKE_TTWU).unwrap();
    assert_eq!(class.exit_info().unwrap().reason, ScxError::InvalidCpu(5));
    assert_eq!(class.pick_next(1).unwrap(), Some(3));
}

#[test]
fn test_uninstall_requeues_user_queue_tasks() {
    let class = ExtClass::new(1);
    let recorder = Arc::new(Recorder::default());
    class.install(recorder.clone()).unwrap();
    for pid in [1, 2] {
        class.add_task(Task::new(pid)).unwrap();
        class.enqueue_task(pid, 0).unwrap();
    }

    assert_eq!(class.uninstall().as_deref(), Some("recorder"));
    assert_eq!(class.nr_queued(DSQ_GLOBAL), Some(2));
    assert_eq!(class.pick_next(0).unwrap(), Some(1));
    assert_eq!(class.exit_info(), None);
}
