/*!
 * Scheduler Traits
 * The seven decision points a pluggable policy implements
 */

use super::context::ScxContext;
use super::stats::SchedCounters;
use super::types::Task;
use crate::core::types::CpuId;
use std::sync::Arc;

/// A pluggable scheduling policy
///
/// The scheduling class is the only caller. Callbacks run on the scheduling
/// path and must not block, sleep, or log; anything slow belongs on the
/// reporting thread.
pub trait Scheduler: Send + Sync {
    /// Policy name, used in logs and exit reports
    fn name(&self) -> &str;

    /// Called once at attach time; non-zero aborts the attachment
    fn init(&self, ctx: &ScxContext<'_>) -> i32;

    /// Pick a CPU for a waking task
    ///
    /// Dispatching to `DSQ_LOCAL` here places the task on the returned CPU
    /// and skips `enqueue`.
    fn select_cpu(&self, ctx: &ScxContext<'_>, task: &Task, prev_cpu: CpuId, wake_flags: u64) -> CpuId;

    /// Place a runnable task in exactly one dispatch queue
    fn enqueue(&self, ctx: &ScxContext<'_>, task: &Task, enq_flags: u64);

    /// Refill an idle CPU's local queue
    fn dispatch(&self, ctx: &ScxContext<'_>, cpu: CpuId, prev: Option<&Task>);

    /// Task starts executing
    fn running(&self, _ctx: &ScxContext<'_>, _task: &Task) {}

    /// Task yields or is preempted; `task.slice_ns` holds the unused slice
    fn stopping(&self, _ctx: &ScxContext<'_>, _task: &Task, _runnable: bool) {}

    /// Task becomes schedulable under this policy
    fn enable(&self, _ctx: &ScxContext<'_>, _task: &mut Task) {}

    /// Counters read by the reporter, if the policy keeps any
    fn counters(&self) -> Option<Arc<SchedCounters>> {
        None
    }
}
