/*!
 * FIFO Policy
 * Single shared queue; idle CPUs get woken tasks directly
 */

use crate::core::limits::{DSQ_LOCAL, SLICE_DFL_NS};
use crate::core::types::CpuId;
use crate::sched::context::ScxContext;
use crate::sched::traits::Scheduler;
use crate::sched::types::Task;

/// Queue shared by all CPUs
pub const SHARED_DSQ_ID: u64 = 0;

#[derive(Debug, Default)]
pub struct Fifo;

impl Fifo {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for Fifo {
    fn name(&self) -> &str {
        "fifo"
    }

    fn init(&self, ctx: &ScxContext<'_>) -> i32 {
        match ctx.create_dsq(SHARED_DSQ_ID as i64) {
            Ok(_) => 0,
            Err(err) => err.as_rc(),
        }
    }

    fn select_cpu(&self, ctx: &ScxContext<'_>, task: &Task, prev_cpu: CpuId, wake_flags: u64) -> CpuId {
        let (cpu, idle) = ctx.select_cpu_dfl(task, prev_cpu, wake_flags);
        if idle {
            ctx.dispatch(task, DSQ_LOCAL, SLICE_DFL_NS, 0);
        }
        cpu
    }

    fn enqueue(&self, ctx: &ScxContext<'_>, task: &Task, enq_flags: u64) {
        ctx.dispatch(task, SHARED_DSQ_ID, SLICE_DFL_NS, enq_flags);
    }

    fn dispatch(&self, ctx: &ScxContext<'_>, _cpu: CpuId, _prev: Option<&Task>) {
        ctx.consume(SHARED_DSQ_ID);
    }

    fn enable(&self, _ctx: &ScxContext<'_>, task: &mut Task) {
        task.dsq_vtime = 0;
    }
}
