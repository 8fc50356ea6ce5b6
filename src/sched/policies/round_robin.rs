/*!
 * Round-Robin Policy
 * Shared FIFO queue with a fixed slice and direct dispatch to idle CPUs
 */

use crate::core::limits::DSQ_LOCAL;
use crate::core::types::CpuId;
use crate::maps::TypedMap;
use crate::sched::context::ScxContext;
use crate::sched::stats::SchedCounters;
use crate::sched::traits::Scheduler;
use crate::sched::types::Task;
use crate::sched::usage::used_time;
use std::sync::Arc;

/// Queue holding tasks that found no idle CPU
pub const RR_DSQ_ID: u64 = 0;

pub struct RoundRobin {
    slice_ns: u64,
    enqueue_time: TypedMap<u32, u64>,
    counters: Arc<SchedCounters>,
}

impl RoundRobin {
    pub fn new(slice_ns: u64, enqueue_time: TypedMap<u32, u64>) -> Self {
        Self {
            slice_ns,
            enqueue_time,
            counters: Arc::new(SchedCounters::new()),
        }
    }

    #[inline(always)]
    fn stamp(&self, ctx: &ScxContext<'_>, task: &Task) {
        // LRU map, never full
        let _ = self.enqueue_time.put(&task.pid, &ctx.now_ns());
    }
}

impl Scheduler for RoundRobin {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn init(&self, ctx: &ScxContext<'_>) -> i32 {
        match ctx.create_dsq(RR_DSQ_ID as i64) {
            Ok(_) => 0,
            Err(err) => err.as_rc(),
        }
    }

    fn select_cpu(&self, ctx: &ScxContext<'_>, task: &Task, prev_cpu: CpuId, wake_flags: u64) -> CpuId {
        let (cpu, idle) = ctx.select_cpu_dfl(task, prev_cpu, wake_flags);
        if idle {
            self.stamp(ctx, task);
            ctx.dispatch(task, DSQ_LOCAL, self.slice_ns, 0);
            self.counters.inc_direct_dispatch();
        }
        cpu
    }

    fn enqueue(&self, ctx: &ScxContext<'_>, task: &Task, enq_flags: u64) {
        ctx.dispatch(task, RR_DSQ_ID, self.slice_ns, enq_flags);
        self.stamp(ctx, task);
    }

    fn dispatch(&self, ctx: &ScxContext<'_>, _cpu: CpuId, _prev: Option<&Task>) {
        ctx.consume(RR_DSQ_ID);
    }

    fn running(&self, ctx: &ScxContext<'_>, task: &Task) {
        if let Some(enqueued_at) = self.enqueue_time.get(&task.pid) {
            self.counters
                .record_wait(ctx.now_ns().saturating_sub(enqueued_at));
        }
    }

    fn stopping(&self, _ctx: &ScxContext<'_>, task: &Task, _runnable: bool) {
        self.counters
            .record_slice(used_time(self.slice_ns, task.slice_ns), self.slice_ns);
    }

    fn counters(&self) -> Option<Arc<SchedCounters>> {
        Some(Arc::clone(&self.counters))
    }
}
