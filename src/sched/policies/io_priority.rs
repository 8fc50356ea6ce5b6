/*!
 * I/O-Priority Policy
 * Two queues; tasks using little of their slice go to the priority queue
 *
 * Classification reads the per-task `slice_usage` map. With `LastSample` it
 * holds the most recent usage; with `Ewma` it holds a fixed-point moving
 * average. A task with no entry counts as fully CPU-bound.
 */

use crate::core::config::PolicyConfig;
use crate::core::limits::DSQ_LOCAL;
use crate::core::types::{CpuId, Pid};
use crate::maps::TypedMap;
use crate::sched::context::ScxContext;
use crate::sched::policies::TaskMaps;
use crate::sched::stats::SchedCounters;
use crate::sched::traits::Scheduler;
use crate::sched::types::Task;
use crate::sched::usage::{slice_usage_pct, used_time, weighted_average};
use std::sync::Arc;

/// Queue for CPU-bound and unknown tasks
pub const NORMAL_DSQ_ID: u64 = 0;

/// Queue for I/O-bound tasks, drained first
pub const PRIO_DSQ_ID: u64 = 1;

/// How `stopping` updates a task's recorded usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageModel {
    /// Keep only the latest sample
    LastSample,
    /// `avg' = avg * c + (1 - c) * sample`, `c` in fixed point
    Ewma { weight_fp: u64, initial_ns: u64 },
}

pub struct IoPriority {
    slice_ns: u64,
    prio_slice_ns: u64,
    threshold_pct: u64,
    model: UsageModel,
    enqueue_time: TypedMap<u32, u64>,
    slice_usage: TypedMap<u32, u64>,
    counters: Arc<SchedCounters>,
}

impl IoPriority {
    pub fn new(config: &PolicyConfig, model: UsageModel, maps: TaskMaps) -> Self {
        Self {
            slice_ns: config.slice_ns,
            prio_slice_ns: config.prio_slice_ns,
            threshold_pct: config.prio_slice_usage_pct,
            model,
            enqueue_time: maps.enqueue_time,
            slice_usage: maps.slice_usage,
            counters: Arc::new(SchedCounters::new()),
        }
    }

    /// Recorded usage as a percentage of the normal slice; 100 when unknown
    #[inline]
    pub fn slice_usage_percentage(&self, pid: Pid) -> u64 {
        slice_usage_pct(self.slice_usage.get(&pid), self.slice_ns)
    }

    #[inline]
    pub fn is_io_bound(&self, pid: Pid) -> bool {
        self.slice_usage_percentage(pid) < self.threshold_pct
    }

    pub fn model(&self) -> UsageModel {
        self.model
    }

    #[inline(always)]
    fn stamp(&self, ctx: &ScxContext<'_>, task: &Task) {
        let _ = self.enqueue_time.put(&task.pid, &ctx.now_ns());
    }
}

impl Scheduler for IoPriority {
    fn name(&self) -> &str {
        match self.model {
            UsageModel::LastSample => "io_priority",
            UsageModel::Ewma { .. } => "prio_weighted_avg",
        }
    }

    fn init(&self, ctx: &ScxContext<'_>) -> i32 {
        for id in [PRIO_DSQ_ID, NORMAL_DSQ_ID] {
            if let Err(err) = ctx.create_dsq(id as i64) {
                return err.as_rc();
            }
        }
        0
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
        if self.is_io_bound(task.pid) {
            ctx.dispatch(task, PRIO_DSQ_ID, self.prio_slice_ns, enq_flags);
        } else {
            ctx.dispatch(task, NORMAL_DSQ_ID, self.slice_ns, enq_flags);
        }
        self.stamp(ctx, task);
    }

    fn dispatch(&self, ctx: &ScxContext<'_>, _cpu: CpuId, _prev: Option<&Task>) {
        if ctx.nr_queued(PRIO_DSQ_ID) >= 1 {
            ctx.consume(PRIO_DSQ_ID);
        } else {
            ctx.consume(NORMAL_DSQ_ID);
        }
    }

    fn running(&self, ctx: &ScxContext<'_>, task: &Task) {
        let Some(enqueued_at) = self.enqueue_time.get(&task.pid) else {
            return;
        };
        let wait = ctx.now_ns().saturating_sub(enqueued_at);
        if self.is_io_bound(task.pid) {
            self.counters.record_prio_wait(wait);
        } else {
            self.counters.record_normal_wait(wait);
        }
        self.counters.record_wait(wait);
    }

    fn stopping(&self, _ctx: &ScxContext<'_>, task: &Task, _runnable: bool) {
        let used = used_time(self.slice_ns, task.slice_ns);
        let recorded = match self.model {
            UsageModel::LastSample => used,
            UsageModel::Ewma {
                weight_fp,
                initial_ns,
            } => {
                let prev = self.slice_usage.get(&task.pid).unwrap_or(initial_ns);
                weighted_average(prev, used, weight_fp)
            }
        };
        let _ = self.slice_usage.put(&task.pid, &recorded);
        self.counters.record_slice(used, self.slice_ns);
    }

    fn counters(&self) -> Option<Arc<SchedCounters>> {
        Some(Arc::clone(&self.counters))
    }
}
