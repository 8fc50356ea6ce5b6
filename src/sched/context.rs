/*!
 * Scheduler Kfuncs
 * Primitives a policy may call from inside its callbacks
 *
 * A context lives for exactly one callback invocation. Dispatches are
 * buffered and applied by the class once the callback returns; consumes act
 * immediately. Misuse (unknown queues) is recorded as a runtime error and the
 * class aborts the policy when the callback returns.
 */

use super::dsq::DispatchQueues;
use super::types::{ScxError, Task};
use crate::core::limits::{DSQ_GLOBAL, DSQ_LOCAL};
use crate::core::types::{CpuId, DsqId, Pid, TimeNs};
use std::cell::RefCell;

/// A dispatch requested by a callback, applied after it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingDispatch {
    pub pid: Pid,
    pub dsq: DsqId,
    pub slice_ns: u64,
}

/// Kfunc surface handed to every callback
pub struct ScxContext<'a> {
    queues: RefCell<&'a mut DispatchQueues>,
    cpu: CpuId,
    now: TimeNs,
    pending: RefCell<Vec<PendingDispatch>>,
    error: RefCell<Option<ScxError>>,
}

impl<'a> ScxContext<'a> {
    pub(crate) fn new(queues: &'a mut DispatchQueues, cpu: CpuId, now: TimeNs) -> Self {
        Self {
            queues: RefCell::new(queues),
            cpu,
            now,
            pending: RefCell::new(Vec::new()),
            error: RefCell::new(None),
        }
    }

    /// Current time of the class clock
    #[inline(always)]
    pub fn now_ns(&self) -> TimeNs {
        self.now
    }

    /// CPU the callback runs for
    #[inline(always)]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn nr_cpus(&self) -> u32 {
        self.queues.borrow().nr_cpus()
    }

    /// Create a dispatch queue; pass `DSQ_AUTO_ASSIGN` to get a free ID
    ///
    /// A colliding ID fails with `DsqExists` instead of reusing the queue.
    pub fn create_dsq(&self, id: i64) -> Result<DsqId, ScxError> {
        self.queues.borrow_mut().create(id)
    }

    /// Default CPU selection: keep `prev_cpu` if idle, else any idle CPU
    ///
    /// Returns the CPU and whether it was idle (and is now claimed).
    pub fn select_cpu_dfl(&self, _task: &Task, prev_cpu: CpuId, _wake_flags: u64) -> (CpuId, bool) {
        let mut queues = self.queues.borrow_mut();
        if prev_cpu < queues.nr_cpus() && queues.claim_idle(prev_cpu) {
            return (prev_cpu, true);
        }
        match queues.claim_any_idle() {
            Some(cpu) => (cpu, true),
            None => (prev_cpu.min(queues.nr_cpus().saturating_sub(1)), false),
        }
    }

    /// Queue a task on `dsq` with the given slice
    ///
    /// `DSQ_LOCAL` targets the selected CPU from `select_cpu`, otherwise the
    /// callback's CPU.
    pub fn dispatch(&self, task: &Task, dsq: DsqId, slice_ns: u64, _enq_flags: u64) {
        if !self.queues.borrow().exists(dsq) {
            self.record(ScxError::DsqNotFound(dsq));
            return;
        }
        self.pending.borrow_mut().push(PendingDispatch {
            pid: task.pid,
            dsq,
            slice_ns,
        });
    }

    /// Move the head of `dsq` to this CPU's local queue
    pub fn consume(&self, dsq: DsqId) -> bool {
        let moved = self.queues.borrow_mut().move_to_local(dsq, self.cpu);
        match moved {
            Ok(moved) => moved,
            Err(err) => {
                self.record(err);
                false
            }
        }
    }

    /// Tasks waiting on `dsq`; unknown queues report zero
    pub fn nr_queued(&self, dsq: DsqId) -> u32 {
        let queues = self.queues.borrow();
        let len = match dsq {
            DSQ_LOCAL => queues.local_len(self.cpu),
            DSQ_GLOBAL => queues.len(DSQ_GLOBAL).unwrap_or(0),
            id => queues.len(id).unwrap_or(0),
        };
        len as u32
    }

    /// Abort the policy once this callback returns
    pub fn error(&self, message: impl Into<String>) {
        self.record(ScxError::Policy(message.into()));
    }

    fn record(&self, err: ScxError) {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn finish(self) -> Result<Vec<PendingDispatch>, ScxError> {
        match self.error.into_inner() {
            Some(err) => Err(err),
            None => Ok(self.pending.into_inner()),
        }
    }
}
