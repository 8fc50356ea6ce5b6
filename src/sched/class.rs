/*!
 * Extensible Scheduling Class
 * Drives a policy's callbacks with sched_ext ordering guarantees
 *
 * Task lifecycle: `add_task` (enable) -> `wake` (select_cpu, then enqueue
 * unless directly dispatched) -> `pick_next` (dispatch when the local queue
 * is empty, then running) -> `stop` (stopping, then re-enqueue if still
 * runnable). Without an installed policy, or after a policy aborts, the class
 * falls back to plain FIFO scheduling on the global queue.
 *
 * All state sits behind one lock, which serializes callback entry the way the
 * kernel serializes it per runqueue.
 */

use super::context::{PendingDispatch, ScxContext};
use super::dsq::DispatchQueues;
use super::stats::SchedCounters;
use super::traits::Scheduler;
use super::types::{ExitInfo, ScxError, Task};
use crate::core::limits::{DSQ_GLOBAL, MAX_CPUS, SLICE_DFL_NS};
use crate::core::types::{CpuId, Pid, TimeNs};
use ahash::RandomState;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Sleeping,
    Queued,
    Running(CpuId),
}

#[derive(Debug)]
struct TaskSlot {
    task: Task,
    state: TaskState,
}

struct ClassState {
    policy: Option<Arc<dyn Scheduler>>,
    queues: DispatchQueues,
    tasks: HashMap<Pid, TaskSlot, RandomState>,
    current: Vec<Option<Pid>>,
    previous: Vec<Option<Pid>>,
    exit: Option<ExitInfo>,
}

/// Simulated sched_ext scheduling class
pub struct ExtClass {
    state: Mutex<ClassState>,
    clock: AtomicU64,
    nr_cpus: u32,
}

impl ExtClass {
    pub fn new(nr_cpus: u32) -> Self {
        let nr_cpus = nr_cpus.clamp(1, MAX_CPUS);
        Self {
            state: Mutex::new(ClassState {
                policy: None,
                queues: DispatchQueues::new(nr_cpus),
                tasks: HashMap::with_hasher(RandomState::new()),
                current: vec![None; nr_cpus as usize],
                previous: vec![None; nr_cpus as usize],
                exit: None,
            }),
            clock: AtomicU64::new(0),
            nr_cpus,
        }
    }

    pub fn nr_cpus(&self) -> u32 {
        self.nr_cpus
    }

    #[inline]
    pub fn now_ns(&self) -> TimeNs {
        self.clock.load(Ordering::Acquire)
    }

    /// Move the virtual clock forward
    pub fn advance_clock(&self, delta_ns: u64) -> TimeNs {
        self.clock.fetch_add(delta_ns, Ordering::AcqRel) + delta_ns
    }

    // =========================================================================
    // Policy installation
    // =========================================================================

    /// Install a policy, running its `init` and enabling known tasks
    pub fn install(&self, policy: Arc<dyn Scheduler>) -> Result<(), ScxError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(active) = &state.policy {
            return Err(ScxError::Busy(active.name().to_string()));
        }

        state.policy = Some(Arc::clone(&policy));
        let rc = self
            .call(state, 0, |p, ctx| p.init(ctx))
            .and_then(|(rc, pending)| match rc {
                0 => self.place(state, pending, 0).map(|_| ()),
                rc => Err(ScxError::InitFailed(rc)),
            });
        if let Err(err) = rc {
            state.policy = None;
            Self::requeue_orphans(state);
            return Err(err);
        }

        let mut pids: Vec<Pid> = state.tasks.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            self.enable_locked(state, pid);
        }

        state.exit = None;
        info!("Scheduler {} installed on {} CPUs", policy.name(), self.nr_cpus);
        Ok(())
    }

    /// Remove the active policy; queued tasks move to the global queue
    pub fn uninstall(&self) -> Option<String> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let policy = state.policy.take()?;
        Self::requeue_orphans(state);
        info!("Scheduler {} uninstalled", policy.name());
        Some(policy.name().to_string())
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().policy.is_some()
    }

    pub fn policy_name(&self) -> Option<String> {
        self.state.lock().policy.as_ref().map(|p| p.name().to_string())
    }

    pub fn counters(&self) -> Option<Arc<SchedCounters>> {
        self.state.lock().policy.as_ref().and_then(|p| p.counters())
    }

    /// Why the last policy was kicked out, if it aborted
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.state.lock().exit.clone()
    }

    // =========================================================================
    // Task lifecycle
    // =========================================================================

    /// Register a sleeping task and run `enable` for it
    pub fn add_task(&self, task: Task) -> Result<(), ScxError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.tasks.contains_key(&task.pid) {
            return Err(ScxError::TaskExists(task.pid));
        }
        let mut task = task;
        task.last_cpu = task.last_cpu.min(self.nr_cpus - 1);
        state.tasks.insert(
            task.pid,
            TaskSlot {
                task,
                state: TaskState::Sleeping,
            },
        );
        self.enable_locked(state, task.pid);
        Ok(())
    }

    /// Forget a task (it exited)
    pub fn remove_task(&self, pid: Pid) -> Result<(), ScxError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let slot = state.tasks.remove(&pid).ok_or(ScxError::UnknownTask(pid))?;
        match slot.state {
            TaskState::Queued => {
                state.queues.remove(pid);
            }
            TaskState::Running(cpu) => {
                state.current[cpu as usize] = None;
                state.queues.set_idle(cpu, true);
            }
            TaskState::Sleeping => {}
        }
        Ok(())
    }

    pub fn task(&self, pid: Pid) -> Option<Task> {
        self.state.lock().tasks.get(&pid).map(|slot| slot.task)
    }

    /// Wake a sleeping task: `select_cpu`, then `enqueue` unless it was
    /// dispatched directly
    pub fn wake(&self, pid: Pid, wake_flags: u64) -> Result<(), ScxError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let slot = state.tasks.get_mut(&pid).ok_or(ScxError::UnknownTask(pid))?;
        if slot.state != TaskState::Sleeping {
            return Ok(());
        }
        slot.state = TaskState::Queued;
        let task = slot.task;

        if state.policy.is_none() {
            return Self::default_enqueue(state, pid);
        }

        let prev_cpu = task.last_cpu;
        let outcome = self
            .call(state, prev_cpu, |p, ctx| p.select_cpu(ctx, &task, prev_cpu, wake_flags))
            .and_then(|(cpu, pending)| {
                if cpu >= self.nr_cpus {
                    return Err(ScxError::InvalidCpu(cpu));
                }
                self.place(state, pending, cpu).map(|placed| (cpu, placed))
            });
        let Some((cpu, placed)) = self.settle(state, outcome) else {
            return Ok(());
        };

        if let Some(slot) = state.tasks.get_mut(&pid) {
            slot.task.last_cpu = cpu;
        }
        if !placed.contains(&pid) {
            self.enqueue_locked(state, pid, cpu, 0);
        }
        Ok(())
    }

    /// Enqueue a sleeping task without CPU selection
    pub fn enqueue_task(&self, pid: Pid, enq_flags: u64) -> Result<(), ScxError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let slot = state.tasks.get_mut(&pid).ok_or(ScxError::UnknownTask(pid))?;
        if slot.state != TaskState::Sleeping {
            return Ok(());
        }
        slot.state = TaskState::Queued;
        let cpu = slot.task.last_cpu;

        if state.policy.is_none() {
            return Self::default_enqueue(state, pid);
        }
        self.enqueue_locked(state, pid, cpu, enq_flags);
        Ok(())
    }

    /// Pick the next task for an idle CPU
    ///
    /// Calls `dispatch` when the local queue is empty, falls back to the
    /// global queue, then calls `running`. Returns the current task if the
    /// CPU is busy.
    pub fn pick_next(&self, cpu: CpuId) -> Result<Option<Pid>, ScxError> {
        self.check_cpu(cpu)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(pid) = state.current[cpu as usize] {
            return Ok(Some(pid));
        }

        if state.policy.is_some() && state.queues.local_len(cpu) == 0 {
            let prev = state.previous[cpu as usize]
                .and_then(|pid| state.tasks.get(&pid))
                .filter(|slot| slot.state == TaskState::Queued)
                .map(|slot| slot.task);
            let outcome = self
                .call(state, cpu, |p, ctx| p.dispatch(ctx, cpu, prev.as_ref()))
                .and_then(|((), pending)| self.place(state, pending, cpu));
            self.settle(state, outcome);
        }

        let next = match state.queues.pop_local(cpu) {
            Some(pid) => Some(pid),
            None => state.queues.pop(DSQ_GLOBAL)?,
        };
        let Some(pid) = next else {
            state.queues.set_idle(cpu, true);
            return Ok(None);
        };

        state.queues.set_idle(cpu, false);
        state.current[cpu as usize] = Some(pid);
        let task = match state.tasks.get_mut(&pid) {
            Some(slot) => {
                slot.state = TaskState::Running(cpu);
                slot.task.last_cpu = cpu;
                if slot.task.slice_ns == 0 {
                    slot.task.slice_ns = SLICE_DFL_NS;
                }
                slot.task
            }
            None => return Err(ScxError::UnknownTask(pid)),
        };

        if state.policy.is_some() {
            let outcome = self
                .call(state, cpu, |p, ctx| p.running(ctx, &task))
                .and_then(|((), pending)| self.place(state, pending, cpu));
            self.settle(state, outcome);
        }
        Ok(Some(pid))
    }

    /// Take the current task off `cpu` after it ran for `ran_ns`
    ///
    /// Charges the slice, calls `stopping`, and re-enqueues the task if it is
    /// still runnable and the policy did not requeue it itself.
    pub fn stop(&self, cpu: CpuId, ran_ns: u64, runnable: bool) -> Result<Option<Pid>, ScxError> {
        self.check_cpu(cpu)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(pid) = state.current[cpu as usize].take() else {
            return Ok(None);
        };
        state.queues.set_idle(cpu, true);
        state.previous[cpu as usize] = Some(pid);

        let task = {
            let slot = state.tasks.get_mut(&pid).ok_or(ScxError::UnknownTask(pid))?;
            slot.task.slice_ns = slot.task.slice_ns.saturating_sub(ran_ns);
            let weight = u64::from(slot.task.weight.max(1));
            slot.task.dsq_vtime = slot
                .task
                .dsq_vtime
                .saturating_add(ran_ns.saturating_mul(100) / weight);
            slot.task
        };

        if state.policy.is_some() {
            let outcome = self
                .call(state, cpu, |p, ctx| p.stopping(ctx, &task, runnable))
                .and_then(|((), pending)| self.place(state, pending, cpu));
            self.settle(state, outcome);
        }

        let still_running = state
            .tasks
            .get(&pid)
            .is_some_and(|slot| slot.state == TaskState::Running(cpu));
        if !still_running {
            return Ok(Some(pid));
        }

        if runnable {
            if let Some(slot) = state.tasks.get_mut(&pid) {
                slot.state = TaskState::Queued;
            }
            if state.policy.is_some() {
                self.enqueue_locked(state, pid, cpu, 0);
            } else {
                Self::default_enqueue(state, pid)?;
            }
        } else if let Some(slot) = state.tasks.get_mut(&pid) {
            slot.state = TaskState::Sleeping;
        }
        Ok(Some(pid))
    }

    pub fn current(&self, cpu: CpuId) -> Option<Pid> {
        self.state.lock().current.get(cpu as usize).copied().flatten()
    }

    /// Tasks waiting on a shared queue
    pub fn nr_queued(&self, dsq: u64) -> Option<usize> {
        self.state.lock().queues.len(dsq)
    }

    pub fn local_len(&self, cpu: CpuId) -> usize {
        self.state.lock().queues.local_len(cpu)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_cpu(&self, cpu: CpuId) -> Result<(), ScxError> {
        if cpu < self.nr_cpus {
            Ok(())
        } else {
            Err(ScxError::InvalidCpu(cpu))
        }
    }

    /// Run one callback against a fresh context
    fn call<R>(
        &self,
        state: &mut ClassState,
        cpu: CpuId,
        f: impl FnOnce(&dyn Scheduler, &ScxContext<'_>) -> R,
    ) -> Result<(R, Vec<PendingDispatch>), ScxError> {
        let Some(policy) = state.policy.clone() else {
            return Err(ScxError::Policy("no scheduler installed".into()));
        };
        let ctx = ScxContext::new(&mut state.queues, cpu, self.now_ns());
        let out = f(policy.as_ref(), &ctx);
        ctx.finish().map(|pending| (out, pending))
    }

    /// Apply buffered dispatches; `DSQ_LOCAL` resolves to `local_cpu`
    fn place(
        &self,
        state: &mut ClassState,
        pending: Vec<PendingDispatch>,
        local_cpu: CpuId,
    ) -> Result<Vec<Pid>, ScxError> {
        let mut placed = Vec::with_capacity(pending.len());
        for dispatch in pending {
            let slot = state
                .tasks
                .get_mut(&dispatch.pid)
                .ok_or(ScxError::UnknownTask(dispatch.pid))?;
            if placed.contains(&dispatch.pid) || state.queues.contains(dispatch.pid) {
                return Err(ScxError::DoubleDispatch(dispatch.pid));
            }
            state.queues.push(dispatch.dsq, local_cpu, dispatch.pid)?;
            slot.task.slice_ns = dispatch.slice_ns;
            slot.state = TaskState::Queued;
            placed.push(dispatch.pid);
        }
        Ok(placed)
    }

    /// Unwrap a callback outcome, aborting the policy on error
    fn settle<T>(&self, state: &mut ClassState, outcome: Result<T, ScxError>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(reason) => {
                self.abort(state, reason);
                None
            }
        }
    }

    fn enqueue_locked(&self, state: &mut ClassState, pid: Pid, cpu: CpuId, enq_flags: u64) {
        let Some(task) = state.tasks.get(&pid).map(|slot| slot.task) else {
            return;
        };
        let outcome = self
            .call(state, cpu, |p, ctx| p.enqueue(ctx, &task, enq_flags))
            .and_then(|((), pending)| self.place(state, pending, cpu))
            .and_then(|placed| {
                if placed.contains(&pid) {
                    Ok(())
                } else {
                    Err(ScxError::TaskNotQueued(pid))
                }
            });
        self.settle(state, outcome);
    }

    fn enable_locked(&self, state: &mut ClassState, pid: Pid) {
        if state.policy.is_none() {
            return;
        }
        let Some(mut task) = state.tasks.get(&pid).map(|slot| slot.task) else {
            return;
        };
        let cpu = task.last_cpu;
        let outcome = self.call(state, cpu, |p, ctx| {
            p.enable(ctx, &mut task);
            task
        });
        if let Some((task, _)) = self.settle(state, outcome) {
            if let Some(slot) = state.tasks.get_mut(&pid) {
                slot.task = task;
            }
        }
    }

    fn default_enqueue(state: &mut ClassState, pid: Pid) -> Result<(), ScxError> {
        state.queues.push(DSQ_GLOBAL, 0, pid)?;
        if let Some(slot) = state.tasks.get_mut(&pid) {
            slot.state = TaskState::Queued;
            slot.task.slice_ns = SLICE_DFL_NS;
        }
        Ok(())
    }

    /// Kick the policy out and fall back to the global queue
    fn abort(&self, state: &mut ClassState, reason: ScxError) {
        let Some(policy) = state.policy.take() else {
            return;
        };
        warn!(
            "Scheduler {} aborted: {}; falling back to the default scheduler",
            policy.name(),
            reason
        );
        Self::requeue_orphans(state);
        state.exit = Some(ExitInfo {
            policy: policy.name().to_string(),
            reason,
        });
    }

    /// Move tasks of destroyed user queues, and queued tasks that never made
    /// it into a queue, onto the global queue
    fn requeue_orphans(state: &mut ClassState) {
        let mut orphans = state.queues.destroy_user_queues();
        let mut stranded: Vec<Pid> = Vec::new();
        for (&pid, slot) in &state.tasks {
            if slot.state == TaskState::Queued
                && !orphans.contains(&pid)
                && !state.queues.contains(pid)
            {
                stranded.push(pid);
            }
        }
        stranded.sort_unstable();
        orphans.extend(stranded);

        for pid in orphans {
            if state.queues.push(DSQ_GLOBAL, 0, pid).is_ok() {
                if let Some(slot) = state.tasks.get_mut(&pid) {
                    slot.state = TaskState::Queued;
                    slot.task.slice_ns = SLICE_DFL_NS;
                }
            }
        }
    }
}
