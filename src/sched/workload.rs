/*!
 * Synthetic Workload
 * Scripted run/sleep tasks that drive the scheduling class
 *
 * Each step picks a task for every CPU, lets all of them run in parallel for
 * their burst (bounded by the granted slice), advances the virtual clock, and
 * stops them again. Tasks with a sleep phase go to sleep after a full burst
 * and are woken once their sleep has elapsed.
 */

use super::class::ExtClass;
use super::types::{ScxError, Task};
use crate::core::limits::WAKE_TTWU;
use crate::core::types::{CpuId, Pid, TimeNs};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// Run/sleep pattern of one synthetic task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProfile {
    pub pid: Pid,
    pub weight: u32,
    /// CPU time per burst
    pub run_ns: u64,
    /// Sleep after each burst; zero means always runnable
    pub sleep_ns: u64,
}

impl TaskProfile {
    /// Never sleeps
    pub fn cpu_bound(pid: Pid) -> Self {
        Self {
            pid,
            weight: 100,
            run_ns: u64::MAX,
            sleep_ns: 0,
        }
    }

    /// Short bursts separated by long sleeps
    pub fn io_bound(pid: Pid) -> Self {
        Self {
            pid,
            weight: 100,
            run_ns: 100_000,
            sleep_ns: 2_000_000,
        }
    }

    /// Half the tasks CPU-bound, half I/O-bound, pids starting at `first_pid`
    pub fn mixed(first_pid: Pid, count: u32) -> Vec<Self> {
        (0..count)
            .map(|i| {
                let pid = first_pid + i;
                if i % 2 == 0 {
                    Self::cpu_bound(pid)
                } else {
                    Self::io_bound(pid)
                }
            })
            .collect()
    }
}

#[derive(Debug)]
struct TaskRun {
    profile: TaskProfile,
    burst_left: u64,
}

/// Outcome of one step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub ran: usize,
    pub elapsed_ns: u64,
}

pub struct Workload {
    class: Arc<ExtClass>,
    tasks: HashMap<Pid, TaskRun>,
    sleepers: BinaryHeap<Reverse<(TimeNs, Pid)>>,
    idle_tick_ns: u64,
}

impl Workload {
    /// Register every profile with the class and wake it
    pub fn spawn(class: Arc<ExtClass>, profiles: &[TaskProfile]) -> Result<Self, ScxError> {
        let mut tasks = HashMap::with_capacity(profiles.len());
        for profile in profiles {
            class.add_task(Task::new(profile.pid).with_weight(profile.weight))?;
            tasks.insert(
                profile.pid,
                TaskRun {
                    profile: *profile,
                    burst_left: profile.run_ns,
                },
            );
        }
        for profile in profiles {
            class.wake(profile.pid, WAKE_TTWU)?;
        }
        Ok(Self {
            class,
            tasks,
            sleepers: BinaryHeap::new(),
            idle_tick_ns: 100_000,
        })
    }

    pub fn class(&self) -> &Arc<ExtClass> {
        &self.class
    }

    /// Run every CPU once
    pub fn step(&mut self) -> Result<StepReport, ScxError> {
        self.wake_due()?;

        let mut running: Vec<(CpuId, Pid, u64)> = Vec::new();
        for cpu in 0..self.class.nr_cpus() {
            let Some(pid) = self.class.pick_next(cpu)? else {
                continue;
            };
            let slice = self.class.task(pid).map_or(1, |t| t.slice_ns.max(1));
            let burst = self.tasks.get(&pid).map_or(slice, |t| t.burst_left);
            running.push((cpu, pid, burst.min(slice)));
        }

        if running.is_empty() {
            let now = self.class.now_ns();
            let until_wake = self
                .sleepers
                .peek()
                .map_or(self.idle_tick_ns, |Reverse((at, _))| at.saturating_sub(now));
            let elapsed = until_wake.max(1);
            self.class.advance_clock(elapsed);
            return Ok(StepReport { ran: 0, elapsed_ns: elapsed });
        }

        let elapsed = running.iter().map(|&(_, _, ran)| ran).max().unwrap_or(0);
        let now = self.class.advance_clock(elapsed);

        for &(cpu, pid, ran) in &running {
            let Some(run) = self.tasks.get_mut(&pid) else {
                self.class.stop(cpu, ran, false)?;
                continue;
            };
            run.burst_left = run.burst_left.saturating_sub(ran);
            let finished = run.burst_left == 0;
            if finished {
                run.burst_left = run.profile.run_ns;
            }

            if finished && run.profile.sleep_ns > 0 {
                self.sleepers.push(Reverse((now + run.profile.sleep_ns, pid)));
                self.class.stop(cpu, ran, false)?;
            } else {
                self.class.stop(cpu, ran, true)?;
            }
        }

        Ok(StepReport {
            ran: running.len(),
            elapsed_ns: elapsed,
        })
    }

    /// Step until the virtual clock moved by at least `duration_ns`
    pub fn run_for(&mut self, duration_ns: u64) -> Result<u64, ScxError> {
        let deadline = self.class.now_ns().saturating_add(duration_ns);
        let mut steps = 0;
        while self.class.now_ns() < deadline {
            self.step()?;
            steps += 1;
        }
        Ok(steps)
    }

    fn wake_due(&mut self) -> Result<(), ScxError> {
        let now = self.class.now_ns();
        while let Some(Reverse((at, pid))) = self.sleepers.peek().copied() {
            if at > now {
                break;
            }
            self.sleepers.pop();
            self.class.wake(pid, WAKE_TTWU)?;
        }
        Ok(())
    }
}
