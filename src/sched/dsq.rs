/*!
 * Dispatch Queues
 * Global, per-CPU local, and policy-created FIFO queues
 *
 * Queues hold task IDs only; the class owns the task records. User queues are
 * referenced by numeric ID and must be created before use.
 */

use super::types::ScxError;
use crate::core::limits::{DSQ_AUTO_ASSIGN, DSQ_FLAG_BUILTIN, DSQ_GLOBAL, DSQ_LOCAL};
use crate::core::types::{CpuId, DsqId, Pid};
use ahash::RandomState;
use std::collections::{HashMap, VecDeque};

/// All dispatch queues of one scheduling class
#[derive(Debug)]
pub struct DispatchQueues {
    shared: HashMap<DsqId, VecDeque<Pid>, RandomState>,
    locals: Vec<VecDeque<Pid>>,
    idle: Vec<bool>,
    next_auto: DsqId,
}

impl DispatchQueues {
    pub fn new(nr_cpus: u32) -> Self {
        let mut shared = HashMap::with_hasher(RandomState::new());
        shared.insert(DSQ_GLOBAL, VecDeque::new());
        Self {
            shared,
            locals: (0..nr_cpus).map(|_| VecDeque::new()).collect(),
            idle: vec![true; nr_cpus as usize],
            next_auto: 0,
        }
    }

    pub fn nr_cpus(&self) -> u32 {
        self.locals.len() as u32
    }

    /// Create a user queue; `-1` picks the lowest free ID
    pub fn create(&mut self, id: i64) -> Result<DsqId, ScxError> {
        let id = match id {
            DSQ_AUTO_ASSIGN => {
                while self.shared.contains_key(&self.next_auto) {
                    self.next_auto += 1;
                }
                self.next_auto
            }
            id if id < 0 => return Err(ScxError::InvalidDsqId(id)),
            id => id as DsqId,
        };
        if self.shared.contains_key(&id) {
            return Err(ScxError::DsqExists(id));
        }
        self.shared.insert(id, VecDeque::new());
        Ok(id)
    }

    pub fn exists(&self, id: DsqId) -> bool {
        id == DSQ_LOCAL || self.shared.contains_key(&id)
    }

    /// Append a task; `DSQ_LOCAL` resolves to `cpu`
    pub fn push(&mut self, id: DsqId, cpu: CpuId, pid: Pid) -> Result<(), ScxError> {
        let queue = if id == DSQ_LOCAL {
            self.locals
                .get_mut(cpu as usize)
                .ok_or(ScxError::InvalidCpu(cpu))?
        } else {
            self.shared.get_mut(&id).ok_or(ScxError::DsqNotFound(id))?
        };
        queue.push_back(pid);
        Ok(())
    }

    pub fn pop(&mut self, id: DsqId) -> Result<Option<Pid>, ScxError> {
        self.shared
            .get_mut(&id)
            .map(VecDeque::pop_front)
            .ok_or(ScxError::DsqNotFound(id))
    }

    /// Move the head of a shared queue to a CPU's local queue
    pub fn move_to_local(&mut self, id: DsqId, cpu: CpuId) -> Result<bool, ScxError> {
        if cpu as usize >= self.locals.len() {
            return Err(ScxError::InvalidCpu(cpu));
        }
        match self.pop(id)? {
            Some(pid) => {
                self.locals[cpu as usize].push_back(pid);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn pop_local(&mut self, cpu: CpuId) -> Option<Pid> {
        self.locals.get_mut(cpu as usize)?.pop_front()
    }

    pub fn len(&self, id: DsqId) -> Option<usize> {
        self.shared.get(&id).map(VecDeque::len)
    }

    pub fn local_len(&self, cpu: CpuId) -> usize {
        self.locals.get(cpu as usize).map_or(0, VecDeque::len)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.shared.values().chain(self.locals.iter()).any(|q| q.contains(&pid))
    }

    /// Drop a task from whichever queue holds it
    pub fn remove(&mut self, pid: Pid) -> bool {
        for queue in self.shared.values_mut().chain(self.locals.iter_mut()) {
            if let Some(pos) = queue.iter().position(|&p| p == pid) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Destroy every user queue, returning their tasks in ID then FIFO order
    pub fn destroy_user_queues(&mut self) -> Vec<Pid> {
        let mut ids: Vec<DsqId> = self
            .shared
            .keys()
            .copied()
            .filter(|id| id & DSQ_FLAG_BUILTIN == 0)
            .collect();
        ids.sort_unstable();

        let mut orphans = Vec::new();
        for id in ids {
            if let Some(queue) = self.shared.remove(&id) {
                orphans.extend(queue);
            }
        }
        self.next_auto = 0;
        orphans
    }

    /// Claim a CPU if it is idle
    pub fn claim_idle(&mut self, cpu: CpuId) -> bool {
        match self.idle.get_mut(cpu as usize) {
            Some(idle) if *idle => {
                *idle = false;
                true
            }
            _ => false,
        }
    }

    /// Claim the lowest-numbered idle CPU
    pub fn claim_any_idle(&mut self) -> Option<CpuId> {
        let cpu = self.idle.iter().position(|&idle| idle)?;
        self.idle[cpu] = false;
        Some(cpu as CpuId)
    }

    pub fn set_idle(&mut self, cpu: CpuId, idle: bool) {
        if let Some(slot) = self.idle.get_mut(cpu as usize) {
            *slot = idle;
        }
    }

    pub fn is_idle(&self, cpu: CpuId) -> bool {
        self.idle.get(cpu as usize).copied().unwrap_or(false)
    }
}
