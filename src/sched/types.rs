/*!
 * Scheduling Class Types
 * Task view, class errors, and exit information
 */

use crate::core::types::{CpuId, DsqId, Pid};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default task weight (nice 0)
pub const WEIGHT_DEFAULT: u32 = 100;

/// Task as seen by scheduler callbacks
///
/// Callbacks receive a copy; changes only stick where the class writes them
/// back (`enable`) or through kfuncs (`dispatch` sets the slice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub pid: Pid,
    pub weight: u32,
    /// Remaining slice; charged by the class when the task stops
    pub slice_ns: u64,
    pub dsq_vtime: u64,
    pub last_cpu: CpuId,
}

impl Task {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            weight: WEIGHT_DEFAULT,
            slice_ns: 0,
            dsq_vtime: 0,
            last_cpu: 0,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }
}

/// Scheduling class errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "error_type")]
pub enum ScxError {
    #[error("dispatch queue {0:#x} already exists")]
    DsqExists(DsqId),

    #[error("dispatch queue {0:#x} does not exist")]
    DsqNotFound(DsqId),

    #[error("invalid dispatch queue id {0}")]
    InvalidDsqId(i64),

    #[error("invalid CPU {0}")]
    InvalidCpu(CpuId),

    #[error("unknown task {0}")]
    UnknownTask(Pid),

    #[error("task {0} is already registered")]
    TaskExists(Pid),

    #[error("task {0} was dispatched while already queued")]
    DoubleDispatch(Pid),

    #[error("task {0} was not placed in any dispatch queue")]
    TaskNotQueued(Pid),

    #[error("init returned {0}")]
    InitFailed(i32),

    #[error("scheduler {0} is already installed")]
    Busy(String),

    #[error("scheduler error: {0}")]
    Policy(String),
}

impl ScxError {
    /// Closest kernel error code
    pub fn errno(&self) -> Errno {
        match self {
            ScxError::DsqExists(_) | ScxError::TaskExists(_) => Errno::EEXIST,
            ScxError::DsqNotFound(_) | ScxError::UnknownTask(_) => Errno::ENOENT,
            ScxError::InvalidDsqId(_) | ScxError::InvalidCpu(_) => Errno::EINVAL,
            ScxError::Busy(_) => Errno::EBUSY,
            ScxError::InitFailed(rc) if *rc < 0 => Errno::from_raw(-rc),
            _ => Errno::EINVAL,
        }
    }

    /// Negative errno, the way kfuncs report failure to a policy
    pub fn as_rc(&self) -> i32 {
        -(self.errno() as i32)
    }
}

/// Why the last installed scheduler stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub policy: String,
    pub reason: ScxError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ScxError::DsqExists(0).errno(), Errno::EEXIST);
        assert_eq!(ScxError::DsqExists(0).as_rc(), -(Errno::EEXIST as i32));
        assert_eq!(ScxError::InitFailed(-(Errno::ENOMEM as i32)).errno(), Errno::ENOMEM);
        assert_eq!(ScxError::InitFailed(1).errno(), Errno::EINVAL);
    }

    #[test]
    fn test_weight_never_zero() {
        assert_eq!(Task::new(1).with_weight(0).weight, 1);
    }
}
