/*!
 * Backend Types
 * Descriptions of kernel objects handed across the backend boundary
 */

use crate::core::types::{IfIndex, MapId, ProgramId, TcDirection};
use crate::maps::MapKind;
use serde::{Deserialize, Serialize};

/// Platform a backend talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Linux with BPF and sched_ext
    Linux,
    /// In-process simulated kernel
    #[default]
    Simulation,
}

/// Optional kernel capabilities an image may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelFeatures {
    /// sched_ext struct-ops scheduling class
    pub sched_ext: bool,
    /// BPF LSM hooks
    pub lsm: bool,
}

impl Default for KernelFeatures {
    fn default() -> Self {
        Self {
            sched_ext: true,
            lsm: true,
        }
    }
}

/// A program as reported by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub id: ProgramId,
    pub name: String,
    pub section: String,
}

/// A map as reported by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub id: MapId,
    pub name: String,
    pub kind: MapKind,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
}

/// Traffic-control hook point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcHook {
    pub ifindex: IfIndex,
    pub direction: TcDirection,
}

/// Traffic-control filter options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcOpts {
    pub handle: u32,
    pub priority: u32,
}
