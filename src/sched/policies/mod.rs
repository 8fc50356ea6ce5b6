/*!
 * Sample Policies
 * Configurations of the scheduler contract shipped with the host
 */

mod fifo;
mod io_priority;
mod round_robin;

pub use fifo::{Fifo, SHARED_DSQ_ID};
pub use io_priority::{IoPriority, UsageModel, NORMAL_DSQ_ID, PRIO_DSQ_ID};
pub use round_robin::{RoundRobin, RR_DSQ_ID};

use super::traits::Scheduler;
use crate::core::config::PolicyConfig;
use crate::core::limits::TASK_MAP_CAPACITY;
use crate::loader::{Manifest, MapSpec};
use crate::maps::{LruStore, MapKind, MapPod, TypedMap};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Per-task enqueue timestamps
pub const ENQUEUE_TIME_MAP: &str = "enqueue_time";

/// Per-task slice usage (last sample or moving average)
pub const SLICE_USAGE_MAP: &str = "slice_usage";

/// Manifest property naming the scheduler
pub const SCHED_NAME_PROPERTY: &str = "sched_name";

const CALLBACKS: [&str; 7] = [
    "init",
    "select_cpu",
    "enqueue",
    "dispatch",
    "running",
    "stopping",
    "enable",
];

/// Per-task bookkeeping maps, keyed by pid
#[derive(Debug, Clone)]
pub struct TaskMaps {
    pub enqueue_time: TypedMap<u32, u64>,
    pub slice_usage: TypedMap<u32, u64>,
}

impl TaskMaps {
    /// Maps not backed by a loaded extension, for tests and benches
    pub fn standalone() -> Self {
        let store = |name: &str| {
            TypedMap::new(
                name,
                Arc::new(LruStore::new(u32::SIZE, u64::SIZE, TASK_MAP_CAPACITY)),
            )
        };
        Self {
            enqueue_time: store(ENQUEUE_TIME_MAP),
            slice_usage: store(SLICE_USAGE_MAP),
        }
    }
}

/// Manifest of a struct-ops scheduler: the ops map plus one entry per callback
fn struct_ops_manifest(object: &str, sched_name: &str, ops_map: &str) -> Manifest {
    CALLBACKS.iter().fold(
        Manifest::new(object)
            .property(SCHED_NAME_PROPERTY, sched_name)
            .map(MapSpec::struct_ops(ops_map)),
        |manifest, callback| {
            manifest.entry(
                format!("{ops_map}_{callback}"),
                format!("struct_ops/{callback}"),
            )
        },
    )
}

/// Selectable sample policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// One shared FIFO queue
    Fifo,
    /// Shared queue with direct dispatch to idle CPUs
    RoundRobin,
    /// Two queues, classified by the last slice usage sample
    IoPriority,
    /// Two queues, classified by a moving average of slice usage
    WeightedAvg,
}

impl PolicyKind {
    /// Name of the struct-ops map the policy is bound through
    pub fn ops_map(&self) -> &'static str {
        match self {
            PolicyKind::Fifo => "fifo_ops",
            PolicyKind::RoundRobin => "rr_ops",
            PolicyKind::IoPriority => "io_prio_ops",
            PolicyKind::WeightedAvg => "prio_avg_ops",
        }
    }

    pub fn sched_name(&self) -> &'static str {
        match self {
            PolicyKind::Fifo => "fifo_scheduler",
            PolicyKind::RoundRobin => "round_robin_scheduler",
            PolicyKind::IoPriority => "io_priority_scheduler",
            PolicyKind::WeightedAvg => "prio_weighted_avg_scheduler",
        }
    }

    /// Whether the policy needs the per-task maps
    pub fn uses_task_maps(&self) -> bool {
        !matches!(self, PolicyKind::Fifo)
    }

    /// Manifest the compiled extension for this policy carries
    pub fn manifest(&self) -> Manifest {
        let manifest = struct_ops_manifest(&self.to_string(), self.sched_name(), self.ops_map());
        match self {
            PolicyKind::Fifo => manifest,
            PolicyKind::RoundRobin => manifest.map(MapSpec::per_task::<u32, u64>(
                ENQUEUE_TIME_MAP,
                MapKind::LruHash,
            )),
            PolicyKind::IoPriority | PolicyKind::WeightedAvg => manifest
                .map(MapSpec::per_task::<u32, u64>(ENQUEUE_TIME_MAP, MapKind::LruHash))
                .map(MapSpec::per_task::<u32, u64>(SLICE_USAGE_MAP, MapKind::LruHash)),
        }
    }

    /// Build the policy on top of the given maps
    pub fn build(&self, config: &PolicyConfig, maps: TaskMaps) -> Arc<dyn Scheduler> {
        match self {
            PolicyKind::Fifo => Arc::new(Fifo::new()),
            PolicyKind::RoundRobin => Arc::new(RoundRobin::new(config.slice_ns, maps.enqueue_time)),
            PolicyKind::IoPriority => Arc::new(IoPriority::new(config, UsageModel::LastSample, maps)),
            PolicyKind::WeightedAvg => Arc::new(IoPriority::new(
                config,
                UsageModel::Ewma {
                    weight_fp: config.weight_fp(),
                    initial_ns: config.initial_usage_ns(),
                },
                maps,
            )),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::Fifo => "fifo",
            PolicyKind::RoundRobin => "round-robin",
            PolicyKind::IoPriority => "io-priority",
            PolicyKind::WeightedAvg => "weighted-avg",
        };
        f.write_str(name)
    }
}
