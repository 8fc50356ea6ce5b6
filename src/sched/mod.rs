/*!
 * Scheduler Contract
 * Pluggable scheduling policies and the class that drives them
 *
 * A policy implements the seven `Scheduler` callbacks; the `ExtClass` is the
 * only caller and hands every callback a `ScxContext` with the dispatch queue
 * kfuncs. Policies are selected at attach time and never swapped while
 * installed.
 */

pub mod class;
pub mod context;
pub mod dsq;
pub mod policies;
pub mod stats;
pub mod traits;
pub mod types;
pub mod usage;
pub mod workload;

pub use class::ExtClass;
pub use context::ScxContext;
pub use policies::{PolicyKind, TaskMaps};
pub use stats::{SchedCounters, StatsSnapshot};
pub use traits::Scheduler;
pub use types::{ExitInfo, ScxError, Task};
pub use workload::{TaskProfile, Workload};
