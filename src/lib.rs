/*!
 * scx-host Library
 * Host runtime for kernel extensions and pluggable CPU schedulers
 *
 * Loads an extension image, attaches its programs (generic, LSM, cgroup,
 * XDP, traffic control, struct-ops schedulers), and releases everything as a
 * unit when the session ends.
 */

pub mod attach;
pub mod backend;
pub mod core;
pub mod loader;
pub mod maps;
pub mod monitoring;
pub mod resources;
pub mod sched;
pub mod session;

// Re-exports
pub use attach::AttachmentManager;
pub use backend::{KernelBackend, SimulationBackend};
pub use core::{ExtError, ExtResult, HostConfig, LookupKind, PolicyConfig};
pub use loader::{ExtensionHandle, ExtensionImage, Manifest, MapSpec, ProgramHandle};
pub use maps::{MapKind, TypedMap};
pub use monitoring::{init_tracing, StatsReporter};
pub use resources::{ResourceHandle, ResourceSet};
pub use sched::{ExtClass, PolicyKind, Scheduler, ScxContext, ScxError, Task, TaskProfile, Workload};
pub use session::{Session, SessionState};
