/*!
 * Backend Traits
 * Platform-agnostic kernel operations used by the loader and attachment layer
 */

use super::types::*;
use crate::core::types::{IfIndex, LinkId, MapId, ObjectId, ProgramId};
use crate::maps::MapStore;
use crate::sched::Scheduler;
use nix::errno::Errno;
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::Arc;

/// Kernel interface behind an extension session
///
/// Every fallible call reports the raw OS error code; callers wrap it with
/// the name of whatever they were working on.
pub trait KernelBackend: Send + Sync {
    /// Get the platform type
    fn platform(&self) -> Platform;

    /// Optional features of the running kernel
    fn features(&self) -> KernelFeatures;

    // Objects

    /// Open an object file without loading it
    fn open_object(&self, path: &Path) -> Result<ObjectId, Errno>;

    /// Load and verify an opened object
    fn load_object(&self, obj: ObjectId) -> Result<(), Errno>;

    /// Release an object and everything it still owns
    fn close_object(&self, obj: ObjectId) -> Result<(), Errno>;

    /// Exact, case-sensitive program lookup
    fn find_program(&self, obj: ObjectId, name: &str) -> Option<ProgramInfo>;

    /// Exact, case-sensitive map lookup
    fn find_map(&self, obj: ObjectId, name: &str) -> Option<MapInfo>;

    /// Storage behind a map, for user-space access
    fn map_store(&self, map: MapId) -> Option<Arc<dyn MapStore>>;

    /// Drop the user-space handle of a map
    fn close_map(&self, map: MapId) -> Result<(), Errno>;

    // Links

    /// Attach using the hook encoded in the program's section
    fn attach_program(&self, prog: ProgramId) -> Result<LinkId, Errno>;

    /// Attach a cgroup program to an open cgroup directory
    fn attach_cgroup(&self, prog: ProgramId, cgroup_fd: RawFd) -> Result<LinkId, Errno>;

    /// Register a struct-ops map; for schedulers this installs `ops`
    fn attach_struct_ops(&self, map: MapId, ops: Arc<dyn Scheduler>) -> Result<LinkId, Errno>;

    /// Detach and free a link
    fn destroy_link(&self, link: LinkId) -> Result<(), Errno>;

    // Network

    fn xdp_attach(&self, ifindex: IfIndex, prog: ProgramId, flags: u32) -> Result<(), Errno>;

    fn xdp_detach(&self, ifindex: IfIndex, flags: u32) -> Result<(), Errno>;

    /// Remove the classifier qdisc of an interface
    fn tc_hook_destroy(&self, hook: TcHook) -> Result<(), Errno>;

    /// Create the classifier qdisc of an interface
    fn tc_hook_create(&self, hook: TcHook) -> Result<(), Errno>;

    fn tc_attach(&self, hook: TcHook, prog: ProgramId, opts: TcOpts) -> Result<(), Errno>;

    fn tc_detach(&self, hook: TcHook, opts: TcOpts) -> Result<(), Errno>;

    // Descriptors

    /// Close a descriptor opened for an attachment
    fn close_fd(&self, fd: RawFd) -> Result<(), Errno>;
}
