/*!
 * Resource Handles
 * Kernel-side state acquired by a session, and how to give it back
 */

use crate::backend::{KernelBackend, TcHook, TcOpts};
use crate::core::limits::TC_HANDLE;
use crate::core::types::{IfIndex, LinkId, MapId, ProgramId, TcDirection};
use crate::core::{ExtError, ExtResult};
use std::fmt;
use std::os::fd::RawFd;

/// Teardown stage a handle belongs to, in release order
///
/// The extension object itself is released between `Maps` and
/// `Descriptors`; it is owned by the `ExtensionHandle`, not the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReleaseStage {
    StructOps,
    Links,
    Network,
    TrafficControl,
    Maps,
    Descriptors,
}

impl ReleaseStage {
    pub const ALL: [ReleaseStage; 6] = [
        ReleaseStage::StructOps,
        ReleaseStage::Links,
        ReleaseStage::Network,
        ReleaseStage::TrafficControl,
        ReleaseStage::Maps,
        ReleaseStage::Descriptors,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReleaseStage::StructOps => "struct_ops",
            ReleaseStage::Links => "links",
            ReleaseStage::Network => "xdp",
            ReleaseStage::TrafficControl => "tc",
            ReleaseStage::Maps => "maps",
            ReleaseStage::Descriptors => "fds",
        }
    }
}

/// One reversible kernel acquisition
///
/// Detach calls take back exactly the value an attach call returned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    /// Generic, LSM or cgroup hook link
    AttachedLink { link: LinkId, program: String },
    /// A scheduler bound through its struct-ops map
    StructOpsBinding { link: LinkId, map: String },
    XdpAttachment { ifindex: IfIndex, flags: u32 },
    TcAttachment {
        prog: ProgramId,
        ifindex: IfIndex,
        direction: TcDirection,
        priority: u32,
    },
    OpenFileDescriptor { fd: RawFd },
    OpenMap { map: MapId, name: String },
}

impl ResourceHandle {
    pub fn stage(&self) -> ReleaseStage {
        match self {
            ResourceHandle::StructOpsBinding { .. } => ReleaseStage::StructOps,
            ResourceHandle::AttachedLink { .. } => ReleaseStage::Links,
            ResourceHandle::XdpAttachment { .. } => ReleaseStage::Network,
            ResourceHandle::TcAttachment { .. } => ReleaseStage::TrafficControl,
            ResourceHandle::OpenMap { .. } => ReleaseStage::Maps,
            ResourceHandle::OpenFileDescriptor { .. } => ReleaseStage::Descriptors,
        }
    }

    /// Reverse the acquisition in the kernel
    pub fn release(&self, backend: &dyn KernelBackend) -> ExtResult<()> {
        let result = match self {
            ResourceHandle::AttachedLink { link, .. }
            | ResourceHandle::StructOpsBinding { link, .. } => backend.destroy_link(*link),
            ResourceHandle::XdpAttachment { ifindex, flags } => backend.xdp_detach(*ifindex, *flags),
            ResourceHandle::TcAttachment {
                ifindex,
                direction,
                priority,
                ..
            } => backend.tc_detach(
                TcHook {
                    ifindex: *ifindex,
                    direction: *direction,
                },
                TcOpts {
                    handle: TC_HANDLE,
                    priority: *priority,
                },
            ),
            ResourceHandle::OpenFileDescriptor { fd } => backend.close_fd(*fd),
            ResourceHandle::OpenMap { map, .. } => backend.close_map(*map),
        };
        result.map_err(|errno| ExtError::detach(self.to_string(), errno))
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceHandle::AttachedLink { link, program } => write!(f, "{} ({})", program, link),
            ResourceHandle::StructOpsBinding { link, map } => {
                write!(f, "struct_ops {} ({})", map, link)
            }
            ResourceHandle::XdpAttachment { ifindex, .. } => write!(f, "xdp on if#{}", ifindex),
            ResourceHandle::TcAttachment {
                ifindex, direction, ..
            } => write!(f, "tc {} on if#{}", direction, ifindex),
            ResourceHandle::OpenFileDescriptor { fd } => write!(f, "fd {}", fd),
            ResourceHandle::OpenMap { name, map } => write!(f, "map {} ({})", name, map),
        }
    }
}
