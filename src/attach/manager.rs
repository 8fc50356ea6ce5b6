/*!
 * Attachment Manager
 * Hook-specific attach protocols on top of a loaded extension
 *
 * Every successful attach is registered in the caller's `ResourceSet` before
 * the next fallible step runs, so a later failure never leaks an attachment.
 */

use super::cgroup::find_cgroup_path;
use crate::backend::{KernelBackend, TcHook, TcOpts};
use crate::core::config::HostConfig;
use crate::core::errors::{ExtError, LookupKind};
use crate::core::limits::{TC_HANDLE, TC_PRIORITY, XDP_FLAGS_UPDATE_IF_NOEXIST};
use crate::core::types::{ExtResult, IfIndex, TcDirection};
use crate::loader::{ExtensionHandle, HookKind, ProgramHandle};
use crate::resources::{ResourceHandle, ResourceSet};
use crate::sched::Scheduler;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use std::sync::Arc;
use std::thread;

/// Performs attachments and records them for teardown
pub struct AttachmentManager {
    backend: Arc<dyn KernelBackend>,
    config: HostConfig,
}

impl AttachmentManager {
    pub fn new(backend: Arc<dyn KernelBackend>, config: HostConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Attach a program to the hook named by its section
    pub fn attach(&self, resources: &mut ResourceSet, prog: &ProgramHandle) -> ExtResult<ResourceHandle> {
        if !prog.hook.is_auto_attachable() {
            return Err(ExtError::attach_reason(
                &prog.name,
                format!("{} programs need an explicit attach target", prog.hook),
            ));
        }
        let link = self
            .backend
            .attach_program(prog.id)
            .map_err(|errno| ExtError::attach(&prog.name, errno))?;

        debug!("Attached {} to {}", prog.name, prog.section);
        Ok(resources.register(ResourceHandle::AttachedLink {
            link,
            program: prog.name.clone(),
        }))
    }

    /// Attach a program by name
    pub fn attach_by_name(
        &self,
        resources: &mut ResourceSet,
        extension: &ExtensionHandle,
        name: &str,
    ) -> ExtResult<ResourceHandle> {
        let prog = extension.find_program(name)?;
        self.attach(resources, &prog)
    }

    /// Attach every entry point the manifest marks for automatic attachment
    pub fn auto_attach_programs(
        &self,
        resources: &mut ResourceSet,
        extension: &ExtensionHandle,
    ) -> ExtResult<Vec<ResourceHandle>> {
        let names = extension.manifest().auto_attachable_programs()?;
        let mut attached = Vec::with_capacity(names.len());
        for name in names {
            attached.push(self.attach_by_name(resources, extension, name)?);
        }
        info!("Auto-attached {} program(s) of {}", attached.len(), extension.name());
        Ok(attached)
    }

    /// Attach one LSM program
    pub fn attach_lsm(&self, resources: &mut ResourceSet, prog: &ProgramHandle) -> ExtResult<ResourceHandle> {
        if prog.hook != HookKind::Lsm {
            return Err(ExtError::attach_reason(
                &prog.name,
                format!("section {} is not an LSM hook", prog.section),
            ));
        }
        self.attach(resources, prog)
    }

    /// Attach every LSM entry point declared by the extension
    pub fn attach_lsm_all(
        &self,
        resources: &mut ResourceSet,
        extension: &ExtensionHandle,
    ) -> ExtResult<Vec<ResourceHandle>> {
        let names: Vec<String> = extension
            .manifest()
            .entry_points_of(HookKind::Lsm)
            .map(|entry| entry.name.clone())
            .collect();

        let mut attached = Vec::with_capacity(names.len());
        for name in &names {
            let prog = extension.find_program(name)?;
            attached.push(self.attach_lsm(resources, &prog)?);
        }
        Ok(attached)
    }

    /// Attach a cgroup program to the named cgroup under the cgroup root
    ///
    /// Resolution, open and attach are retried together, since the cgroup
    /// hierarchy may not be populated yet when a session starts. The last
    /// attempt's error is returned.
    pub fn attach_cgroup(
        &self,
        resources: &mut ResourceSet,
        prog: &ProgramHandle,
        cgroup: &str,
    ) -> ExtResult<ResourceHandle> {
        if prog.hook != HookKind::Cgroup {
            return Err(ExtError::attach_reason(
                &prog.name,
                format!("section {} is not a cgroup hook", prog.section),
            ));
        }

        let retries = self.config.cgroup_retries;
        let mut attempt = 0;
        loop {
            match self.try_attach_cgroup(resources, prog, cgroup) {
                Ok(handle) => return Ok(handle),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        "Cgroup attach of {} to {} failed ({}), retry {}/{}",
                        prog.name, cgroup, err, attempt, retries
                    );
                    thread::sleep(self.config.cgroup_backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_attach_cgroup(
        &self,
        resources: &mut ResourceSet,
        prog: &ProgramHandle,
        cgroup: &str,
    ) -> ExtResult<ResourceHandle> {
        let path = find_cgroup_path(&self.config.cgroup_root, cgroup)
            .ok_or_else(|| ExtError::not_found(LookupKind::Cgroup, cgroup))?;

        let fd = open(
            &path,
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|errno| ExtError::attach(format!("cgroup {}", cgroup), errno))?;
        let fd_handle = resources.register(ResourceHandle::OpenFileDescriptor { fd });

        match self.backend.attach_cgroup(prog.id, fd) {
            Ok(link) => {
                info!("Attached {} to cgroup {}", prog.name, path.display());
                Ok(resources.register(ResourceHandle::AttachedLink {
                    link,
                    program: prog.name.clone(),
                }))
            }
            Err(errno) => {
                if let Err(err) = resources.detach(self.backend.as_ref(), &fd_handle) {
                    warn!("{}", err);
                }
                Err(ExtError::attach(format!("{} to cgroup {}", prog.name, cgroup), errno))
            }
        }
    }

    /// Attach an XDP program to each interface, tracking each one separately
    pub fn attach_xdp(
        &self,
        resources: &mut ResourceSet,
        prog: &ProgramHandle,
        ifindexes: &[IfIndex],
    ) -> ExtResult<Vec<ResourceHandle>> {
        let mut attached = Vec::with_capacity(ifindexes.len());
        for &ifindex in ifindexes {
            self.backend
                .xdp_attach(ifindex, prog.id, XDP_FLAGS_UPDATE_IF_NOEXIST)
                .map_err(|errno| ExtError::attach(format!("{} on if#{}", prog.name, ifindex), errno))?;
            debug!("Attached {} to XDP on if#{}", prog.name, ifindex);
            attached.push(resources.register(ResourceHandle::XdpAttachment {
                ifindex,
                flags: XDP_FLAGS_UPDATE_IF_NOEXIST,
            }));
        }
        Ok(attached)
    }

    /// Attach a classifier program to one direction of an interface
    pub fn attach_tc(
        &self,
        resources: &mut ResourceSet,
        prog: &ProgramHandle,
        ifindex: IfIndex,
        direction: TcDirection,
    ) -> ExtResult<ResourceHandle> {
        let hook = TcHook { ifindex, direction };
        let target = format!("{} on if#{} {}", prog.name, ifindex, direction);

        // Stale qdiscs from earlier runs; our own qdisc stays in place
        let ours = resources.iter().any(
            |h| matches!(h, ResourceHandle::TcAttachment { ifindex: i, .. } if *i == ifindex),
        );
        if !ours {
            if let Err(errno) = self.backend.tc_hook_destroy(hook) {
                debug!("No qdisc removed on if#{}: {}", ifindex, errno);
            }
        }

        match self.backend.tc_hook_create(hook) {
            Ok(()) | Err(Errno::EEXIST) => {}
            Err(errno) => return Err(ExtError::attach(target, errno)),
        }

        let opts = TcOpts {
            handle: TC_HANDLE,
            priority: TC_PRIORITY,
        };
        self.backend
            .tc_attach(hook, prog.id, opts)
            .map_err(|errno| ExtError::attach(&target, errno))?;

        debug!("Attached {}", target);
        Ok(resources.register(ResourceHandle::TcAttachment {
            prog: prog.id,
            ifindex,
            direction,
            priority: TC_PRIORITY,
        }))
    }

    /// Register a scheduler through the extension's struct-ops map
    ///
    /// Fails if the scheduling class rejects it, for example when `init`
    /// returns non-zero; the default scheduler then stays in effect.
    pub fn attach_struct_ops(
        &self,
        resources: &mut ResourceSet,
        extension: &ExtensionHandle,
        map: &str,
        ops: Arc<dyn Scheduler>,
    ) -> ExtResult<ResourceHandle> {
        let ops_map = extension.find_struct_ops(map)?;
        let name = ops.name().to_string();
        let link = self
            .backend
            .attach_struct_ops(ops_map.id, ops)
            .map_err(|errno| ExtError::attach(format!("scheduler {} via {}", name, map), errno))?;

        info!("Scheduler {} attached via {}", name, map);
        Ok(resources.register(ResourceHandle::StructOpsBinding {
            link,
            map: ops_map.name,
        }))
    }

    /// Reverse one attachment
    pub fn detach(&self, resources: &mut ResourceSet, handle: &ResourceHandle) -> ExtResult<()> {
        resources.detach(self.backend.as_ref(), handle)
    }
}
