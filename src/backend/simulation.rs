/*!
 * Simulation Backend
 * In-process kernel for testing and hosts without sched_ext
 *
 * Objects use the format written by `ExtensionImage::simulated`. Struct-ops
 * attachments install the scheduler into an owned `ExtClass`. Fault injection
 * and release logging let tests drive the retry and teardown paths.
 */

use super::traits::KernelBackend;
use super::types::*;
use crate::core::limits::XDP_FLAGS_UPDATE_IF_NOEXIST;
use crate::core::types::{IfIndex, LinkId, MapId, ObjectId, ProgramId, TcDirection};
use crate::loader::image::decode_simulated;
use crate::loader::{HookKind, Manifest};
use crate::maps::{new_store, MapKind, MapStore};
use crate::sched::{ExtClass, Scheduler};
use ahash::RandomState;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::stat::{fstat, SFlag};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One release performed by the simulated kernel, in call order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseEvent {
    StructOps(LinkId),
    Link(LinkId),
    Xdp(IfIndex),
    Tc(IfIndex, TcDirection),
    Map(MapId),
    Object(ObjectId),
    Fd(RawFd),
}

impl ReleaseEvent {
    /// Resource category, for ordering checks
    pub fn category(&self) -> &'static str {
        match self {
            ReleaseEvent::StructOps(_) => "struct_ops",
            ReleaseEvent::Link(_) => "link",
            ReleaseEvent::Xdp(_) => "xdp",
            ReleaseEvent::Tc(..) => "tc",
            ReleaseEvent::Map(_) => "map",
            ReleaseEvent::Object(_) => "object",
            ReleaseEvent::Fd(_) => "fd",
        }
    }
}

struct SimObject {
    manifest: Manifest,
    loaded: bool,
    programs: HashMap<String, ProgramId, RandomState>,
    maps: HashMap<String, MapId, RandomState>,
}

struct SimProgram {
    name: String,
    section: String,
}

struct SimMap {
    info: MapInfo,
    store: Arc<dyn MapStore>,
    open: bool,
}

#[derive(Debug, Clone, Copy)]
enum SimLink {
    Program(ProgramId),
    Cgroup(ProgramId),
    StructOps(MapId),
}

#[derive(Default)]
struct Faults {
    failing_cgroup_attaches: u32,
    rejected_programs: HashSet<String>,
    failing_xdp_detach: HashSet<IfIndex>,
    failing_link_destroy: HashSet<LinkId>,
    qdisc_cleanup_fails: bool,
    next_load: Option<Errno>,
}

struct SimState {
    next_id: u64,
    objects: HashMap<ObjectId, SimObject, RandomState>,
    programs: HashMap<ProgramId, SimProgram, RandomState>,
    maps: HashMap<MapId, SimMap, RandomState>,
    links: HashMap<LinkId, SimLink, RandomState>,
    xdp: HashMap<IfIndex, ProgramId, RandomState>,
    clsact: HashSet<IfIndex>,
    tc_filters: HashMap<(IfIndex, TcDirection), ProgramId, RandomState>,
    interfaces: HashSet<IfIndex>,
    faults: Faults,
    cgroup_attempts: u32,
    release_log: Vec<ReleaseEvent>,
    opened_paths: Vec<PathBuf>,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn program(&self, prog: ProgramId) -> Result<&SimProgram, Errno> {
        self.programs.get(&prog).ok_or(Errno::ENOENT)
    }
}

/// Simulated kernel
pub struct SimulationBackend {
    state: Mutex<SimState>,
    class: Arc<ExtClass>,
    features: KernelFeatures,
}

impl SimulationBackend {
    /// Kernel with every feature, `nr_cpus` CPUs and a loopback interface
    pub fn new(nr_cpus: u32) -> Self {
        Self::with_features(nr_cpus, KernelFeatures::default())
    }

    pub fn with_features(nr_cpus: u32, features: KernelFeatures) -> Self {
        Self {
            state: Mutex::new(SimState {
                next_id: 0,
                objects: HashMap::with_hasher(RandomState::new()),
                programs: HashMap::with_hasher(RandomState::new()),
                maps: HashMap::with_hasher(RandomState::new()),
                links: HashMap::with_hasher(RandomState::new()),
                xdp: HashMap::with_hasher(RandomState::new()),
                clsact: HashSet::new(),
                tc_filters: HashMap::with_hasher(RandomState::new()),
                interfaces: HashSet::from([1]),
                faults: Faults::default(),
                cgroup_attempts: 0,
                release_log: Vec::new(),
                opened_paths: Vec::new(),
            }),
            class: Arc::new(ExtClass::new(nr_cpus)),
            features,
        }
    }

    /// Make network interfaces known to the kernel
    #[must_use]
    pub fn with_interfaces(self, ifindexes: &[IfIndex]) -> Self {
        self.state.lock().interfaces.extend(ifindexes.iter().copied());
        self
    }

    /// The scheduling class struct-ops schedulers are installed into
    pub fn class(&self) -> &Arc<ExtClass> {
        &self.class
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Fail the next `count` cgroup attaches with `EBUSY`
    pub fn fail_next_cgroup_attaches(&self, count: u32) {
        self.state.lock().faults.failing_cgroup_attaches = count;
    }

    /// Reject attachment of a program with `EACCES`, as the verifier would
    pub fn reject_program(&self, name: &str) {
        self.state.lock().faults.rejected_programs.insert(name.to_string());
    }

    /// Fail XDP detach on one interface with `EIO`
    pub fn fail_xdp_detach(&self, ifindex: IfIndex) {
        self.state.lock().faults.failing_xdp_detach.insert(ifindex);
    }

    /// Fail destroying one link with `EIO`
    pub fn fail_link_destroy(&self, link: LinkId) {
        self.state.lock().faults.failing_link_destroy.insert(link);
    }

    /// Fail qdisc cleanup with `EPERM`
    pub fn fail_qdisc_cleanup(&self, fail: bool) {
        self.state.lock().faults.qdisc_cleanup_fails = fail;
    }

    /// Fail the next object load with `errno`
    pub fn fail_next_load(&self, errno: Errno) {
        self.state.lock().faults.next_load = Some(errno);
    }

    /// Pre-install a classifier qdisc, as left behind by another tool
    /// Drop every injected fault
    pub fn clear_faults(&self) {
        self.state.lock().faults = Faults::default();
    }

    pub fn add_stale_qdisc(&self, ifindex: IfIndex) {
        self.state.lock().clsact.insert(ifindex);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn release_log(&self) -> Vec<ReleaseEvent> {
        self.state.lock().release_log.clone()
    }

    /// Every path handed to `open_object`
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.state.lock().opened_paths.clone()
    }

    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn live_links(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Program a live link runs
    pub fn linked_program(&self, link: LinkId) -> Option<ProgramId> {
        match self.state.lock().links.get(&link)? {
            SimLink::Program(prog) | SimLink::Cgroup(prog) => Some(*prog),
            SimLink::StructOps(_) => None,
        }
    }

    pub fn cgroup_attach_attempts(&self) -> u32 {
        self.state.lock().cgroup_attempts
    }

    pub fn xdp_program(&self, ifindex: IfIndex) -> Option<ProgramId> {
        self.state.lock().xdp.get(&ifindex).copied()
    }

    pub fn tc_program(&self, ifindex: IfIndex, direction: TcDirection) -> Option<ProgramId> {
        self.state.lock().tc_filters.get(&(ifindex, direction)).copied()
    }

    pub fn has_qdisc(&self, ifindex: IfIndex) -> bool {
        self.state.lock().clsact.contains(&ifindex)
    }

    fn check_features(&self, manifest: &Manifest) -> Result<(), Errno> {
        for entry in &manifest.entry_points {
            let supported = match entry.hook() {
                HookKind::StructOps => self.features.sched_ext,
                HookKind::Lsm => self.features.lsm,
                _ => true,
            };
            if !supported {
                warn!(
                    "{}: entry point {} needs {} support, which this kernel lacks",
                    manifest.name,
                    entry.name,
                    entry.hook()
                );
                return Err(Errno::EOPNOTSUPP);
            }
        }
        Ok(())
    }
}

impl KernelBackend for SimulationBackend {
    fn platform(&self) -> Platform {
        Platform::Simulation
    }

    fn features(&self) -> KernelFeatures {
        self.features
    }

    fn open_object(&self, path: &Path) -> Result<ObjectId, Errno> {
        let mut state = self.state.lock();
        state.opened_paths.push(path.to_path_buf());

        let bytes = std::fs::read(path)
            .map_err(|e| e.raw_os_error().map_or(Errno::EIO, Errno::from_raw))?;
        let manifest = decode_simulated(&bytes)?;

        let id = ObjectId(state.next_id());
        state.objects.insert(
            id,
            SimObject {
                manifest,
                loaded: false,
                programs: HashMap::with_hasher(RandomState::new()),
                maps: HashMap::with_hasher(RandomState::new()),
            },
        );
        debug!("Opened {} from {}", id, path.display());
        Ok(id)
    }

    fn load_object(&self, obj: ObjectId) -> Result<(), Errno> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(errno) = state.faults.next_load.take() {
            return Err(errno);
        }

        let object = state.objects.get(&obj).ok_or(Errno::EBADF)?;
        if object.loaded {
            return Err(Errno::EALREADY);
        }
        self.check_features(&object.manifest)?;
        let manifest = object.manifest.clone();

        let mut programs = HashMap::with_hasher(RandomState::new());
        for entry in &manifest.entry_points {
            let id = ProgramId(state.next_id());
            state.programs.insert(
                id,
                SimProgram {
                    name: entry.name.clone(),
                    section: entry.section.clone(),
                },
            );
            programs.insert(entry.name.clone(), id);
        }

        let mut maps = HashMap::with_hasher(RandomState::new());
        for spec in &manifest.maps {
            let id = MapId(state.next_id());
            state.maps.insert(
                id,
                SimMap {
                    info: MapInfo {
                        id,
                        name: spec.name.clone(),
                        kind: spec.kind,
                        key_size: spec.key_size,
                        value_size: spec.value_size,
                        max_entries: spec.max_entries,
                    },
                    store: new_store(spec.kind, spec.key_size, spec.value_size, spec.max_entries),
                    open: true,
                },
            );
            maps.insert(spec.name.clone(), id);
        }

        if let Some(object) = state.objects.get_mut(&obj) {
            object.programs = programs;
            object.maps = maps;
            object.loaded = true;
        }
        debug!(
            "Loaded {} ({}): {} programs, {} maps",
            obj,
            manifest.name,
            manifest.entry_points.len(),
            manifest.maps.len()
        );
        Ok(())
    }

    fn close_object(&self, obj: ObjectId) -> Result<(), Errno> {
        let mut state = self.state.lock();
        let object = state.objects.remove(&obj).ok_or(Errno::EBADF)?;
        for prog in object.programs.values() {
            state.programs.remove(prog);
        }
        for map in object.maps.values() {
            state.maps.remove(map);
        }
        state.release_log.push(ReleaseEvent::Object(obj));
        Ok(())
    }

    fn find_program(&self, obj: ObjectId, name: &str) -> Option<ProgramInfo> {
        let state = self.state.lock();
        let id = *state.objects.get(&obj)?.programs.get(name)?;
        let prog = state.programs.get(&id)?;
        Some(ProgramInfo {
            id,
            name: prog.name.clone(),
            section: prog.section.clone(),
        })
    }

    fn find_map(&self, obj: ObjectId, name: &str) -> Option<MapInfo> {
        let state = self.state.lock();
        let id = *state.objects.get(&obj)?.maps.get(name)?;
        state.maps.get(&id).map(|map| map.info.clone())
    }

    fn map_store(&self, map: MapId) -> Option<Arc<dyn MapStore>> {
        let state = self.state.lock();
        state
            .maps
            .get(&map)
            .filter(|m| m.info.kind != MapKind::StructOps)
            .map(|m| Arc::clone(&m.store))
    }

    fn close_map(&self, map: MapId) -> Result<(), Errno> {
        let mut state = self.state.lock();
        let entry = state.maps.get_mut(&map).ok_or(Errno::EBADF)?;
        if !entry.open {
            return Err(Errno::EBADF);
        }
        entry.open = false;
        state.release_log.push(ReleaseEvent::Map(map));
        Ok(())
    }

    fn attach_program(&self, prog: ProgramId) -> Result<LinkId, Errno> {
        let mut state = self.state.lock();
        let program = state.program(prog)?;
        if state.faults.rejected_programs.contains(&program.name) {
            return Err(Errno::EACCES);
        }
        let hook = HookKind::from_section(&program.section);
        if !hook.is_auto_attachable() {
            return Err(Errno::EOPNOTSUPP);
        }
        if hook == HookKind::Lsm && !self.features.lsm {
            return Err(Errno::EOPNOTSUPP);
        }

        let link = LinkId(state.next_id());
        state.links.insert(link, SimLink::Program(prog));
        Ok(link)
    }

    fn attach_cgroup(&self, prog: ProgramId, cgroup_fd: RawFd) -> Result<LinkId, Errno> {
        let mut state = self.state.lock();
        state.cgroup_attempts += 1;
        if state.faults.failing_cgroup_attaches > 0 {
            state.faults.failing_cgroup_attaches -= 1;
            return Err(Errno::EBUSY);
        }

        let program = state.program(prog)?;
        if state.faults.rejected_programs.contains(&program.name) {
            return Err(Errno::EACCES);
        }
        if HookKind::from_section(&program.section) != HookKind::Cgroup {
            return Err(Errno::EINVAL);
        }
        let stat = fstat(cgroup_fd)?;
        if SFlag::from_bits_truncate(stat.st_mode) & SFlag::S_IFMT != SFlag::S_IFDIR {
            return Err(Errno::ENOTDIR);
        }

        let link = LinkId(state.next_id());
        state.links.insert(link, SimLink::Cgroup(prog));
        Ok(link)
    }

    fn attach_struct_ops(&self, map: MapId, ops: Arc<dyn Scheduler>) -> Result<LinkId, Errno> {
        let mut state = self.state.lock();
        let entry = state.maps.get(&map).ok_or(Errno::ENOENT)?;
        if entry.info.kind != MapKind::StructOps {
            return Err(Errno::EINVAL);
        }
        if !self.features.sched_ext {
            return Err(Errno::EOPNOTSUPP);
        }
        if state
            .links
            .values()
            .any(|link| matches!(link, SimLink::StructOps(m) if *m == map))
        {
            return Err(Errno::EBUSY);
        }

        let name = ops.name().to_string();
        if let Err(err) = self.class.install(ops) {
            warn!("Scheduler {} rejected by the scheduling class: {}", name, err);
            return Err(err.errno());
        }

        let link = LinkId(state.next_id());
        state.links.insert(link, SimLink::StructOps(map));
        Ok(link)
    }

    fn destroy_link(&self, link: LinkId) -> Result<(), Errno> {
        let mut state = self.state.lock();
        if state.faults.failing_link_destroy.contains(&link) {
            return Err(Errno::EIO);
        }
        let entry = state.links.remove(&link).ok_or(Errno::ENOENT)?;
        match entry {
            SimLink::StructOps(map) => {
                self.class.uninstall();
                debug!("Unregistered struct-ops {} via {}", map, link);
                state.release_log.push(ReleaseEvent::StructOps(link));
            }
            SimLink::Program(prog) | SimLink::Cgroup(prog) => {
                debug!("Destroyed {} of {}", link, prog);
                state.release_log.push(ReleaseEvent::Link(link));
            }
        }
        Ok(())
    }

    fn xdp_attach(&self, ifindex: IfIndex, prog: ProgramId, flags: u32) -> Result<(), Errno> {
        let mut state = self.state.lock();
        if !state.interfaces.contains(&ifindex) {
            return Err(Errno::ENODEV);
        }
        let program = state.program(prog)?;
        if state.faults.rejected_programs.contains(&program.name) {
            return Err(Errno::EACCES);
        }
        if HookKind::from_section(&program.section) != HookKind::Xdp {
            return Err(Errno::EINVAL);
        }
        if flags & XDP_FLAGS_UPDATE_IF_NOEXIST != 0 && state.xdp.contains_key(&ifindex) {
            return Err(Errno::EBUSY);
        }
        state.xdp.insert(ifindex, prog);
        Ok(())
    }

    fn xdp_detach(&self, ifindex: IfIndex, _flags: u32) -> Result<(), Errno> {
        let mut state = self.state.lock();
        if state.faults.failing_xdp_detach.contains(&ifindex) {
            return Err(Errno::EIO);
        }
        state.xdp.remove(&ifindex).ok_or(Errno::ENOENT)?;
        state.release_log.push(ReleaseEvent::Xdp(ifindex));
        Ok(())
    }

    fn tc_hook_destroy(&self, hook: TcHook) -> Result<(), Errno> {
        let mut state = self.state.lock();
        if state.faults.qdisc_cleanup_fails {
            return Err(Errno::EPERM);
        }
        if !state.clsact.remove(&hook.ifindex) {
            return Err(Errno::ENOENT);
        }
        state.tc_filters.retain(|(ifindex, _), _| *ifindex != hook.ifindex);
        Ok(())
    }

    fn tc_hook_create(&self, hook: TcHook) -> Result<(), Errno> {
        let mut state = self.state.lock();
        if !state.interfaces.contains(&hook.ifindex) {
            return Err(Errno::ENODEV);
        }
        if !state.clsact.insert(hook.ifindex) {
            return Err(Errno::EEXIST);
        }
        Ok(())
    }

    fn tc_attach(&self, hook: TcHook, prog: ProgramId, _opts: TcOpts) -> Result<(), Errno> {
        let mut state = self.state.lock();
        if !state.clsact.contains(&hook.ifindex) {
            return Err(Errno::ENOENT);
        }
        let program = state.program(prog)?;
        if state.faults.rejected_programs.contains(&program.name) {
            return Err(Errno::EACCES);
        }
        if HookKind::from_section(&program.section) != HookKind::Tc {
            return Err(Errno::EINVAL);
        }
        let key = (hook.ifindex, hook.direction);
        if state.tc_filters.contains_key(&key) {
            return Err(Errno::EEXIST);
        }
        state.tc_filters.insert(key, prog);
        Ok(())
    }

    fn tc_detach(&self, hook: TcHook, _opts: TcOpts) -> Result<(), Errno> {
        let mut state = self.state.lock();
        state
            .tc_filters
            .remove(&(hook.ifindex, hook.direction))
            .ok_or(Errno::ENOENT)?;
        state
            .release_log
            .push(ReleaseEvent::Tc(hook.ifindex, hook.direction));
        Ok(())
    }

    fn close_fd(&self, fd: RawFd) -> Result<(), Errno> {
        nix::unistd::close(fd)?;
        self.state.lock().release_log.push(ReleaseEvent::Fd(fd));
        Ok(())
    }
}
