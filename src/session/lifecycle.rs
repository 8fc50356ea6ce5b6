/*!
 * Session Lifecycle
 * Load, attach, run and release one extension as a unit
 *
 * State machine: Unloaded -> Loaded -> Attached -> Running -> Closed.
 * `close` is reachable from every state, idempotent, and also runs on drop,
 * so no attachment outlives its session.
 */

use super::types::SessionState;
use crate::attach::AttachmentManager;
use crate::backend::KernelBackend;
use crate::core::config::{HostConfig, PolicyConfig};
use crate::core::errors::ExtError;
use crate::core::types::{ExtResult, IfIndex, TcDirection};
use crate::loader::{ExtensionHandle, ExtensionImage, ProgramHandle};
use crate::maps::{MapKind, MapPod, TypedMap};
use crate::monitoring::{ReportFormat, SessionSpan, StatsReporter};
use crate::resources::{ReleaseReport, ReleaseStage, ResourceHandle, ResourceSet};
use crate::sched::policies::{ENQUEUE_TIME_MAP, SLICE_USAGE_MAP};
use crate::sched::{PolicyKind, SchedCounters, TaskMaps};
use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// One extension's lifetime on the host
pub struct Session {
    id: Uuid,
    state: SessionState,
    backend: Arc<dyn KernelBackend>,
    attach: AttachmentManager,
    policy: PolicyConfig,
    extension: Option<ExtensionHandle>,
    resources: ResourceSet,
    scheduler: Option<(String, Arc<SchedCounters>)>,
}

impl Session {
    pub fn new(backend: Arc<dyn KernelBackend>, host: HostConfig, policy: PolicyConfig) -> Self {
        let id = Uuid::new_v4();
        info!("Session {} created on {:?} backend", id, backend.platform());
        Self {
            id,
            state: SessionState::Unloaded,
            attach: AttachmentManager::new(Arc::clone(&backend), host),
            backend,
            policy,
            extension: None,
            resources: ResourceSet::new(),
            scheduler: None,
        }
    }

    /// Run `f` on a fresh session and close it on every exit path
    pub fn scoped<T, F>(
        backend: Arc<dyn KernelBackend>,
        host: HostConfig,
        policy: PolicyConfig,
        f: F,
    ) -> ExtResult<T>
    where
        F: FnOnce(&mut Session) -> ExtResult<T>,
    {
        let mut session = Self::new(backend, host, policy);
        let result = f(&mut session);
        let closed = session.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(err), Ok(())) => Err(err),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Err(teardown)) => {
                error!("Session {} teardown after failure: {}", session.id, teardown);
                Err(err)
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    /// Counters of the attached scheduler, if it keeps any
    pub fn counters(&self) -> Option<Arc<SchedCounters>> {
        self.scheduler.as_ref().map(|(_, counters)| Arc::clone(counters))
    }

    fn require(&self, allowed: impl Fn(SessionState) -> bool, action: &str) -> ExtResult<()> {
        if allowed(self.state) {
            Ok(())
        } else {
            Err(ExtError::IllegalState(format!(
                "cannot {} in state {}",
                action, self.state
            )))
        }
    }

    fn extension(&self) -> ExtResult<&ExtensionHandle> {
        self.extension
            .as_ref()
            .ok_or_else(|| ExtError::IllegalState(format!("session {} has no extension", self.id)))
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Load the extension image; on failure the session is closed
    pub fn load(&mut self, image: &ExtensionImage) -> ExtResult<()> {
        self.require(|s| s == SessionState::Unloaded, "load")?;
        let span = SessionSpan::new(self.id, "load");
        let _entered = span.enter();

        match ExtensionHandle::load(Arc::clone(&self.backend), image) {
            Ok(handle) => {
                self.extension = Some(handle);
                self.state = SessionState::Loaded;
                span.record_result(true);
                Ok(())
            }
            Err(err) => {
                span.record_result(false);
                self.close_after_failure();
                Err(err)
            }
        }
    }

    pub fn program(&self, name: &str) -> ExtResult<ProgramHandle> {
        self.extension()?.find_program(name)
    }

    /// Open a map for user-space access; the map handle is tracked until close
    pub fn map<K: MapPod, V: MapPod>(&mut self, name: &str, kind: MapKind) -> ExtResult<TypedMap<K, V>> {
        let handle = self.extension()?.find_map::<K, V>(name, kind)?;
        let open = ResourceHandle::OpenMap {
            map: handle.id,
            name: handle.name.clone(),
        };
        // One user-space handle per map, however often it is looked up
        if !self.resources.contains(&open) {
            self.resources.register(open);
        }
        Ok(handle.into_typed())
    }

    fn task_map(&mut self, name: &str) -> ExtResult<Option<TypedMap<u32, u64>>> {
        if self.extension()?.manifest().map_spec(name).is_none() {
            return Ok(None);
        }
        self.map::<u32, u64>(name, MapKind::LruHash).map(Some)
    }

    // =========================================================================
    // Attach
    // =========================================================================

    fn attached<T>(&mut self, result: ExtResult<T>) -> ExtResult<T> {
        match result {
            Ok(value) => {
                self.state = SessionState::Attached;
                Ok(value)
            }
            Err(err) => {
                warn!("Session {}: {}", self.id, err);
                self.close_after_failure();
                Err(err)
            }
        }
    }

    /// Build and bind one of the sample schedulers
    ///
    /// Per-task maps come from the extension when it declares them.
    pub fn attach_scheduler(&mut self, kind: PolicyKind) -> ExtResult<ResourceHandle> {
        self.require(|s| s.can_attach(), "attach a scheduler")?;
        if self.scheduler.is_some() {
            return Err(ExtError::IllegalState(format!(
                "session {} already has a scheduler",
                self.id
            )));
        }

        let standalone = TaskMaps::standalone();
        let maps = TaskMaps {
            enqueue_time: self.task_map(ENQUEUE_TIME_MAP)?.unwrap_or(standalone.enqueue_time),
            slice_usage: self.task_map(SLICE_USAGE_MAP)?.unwrap_or(standalone.slice_usage),
        };
        let scheduler = kind.build(&self.policy, maps);
        let name = scheduler.name().to_string();
        let counters = scheduler.counters();

        let span = SessionSpan::new(self.id, "attach");
        let _entered = span.enter();
        let result = match self.extension.as_ref() {
            Some(extension) => self.attach.attach_struct_ops(
                &mut self.resources,
                extension,
                kind.ops_map(),
                scheduler,
            ),
            None => Err(ExtError::IllegalState("no extension loaded".into())),
        };
        span.record_result(result.is_ok());

        let handle = self.attached(result)?;
        self.scheduler = Some((name, counters.unwrap_or_default()));
        Ok(handle)
    }

    pub fn attach(&mut self, program: &str) -> ExtResult<ResourceHandle> {
        self.require(|s| s.can_attach(), "attach")?;
        let result = self
            .program(program)
            .and_then(|prog| self.attach.attach(&mut self.resources, &prog));
        self.attached(result)
    }

    pub fn auto_attach(&mut self) -> ExtResult<Vec<ResourceHandle>> {
        self.require(|s| s.can_attach(), "attach")?;
        let result = match self.extension.as_ref() {
            Some(extension) => self.attach.auto_attach_programs(&mut self.resources, extension),
            None => Err(ExtError::IllegalState("no extension loaded".into())),
        };
        self.attached(result)
    }

    pub fn attach_lsm(&mut self) -> ExtResult<Vec<ResourceHandle>> {
        self.require(|s| s.can_attach(), "attach")?;
        let result = match self.extension.as_ref() {
            Some(extension) => self.attach.attach_lsm_all(&mut self.resources, extension),
            None => Err(ExtError::IllegalState("no extension loaded".into())),
        };
        self.attached(result)
    }

    pub fn attach_cgroup(&mut self, program: &str, cgroup: &str) -> ExtResult<ResourceHandle> {
        self.require(|s| s.can_attach(), "attach")?;
        let result = self
            .program(program)
            .and_then(|prog| self.attach.attach_cgroup(&mut self.resources, &prog, cgroup));
        self.attached(result)
    }

    pub fn attach_xdp(&mut self, program: &str, ifindexes: &[IfIndex]) -> ExtResult<Vec<ResourceHandle>> {
        self.require(|s| s.can_attach(), "attach")?;
        let result = self
            .program(program)
            .and_then(|prog| self.attach.attach_xdp(&mut self.resources, &prog, ifindexes));
        self.attached(result)
    }

    pub fn attach_tc(
        &mut self,
        program: &str,
        ifindex: IfIndex,
        direction: TcDirection,
    ) -> ExtResult<ResourceHandle> {
        self.require(|s| s.can_attach(), "attach")?;
        let result = self
            .program(program)
            .and_then(|prog| self.attach.attach_tc(&mut self.resources, &prog, ifindex, direction));
        self.attached(result)
    }

    /// Reverse one attachment made by this session
    pub fn detach(&mut self, handle: &ResourceHandle) -> ExtResult<()> {
        if self.state.is_closed() {
            return Err(ExtError::IllegalState(format!(
                "session {} is closed; {} was already released",
                self.id, handle
            )));
        }
        self.attach.detach(&mut self.resources, handle)?;
        if matches!(handle, ResourceHandle::StructOpsBinding { .. }) {
            self.scheduler = None;
        }
        Ok(())
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Report statistics until `shutdown` resolves, then close
    pub async fn run<F>(&mut self, shutdown: F) -> ExtResult<()>
    where
        F: Future<Output = ()>,
    {
        self.require(|s| s == SessionState::Attached, "run")?;
        self.state = SessionState::Running;
        info!("Session {} running", self.id);

        let format = if self.policy.stats_json {
            ReportFormat::Json
        } else {
            ReportFormat::Text
        };
        let reporter = self
            .scheduler
            .as_ref()
            .filter(|_| self.policy.verbose)
            .map(|(name, counters)| {
                StatsReporter::new(name.clone(), Arc::clone(counters)).with_format(format)
            });

        {
            let _span = SessionSpan::new(self.id, "run");
            let mut interval = tokio::time::interval(self.policy.stats_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = interval.tick() => {
                        if let Some(reporter) = &reporter {
                            reporter.report();
                        }
                    }
                }
            }
        }

        info!("Session {} stopping", self.id);
        self.close()
    }

    // =========================================================================
    // Close
    // =========================================================================

    fn close_after_failure(&mut self) {
        if let Err(err) = self.close() {
            error!("Session {} teardown after failure: {}", self.id, err);
        }
    }

    /// Release everything in dependency order; closing twice is a no-op
    ///
    /// Every tracked resource is visited even if some fail; the failures are
    /// returned together.
    pub fn close(&mut self) -> ExtResult<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        let previous = self.state;
        self.state = SessionState::Closed;
        self.scheduler = None;

        let backend = Arc::clone(&self.backend);
        let report = ReleaseReport::with_timing(|| {
            let mut report = ReleaseReport::default();
            for stage in ReleaseStage::ALL {
                if stage == ReleaseStage::Descriptors {
                    if let Some(mut extension) = self.extension.take() {
                        if let Err(err) = extension.close() {
                            error!("Teardown of extension failed: {}", err);
                            report.failures.push(err);
                        }
                    }
                }
                self.resources.release_stage(backend.as_ref(), stage, &mut report);
            }
            report
        });

        info!(
            "Session {} closed from {} ({} resource(s) released, {} failure(s), {}μs)",
            self.id,
            previous,
            report.released,
            report.failures.len(),
            report.duration_micros
        );
        report.into_result()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Session {} teardown on drop: {}", self.id, err);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulationBackend;

    fn session(backend: &Arc<SimulationBackend>) -> Session {
        Session::new(backend.clone(), HostConfig::default(), PolicyConfig::default())
    }

    #[test]
    fn test_attach_before_load_is_illegal() {
        let backend = Arc::new(SimulationBackend::new(1));
        let mut session = session(&backend);
        assert!(session.attach("anything").unwrap_err().is_illegal_state());
        assert_eq!(session.state(), SessionState::Unloaded);
    }

    #[test]
    fn test_scheduler_attach_and_close() {
        let backend = Arc::new(SimulationBackend::new(2));
        let mut session = session(&backend);
        session
            .load(&ExtensionImage::simulated(PolicyKind::RoundRobin.manifest()).unwrap())
            .unwrap();
        session.attach_scheduler(PolicyKind::RoundRobin).unwrap();
        assert_eq!(session.state(), SessionState::Attached);
        assert_eq!(backend.class().policy_name().as_deref(), Some("round_robin"));
        assert!(session.counters().is_some());

        session.close().unwrap();
        session.close().unwrap();
        assert!(!backend.class().is_active());
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn test_failed_load_closes_session() {
        let backend = Arc::new(SimulationBackend::new(1));
        backend.fail_next_load(nix::errno::Errno::EINVAL);
        let mut session = session(&backend);
        let image = ExtensionImage::simulated(PolicyKind::Fifo.manifest()).unwrap();
        assert!(matches!(session.load(&image), Err(ExtError::Load { .. })));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let backend = Arc::new(SimulationBackend::new(1));
        let mut session = session(&backend);
        session
            .load(&ExtensionImage::simulated(PolicyKind::Fifo.manifest()).unwrap())
            .unwrap();
        session.attach_scheduler(PolicyKind::Fifo).unwrap();

        session.run(std::future::ready(())).await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!backend.class().is_active());
    }
}
