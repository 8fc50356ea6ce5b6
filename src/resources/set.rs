/*!
 * Resource Set
 * Per-session registry of acquired kernel state
 */

use super::handle::{ReleaseStage, ResourceHandle};
use super::ReleaseReport;
use crate::backend::KernelBackend;
use crate::core::{ExtError, ExtResult};
use log::{debug, error, info};
use std::time::Instant;

/// Everything a session must give back on close
///
/// Handles are released stage by stage; within a stage, the most recently
/// acquired handle goes first.
#[derive(Debug, Default)]
pub struct ResourceSet {
    handles: Vec<ResourceHandle>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly acquired handle
    pub fn register(&mut self, handle: ResourceHandle) -> ResourceHandle {
        debug!("Tracking {}", handle);
        self.handles.push(handle.clone());
        handle
    }

    pub fn contains(&self, handle: &ResourceHandle) -> bool {
        self.handles.contains(handle)
    }

    fn position(&self, handle: &ResourceHandle) -> ExtResult<usize> {
        self.handles.iter().rposition(|h| h == handle).ok_or_else(|| {
            ExtError::IllegalState(format!("{} is not attached to this session", handle))
        })
    }

    /// Stop tracking a handle, failing if it was never tracked or already taken
    pub fn take(&mut self, handle: &ResourceHandle) -> ExtResult<ResourceHandle> {
        let index = self.position(handle)?;
        Ok(self.handles.remove(index))
    }

    /// Release a handle now
    ///
    /// A handle whose release fails stays tracked, so teardown tries again.
    pub fn detach(&mut self, backend: &dyn KernelBackend, handle: &ResourceHandle) -> ExtResult<()> {
        let index = self.position(handle)?;
        self.handles[index].release(backend)?;
        let handle = self.handles.remove(index);
        debug!("Released {}", handle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.iter()
    }

    pub fn count(&self, stage: ReleaseStage) -> usize {
        self.handles.iter().filter(|h| h.stage() == stage).count()
    }

    /// Release every handle of one stage, continuing past failures
    pub fn release_stage(
        &mut self,
        backend: &dyn KernelBackend,
        stage: ReleaseStage,
        report: &mut ReleaseReport,
    ) {
        let start = Instant::now();
        let mut released = 0;

        // Newest first within the stage
        let mut index = self.handles.len();
        while index > 0 {
            index -= 1;
            if self.handles[index].stage() != stage {
                continue;
            }
            let handle = self.handles.remove(index);
            match handle.release(backend) {
                Ok(()) => released += 1,
                Err(err) => {
                    error!("Teardown of {} failed: {}", handle, err);
                    report.failures.push(err);
                }
            }
        }

        if released > 0 {
            report.released += released;
            report.by_stage.insert(stage.name(), released);
            debug!(
                "Released {} {} handle(s) in {}μs",
                released,
                stage.name(),
                start.elapsed().as_micros()
            );
        }
    }

    /// Release every stage in order
    pub fn release_all(&mut self, backend: &dyn KernelBackend) -> ReleaseReport {
        ReleaseReport::with_timing(|| {
            let mut report = ReleaseReport::default();
            for stage in ReleaseStage::ALL {
                self.release_stage(backend, stage, &mut report);
            }
            info!(
                "Released {} resource(s), {} failure(s)",
                report.released,
                report.failures.len()
            );
            report
        })
    }
}
