/*!
 * Resource Tracking
 * Session-scoped ownership of kernel attachments and descriptors
 */

mod handle;
mod set;

pub use handle::{ReleaseStage, ResourceHandle};
pub use set::ResourceSet;

use crate::core::{ExtError, ExtResult};
use std::collections::BTreeMap;
use std::time::Instant;

/// Outcome of a teardown pass
#[derive(Debug, Default)]
pub struct ReleaseReport {
    pub released: usize,
    pub by_stage: BTreeMap<&'static str, usize>,
    pub failures: Vec<ExtError>,
    pub duration_micros: u64,
}

impl ReleaseReport {
    /// Run a teardown pass and record how long it took
    pub fn with_timing<F>(f: F) -> Self
    where
        F: FnOnce() -> Self,
    {
        let start = Instant::now();
        let mut report = f();
        report.duration_micros = start.elapsed().as_micros() as u64;
        report
    }

    /// Fold another pass into this one
    pub fn merge(&mut self, other: ReleaseReport) {
        self.released += other.released;
        self.duration_micros += other.duration_micros;
        for (stage, count) in other.by_stage {
            *self.by_stage.entry(stage).or_insert(0) += count;
        }
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Aggregate every failure into one error
    pub fn into_result(self) -> ExtResult<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ExtError::Teardown {
                failures: self.failures,
            })
        }
    }
}
