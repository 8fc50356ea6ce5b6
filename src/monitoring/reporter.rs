/*!
 * Statistics Reporter
 * Periodic read-and-reset of scheduler counters
 *
 * Runs on the control thread, never inside a callback. Counter values are
 * only approximately consistent with each other.
 */

use crate::sched::{SchedCounters, StatsSnapshot};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;

/// Output format of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    scheduler: &'a str,
    #[serde(flatten)]
    snapshot: &'a StatsSnapshot,
    avg_wait_ns: Option<u64>,
    avg_prio_wait_ns: Option<u64>,
    avg_normal_wait_ns: Option<u64>,
    slice_usage: Option<f64>,
}

/// Reader over one scheduler's counters
pub struct StatsReporter {
    scheduler: String,
    counters: Arc<SchedCounters>,
    format: ReportFormat,
}

impl StatsReporter {
    pub fn new(scheduler: impl Into<String>, counters: Arc<SchedCounters>) -> Self {
        Self {
            scheduler: scheduler.into(),
            counters,
            format: ReportFormat::default(),
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.format = format;
        self
    }

    /// Take the counters accumulated since the last sample
    pub fn sample(&self) -> StatsSnapshot {
        self.counters.snapshot_and_reset()
    }

    /// Render a snapshot; `None` if nothing happened in the interval
    pub fn render(&self, snapshot: &StatsSnapshot) -> Option<String> {
        if snapshot.is_empty() {
            return None;
        }
        match self.format {
            ReportFormat::Json => serde_json::to_string(&JsonReport {
                scheduler: &self.scheduler,
                snapshot,
                avg_wait_ns: snapshot.avg_wait_ns(),
                avg_prio_wait_ns: snapshot.avg_prio_wait_ns(),
                avg_normal_wait_ns: snapshot.avg_normal_wait_ns(),
                slice_usage: snapshot.slice_usage(),
            })
            .ok(),
            ReportFormat::Text => Some(self.render_text(snapshot)),
        }
    }

    fn render_text(&self, snapshot: &StatsSnapshot) -> String {
        let mut out = format!("[{}] enqueues: {}", self.scheduler, snapshot.enqueues);
        if let Some(avg) = snapshot.avg_wait_ns() {
            let _ = write!(out, ", average wait: {} ns", avg);
        }
        if let Some(avg) = snapshot.avg_prio_wait_ns() {
            let _ = write!(out, ", prio wait: {} ns", avg);
        }
        if let Some(avg) = snapshot.avg_normal_wait_ns() {
            let _ = write!(out, ", normal wait: {} ns", avg);
        }
        if let Some(usage) = snapshot.slice_usage() {
            let _ = write!(out, ", slice usage: {:.2}", usage);
        }
        if snapshot.direct_dispatches > 0 {
            let _ = write!(out, ", direct dispatches: {}", snapshot.direct_dispatches);
        }
        out
    }

    /// Sample, render and print one report
    pub fn report(&self) -> Option<StatsSnapshot> {
        let snapshot = self.sample();
        let line = self.render(&snapshot)?;
        println!("{}", line);
        Some(snapshot)
    }
}
