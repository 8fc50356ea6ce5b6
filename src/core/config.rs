/*!
 * Configuration
 * Policy tunables and host settings, read once at startup
 */

use super::errors::ExtError;
use super::limits::{
    CGROUP_ATTACH_BACKOFF, CGROUP_ATTACH_RETRIES, CGROUP_ROOT, FIXED_POINT_SCALE, SLICE_DFL_NS,
    STATS_INTERVAL,
};
use super::types::ExtResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Tunables shared by the sample policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Time slice of the normal queue (ns)
    pub slice_ns: u64,
    /// Time slice of the priority queue (ns)
    pub prio_slice_ns: u64,
    /// Tasks using less than this share of their slice are treated as I/O-bound
    pub prio_slice_usage_pct: u64,
    /// Smoothing constant `c` of `avg' = avg * c + (1 - c) * sample`
    pub weighted_avg_mult: f64,
    /// Usage assumed before the first sample, as a percentage of the slice
    pub initial_usage_pct: f64,
    /// Print periodic statistics
    pub verbose: bool,
    /// Print statistics as JSON lines instead of text
    pub stats_json: bool,
    /// Reporter period
    #[serde(with = "duration_ms")]
    pub stats_interval: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            slice_ns: SLICE_DFL_NS,
            prio_slice_ns: SLICE_DFL_NS,
            prio_slice_usage_pct: 5,
            weighted_avg_mult: 0.99,
            initial_usage_pct: 100.0,
            verbose: false,
            stats_json: false,
            stats_interval: STATS_INTERVAL,
        }
    }
}

impl PolicyConfig {
    /// Build from defaults overridden by `SCX_*` environment variables
    pub fn from_env() -> ExtResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_parse::<u64>("SCX_SLICE_NS")? {
            config.slice_ns = v;
        }
        if let Some(v) = env_parse::<u64>("SCX_PRIO_SLICE_NS")? {
            config.prio_slice_ns = v;
        }
        if let Some(v) = env_parse::<u64>("SCX_PRIO_USAGE_PCT")? {
            config.prio_slice_usage_pct = v;
        }
        if let Some(v) = env_parse::<f64>("SCX_WEIGHTED_AVG_MULT")? {
            config.weighted_avg_mult = v;
        }
        if let Some(v) = env_parse::<f64>("SCX_INITIAL_USAGE_PCT")? {
            config.initial_usage_pct = v;
        }
        if let Ok(v) = std::env::var("SCX_VERBOSE") {
            config.verbose = v == "1" || v == "true";
        }
        if let Ok(v) = std::env::var("SCX_STATS_JSON") {
            config.stats_json = v == "1" || v == "true";
        }
        if let Some(ms) = env_parse::<u64>("SCX_STATS_INTERVAL_MS")? {
            config.stats_interval = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ExtResult<()> {
        if self.slice_ns == 0 || self.prio_slice_ns == 0 {
            return Err(ExtError::Configuration(
                "slice durations must be positive".into(),
            ));
        }
        if self.prio_slice_usage_pct > 100 {
            return Err(ExtError::Configuration(format!(
                "priority usage threshold {}% exceeds 100%",
                self.prio_slice_usage_pct
            )));
        }
        if !(0.0..=1.0).contains(&self.weighted_avg_mult) {
            return Err(ExtError::Configuration(format!(
                "weighted average multiplier {} is outside [0, 1]",
                self.weighted_avg_mult
            )));
        }
        if !(0.0..=100.0).contains(&self.initial_usage_pct) {
            return Err(ExtError::Configuration(format!(
                "initial usage {}% is outside [0, 100]",
                self.initial_usage_pct
            )));
        }
        if self.stats_interval.is_zero() {
            return Err(ExtError::Configuration(
                "stats interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Smoothing constant in fixed point, clamped to `[0, FIXED_POINT_SCALE]`
    pub fn weight_fp(&self) -> u64 {
        let scaled = (self.weighted_avg_mult * FIXED_POINT_SCALE as f64).round();
        (scaled.max(0.0) as u64).min(FIXED_POINT_SCALE)
    }

    /// Usage assumed before the first sample, in nanoseconds of the normal slice
    pub fn initial_usage_ns(&self) -> u64 {
        let pct = self.initial_usage_pct.clamp(0.0, 100.0);
        ((self.slice_ns as f64) * pct / 100.0).round() as u64
    }
}

/// Host-side settings for the attachment layer
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub cgroup_root: PathBuf,
    pub cgroup_retries: u32,
    pub cgroup_backoff: Duration,
    pub nr_cpus: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from(CGROUP_ROOT),
            cgroup_retries: CGROUP_ATTACH_RETRIES,
            cgroup_backoff: CGROUP_ATTACH_BACKOFF,
            nr_cpus: 4,
        }
    }
}

impl HostConfig {
    #[inline]
    #[must_use]
    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = root.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_cgroup_backoff(mut self, backoff: Duration) -> Self {
        self.cgroup_backoff = backoff;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_cpus(mut self, nr_cpus: u32) -> Self {
        self.nr_cpus = nr_cpus;
        self
    }
}

fn env_parse<T: FromStr>(key: &str) -> ExtResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ExtError::Configuration(format!("{key}={raw} is not a valid value"))),
        Err(_) => Ok(None),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
