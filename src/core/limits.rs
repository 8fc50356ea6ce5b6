/*!
 * System Limits and Constants
 *
 * Centralized location for host-wide limits, thresholds, and magic numbers.
 * Linux-compatible values are marked with [LINUX-COMPAT]
 */

use std::time::Duration;

// =============================================================================
// ATTACHMENT
// =============================================================================

/// Retries after the first failed cgroup attach
pub const CGROUP_ATTACH_RETRIES: u32 = 3;

/// Sleep between cgroup attach attempts
pub const CGROUP_ATTACH_BACKOFF: Duration = Duration::from_millis(100);

/// Default cgroup v2 mount root
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Attach only if no XDP program is present on the interface
/// [LINUX-COMPAT] XDP_FLAGS_UPDATE_IF_NOEXIST
pub const XDP_FLAGS_UPDATE_IF_NOEXIST: u32 = 1 << 0;

/// Filter handle used for traffic-control attachments
pub const TC_HANDLE: u32 = 1;

/// Filter priority used for traffic-control attachments
pub const TC_PRIORITY: u32 = 1;

// =============================================================================
// SCHEDULING CLASS
// =============================================================================

/// [LINUX-COMPAT] SCX_DSQ_FLAG_BUILTIN
pub const DSQ_FLAG_BUILTIN: u64 = 1 << 63;

/// [LINUX-COMPAT] SCX_DSQ_GLOBAL
pub const DSQ_GLOBAL: u64 = DSQ_FLAG_BUILTIN | 1;

/// [LINUX-COMPAT] SCX_DSQ_LOCAL
pub const DSQ_LOCAL: u64 = DSQ_FLAG_BUILTIN | 2;

/// Passing this ID to `create_dsq` asks for the next free ID
pub const DSQ_AUTO_ASSIGN: i64 = -1;

/// Default time slice (20ms)
/// [LINUX-COMPAT] SCX_SLICE_DFL
pub const SLICE_DFL_NS: u64 = 20_000_000;

/// Wake flag set when a sleeping task becomes runnable
/// [LINUX-COMPAT] SCX_WAKE_TTWU
pub const WAKE_TTWU: u64 = 1 << 3;

/// Upper bound on simulated CPUs
pub const MAX_CPUS: u32 = 1024;

// =============================================================================
// POLICY BOOKKEEPING
// =============================================================================

/// Fixed-point scale for moving-average weights (1.0 == 1_000_000)
pub const FIXED_POINT_SCALE: u64 = 1_000_000;

/// Capacity of per-task bookkeeping maps
pub const TASK_MAP_CAPACITY: u32 = 100_000;

/// Usage assumed for a task that has never been observed
pub const WORST_CASE_USAGE_PCT: u64 = 100;

/// Default interval of the statistics reporter
pub const STATS_INTERVAL: Duration = Duration::from_millis(100);
