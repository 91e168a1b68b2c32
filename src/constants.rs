//! Orchestrator-wide tuning constants.

/// Default capacity of the task history ring buffer (§4.2).
pub const DEFAULT_TASK_HISTORY_CAPACITY: usize = 100;

/// Default capacity of the error history ring buffer (§4.2).
pub const DEFAULT_ERROR_HISTORY_CAPACITY: usize = 50;

/// Default capacity of the in-process log ring buffer (§4.2).
pub const DEFAULT_LOG_HISTORY_CAPACITY: usize = 50_000;

/// Starting back-off in the wait-and-reserve loop (§4.6).
pub const SELECTION_BACKOFF_START_MS: u64 = 2_000;

/// Multiplicative factor applied to the selection back-off each retry.
pub const SELECTION_BACKOFF_FACTOR: f64 = 1.5;

/// Selection back-off ceiling (§4.6).
pub const SELECTION_BACKOFF_CAP_MS: u64 = 30_000;

/// Recovery loop back-off between unrecovered re-enqueues (§4.4, §9
/// open question: fixed, not exponential).
pub const RECOVERY_BACKOFF_SECS: u64 = 60;

/// Recovery loop give-up ceiling per enqueued tuple (§4.4).
pub const RECOVERY_CEILING_SECS: u64 = 24 * 60 * 60;

/// Reachability probe timeout during discovery (§4.3: "bounded and short,
/// on the order of seconds").
pub const DISCOVERY_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default discovery interval when `DISCOVERY_INTERVAL_SECONDS` is unset.
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 60;

/// Default task execution timeout when `TASK_EXECUTION_TIMEOUT_SECONDS`
/// is unset.
pub const DEFAULT_TASK_EXECUTION_TIMEOUT_SECS: u64 = 300;

/// Sleep between a worker's BUSY status check and its next poll (§4.7).
pub const WORKER_BUSY_POLL_INTERVAL_MS: u64 = 100;

/// Default JWT expiry for dashboard login tokens, in hours.
pub const DEFAULT_JWT_EXPIRE_HOURS: i64 = 12;
