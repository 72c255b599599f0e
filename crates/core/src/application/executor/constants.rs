// Executor constants (no magic values)
use std::time::Duration;

/// Sleep when no job is claimable and no work signal arrives (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep after a store error before claiming again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default internal pool size
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Details recorded when a job's deadline elapses
pub const TIMEOUT_DETAILS: &str = "timeout";

/// Details recorded for running jobs found at startup
pub const RESTART_DETAILS: &str = "executor restarted";

/// Details recorded when a processor panics
pub const PANIC_DETAILS: &str = "build processor panicked";

/// How often the deadline sweeper runs (5s)
pub const DEFAULT_DEADLINE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
