//! Configuration for the transfer engine.

use std::time::Duration;

/// Configuration for transfers.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry policy for chunk sends.
    pub retry: RetryConfig,
    /// Request timeout handed to transports that support one.
    pub timeout: Duration,
    /// Smallest chunk, in items. Never below 1.
    pub min_chunk_size: u32,
    /// Largest chunk, in items.
    pub max_chunk_size: u32,
    /// Cap on transfers that are pending, in progress or paused.
    pub max_active_transfers: Option<usize>,
    /// Retry policy for state store writes.
    pub persist_retry: RetryConfig,
    /// Network monitor tuning.
    pub monitor: MonitorConfig,
    /// Chunk planner tuning.
    pub planner: PlannerConfig,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            min_chunk_size: 1,
            max_chunk_size: 1000,
            max_active_transfers: None,
            persist_retry: RetryConfig::new(3).with_initial_delay(Duration::from_millis(50)),
            monitor: MonitorConfig::default(),
            planner: PlannerConfig::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the chunk size bounds. `min` is raised to 1 and `max` to `min`.
    pub fn with_chunk_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_chunk_size = min.max(1);
        self.max_chunk_size = max.max(self.min_chunk_size);
        self
    }

    /// Caps the number of unfinished transfers.
    pub fn with_max_active_transfers(mut self, limit: usize) -> Self {
        self.max_active_transfers = Some(limit);
        self
    }

    /// Sets the retry policy for state store writes.
    pub fn with_persist_retry(mut self, retry: RetryConfig) -> Self {
        self.persist_retry = retry;
        self
    }

    /// Sets the monitor configuration.
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Sets the planner configuration.
    pub fn with_planner(mut self, planner: PlannerConfig) -> Self {
        self.planner = planner;
        self
    }

    /// The chunk size bounds.
    pub fn bounds(&self) -> ChunkBounds {
        ChunkBounds::new(self.min_chunk_size, self.max_chunk_size)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Inclusive chunk size range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    /// Lower bound, at least 1.
    pub min: u32,
    /// Upper bound, at least `min`.
    pub max: u32,
}

impl ChunkBounds {
    /// Creates bounds, fixing up `min < 1` and `max < min`.
    pub fn new(min: u32, max: u32) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Rounds down and clamps a computed size.
    pub fn clamp(&self, size: f64) -> u32 {
        if !size.is_finite() || size <= 0.0 {
            return self.min;
        }
        // Absorb float noise such as 539.9999 for 540.
        let floored = (size + 1e-9).floor().min(f64::from(u32::MAX)) as u32;
        floored.clamp(self.min, self.max)
    }
}

impl Default for ChunkBounds {
    fn default() -> Self {
        Self::new(1, 1000)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// A configuration that retries immediately. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts)
            .with_initial_delay(Duration::ZERO)
            .with_jitter(false)
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay before attempt `attempt` (0-indexed; the first attempt waits
    /// nothing).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% extra.
            let jitter = delay_secs * 0.25 * time_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

fn time_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

/// Configuration for the network monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Outcomes kept per lane before trimming.
    pub window_capacity: usize,
    /// Outcomes kept after a trim.
    pub window_trim_to: usize,
    /// Only outcomes this recent are evaluated.
    pub window: Duration,
    /// Minimum time between two evaluations of a lane.
    pub evaluation_interval: Duration,
    /// Age after which a condition is ignored.
    pub stale_after: Duration,
    /// Evaluations with fewer samples are skipped.
    pub min_samples: usize,
    /// Base size for category lanes.
    pub base_chunk_size: u32,
    /// Base size for the bulk lane.
    pub bulk_chunk_size: u32,
}

impl MonitorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            window_capacity: 100,
            window_trim_to: 50,
            window: Duration::from_secs(5 * 60),
            evaluation_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(10 * 60),
            min_samples: 3,
            base_chunk_size: 300,
            bulk_chunk_size: 100,
        }
    }

    /// Sets the evaluation interval.
    pub fn with_evaluation_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval = interval;
        self
    }

    /// Sets the sample window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the staleness limit.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Sets the base chunk sizes.
    pub fn with_base_sizes(mut self, category: u32, bulk: u32) -> Self {
        self.base_chunk_size = category;
        self.bulk_chunk_size = bulk;
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the chunk planner.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Relative step of a reactive resize.
    pub adjustment_factor: f64,
    /// Throughput above which a successful chunk grows the size, KB/s.
    pub high_water_kbps: f64,
    /// Success rate below which the initial size is reduced.
    pub success_rate_threshold: f64,
    /// Latency above which the initial size is reduced, ms.
    pub latency_threshold_ms: f64,
}

impl PlannerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            adjustment_factor: 0.2,
            high_water_kbps: 50.0,
            success_rate_threshold: 0.85,
            latency_threshold_ms: 5000.0,
        }
    }

    /// Sets the reactive resize step.
    pub fn with_adjustment_factor(mut self, factor: f64) -> Self {
        self.adjustment_factor = factor;
        self
    }

    /// Sets the growth threshold.
    pub fn with_high_water_kbps(mut self, kbps: f64) -> Self {
        self.high_water_kbps = kbps;
        self
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_chunk_bounds(0, 0)
            .with_max_active_transfers(4)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.min_chunk_size, 1);
        assert_eq!(config.max_chunk_size, 1);
        assert_eq!(config.max_active_transfers, Some(4));
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn bounds_clamp() {
        let bounds = ChunkBounds::new(5, 50);
        assert_eq!(bounds.clamp(2.0), 5);
        assert_eq!(bounds.clamp(12.9), 12);
        assert_eq!(bounds.clamp(1e12), 50);
        assert_eq!(bounds.clamp(f64::NAN), 5);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn immediate_retry_has_no_delay() {
        let config = RetryConfig::immediate(3);
        assert_eq!(config.delay_for_attempt(2), Duration::ZERO);
    }
}
