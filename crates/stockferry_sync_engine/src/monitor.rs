//! Network quality tracking.
//!
//! Chunk outcomes are grouped per [`Lane`]. Each lane keeps a bounded window
//! of recent outcomes and, at most once per evaluation interval, derives a
//! [`NetworkCondition`] holding the chunk size it recommends.

use crate::config::{ChunkBounds, MonitorConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use stockferry_core::{duration_ms, Category, Clock, OperationKind};
use tracing::debug;

/// Grouping key for outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Regular transfers of one category.
    Category(Category),
    /// Full-sync transfers of any category.
    Bulk,
}

impl Lane {
    /// The lane a transfer reports to.
    pub fn for_transfer(operation: OperationKind, category: Category) -> Self {
        match operation {
            OperationKind::FullSync => Self::Bulk,
            _ => Self::Category(category),
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category(c) => write!(f, "{c}"),
            Self::Bulk => f.write_str("bulk"),
        }
    }
}

/// Result of one chunk, as seen by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    /// Whether the chunk was delivered.
    pub success: bool,
    /// Time spent on the final send.
    pub duration: Duration,
    /// Bytes sent.
    pub bytes: u64,
    /// Sends beyond the first.
    pub retries: u32,
    /// Items in the chunk.
    pub items: u32,
    /// Final error, if any.
    pub error: Option<String>,
}

impl ChunkOutcome {
    /// Throughput of this outcome in KB/s.
    pub fn throughput_kbps(&self) -> f64 {
        kbps(self.bytes, self.duration)
    }
}

// A zero duration is treated as one millisecond so instant sends stay finite.
fn kbps(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64().max(0.001);
    bytes as f64 / 1024.0 / secs
}

#[derive(Debug, Clone)]
struct Sample {
    at_ms: u64,
    outcome: ChunkOutcome,
}

/// Derived view of a lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkCondition {
    /// The lane.
    pub lane: Lane,
    /// Mean of `retries * 1000`, ms.
    pub avg_latency: f64,
    /// Successful fraction of the samples.
    pub success_rate: f64,
    /// Bytes over time of the successful samples, KB/s.
    pub avg_throughput: f64,
    /// Recommended chunk size.
    pub optimal_chunk_size: u32,
    /// Evaluation time, ms since epoch.
    pub last_updated: u64,
    /// Samples the evaluation used.
    pub sample_count: usize,
    /// Increments with every evaluation of the lane.
    pub evaluation: u64,
}

#[derive(Debug, Default)]
struct LaneWindow {
    samples: VecDeque<Sample>,
    condition: Option<NetworkCondition>,
    last_evaluated: Option<u64>,
    evaluations: u64,
}

/// Summary of recent outcomes across every lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    /// Period covered.
    pub period_ms: u64,
    /// Outcomes in the period.
    pub total_outcomes: usize,
    /// Successful fraction, 0 when there are no outcomes.
    pub success_rate: f64,
    /// Mean send duration, ms.
    pub avg_duration_ms: f64,
    /// Bytes sent.
    pub total_bytes: u64,
    /// Bytes over time of the successful outcomes, KB/s.
    pub avg_throughput: f64,
    /// Final error message to occurrence count.
    pub error_summary: BTreeMap<String, usize>,
    /// Suggested tuning.
    pub recommendations: Vec<String>,
    /// Current lane conditions.
    pub conditions: Vec<NetworkCondition>,
}

/// Tracks chunk outcomes and recommends chunk sizes.
pub struct NetworkMonitor {
    config: MonitorConfig,
    bounds: ChunkBounds,
    clock: Arc<dyn Clock>,
    lanes: RwLock<HashMap<Lane, Arc<Mutex<LaneWindow>>>>,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("config", &self.config)
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    /// Creates a monitor with no history.
    pub fn new(config: MonitorConfig, bounds: ChunkBounds, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            bounds,
            clock,
            lanes: RwLock::new(HashMap::new()),
        }
    }

    /// The static size used when a lane has no fresh condition.
    pub fn base_size(&self, lane: Lane) -> u32 {
        let base = match lane {
            Lane::Category(_) => self.config.base_chunk_size,
            Lane::Bulk => self.config.bulk_chunk_size,
        };
        base.clamp(self.bounds.min, self.bounds.max)
    }

    fn window(&self, lane: Lane) -> Arc<Mutex<LaneWindow>> {
        if let Some(window) = self.lanes.read().get(&lane) {
            return Arc::clone(window);
        }
        Arc::clone(self.lanes.write().entry(lane).or_default())
    }

    /// Adds an outcome, evaluating the lane when it is due.
    pub fn record(&self, lane: Lane, outcome: ChunkOutcome) {
        let now = self.clock.now_ms();
        let window = self.window(lane);
        let mut window = window.lock();

        window.samples.push_back(Sample {
            at_ms: now,
            outcome,
        });
        if window.samples.len() > self.config.window_capacity {
            let excess = window.samples.len() - self.config.window_trim_to;
            window.samples.drain(..excess);
        }

        let due = window.last_evaluated.map_or(true, |at| {
            now.saturating_sub(at) >= duration_ms(self.config.evaluation_interval)
        });
        if due {
            self.evaluate(lane, &mut window, now);
        }
    }

    /// Evaluates a lane regardless of the interval. Returns the resulting
    /// condition, which is the previous one if there were too few samples.
    pub fn evaluate_now(&self, lane: Lane) -> Option<NetworkCondition> {
        let now = self.clock.now_ms();
        let window = self.window(lane);
        let mut window = window.lock();
        self.evaluate(lane, &mut window, now);
        window.condition.clone()
    }

    fn evaluate(&self, lane: Lane, window: &mut LaneWindow, now: u64) {
        let since = now.saturating_sub(duration_ms(self.config.window));
        let recent: Vec<&ChunkOutcome> = window
            .samples
            .iter()
            .filter(|s| s.at_ms >= since)
            .map(|s| &s.outcome)
            .collect();
        if recent.len() < self.config.min_samples {
            return;
        }

        let count = recent.len() as f64;
        let successes: Vec<&&ChunkOutcome> = recent.iter().filter(|o| o.success).collect();
        let success_rate = successes.len() as f64 / count;
        let avg_latency = recent
            .iter()
            .map(|o| f64::from(o.retries) * 1000.0)
            .sum::<f64>()
            / count;
        let avg_throughput = if successes.is_empty() {
            0.0
        } else {
            let bytes: u64 = successes.iter().map(|o| o.bytes).sum();
            let time: Duration = successes.iter().map(|o| o.duration).sum();
            kbps(bytes, time)
        };

        let mut size = f64::from(self.base_size(lane));
        size *= if success_rate > 0.95 {
            1.5
        } else if success_rate > 0.8 {
            1.0
        } else {
            0.5
        };
        if avg_throughput > 100.0 {
            size *= 1.2;
        } else if avg_throughput < 10.0 {
            size *= 0.8;
        }
        let optimal = self.bounds.clamp(size);

        window.evaluations += 1;
        window.last_evaluated = Some(now);
        let condition = NetworkCondition {
            lane,
            avg_latency,
            success_rate,
            avg_throughput,
            optimal_chunk_size: optimal,
            last_updated: now,
            sample_count: recent.len(),
            evaluation: window.evaluations,
        };
        debug!(
            %lane,
            success_rate,
            avg_throughput,
            optimal_chunk_size = optimal,
            "lane evaluated"
        );
        window.condition = Some(condition);
    }

    fn fresh(&self, condition: &NetworkCondition) -> bool {
        self.clock.now_ms().saturating_sub(condition.last_updated)
            <= duration_ms(self.config.stale_after)
    }

    /// The lane's condition, if one exists and is not stale.
    pub fn fresh_condition(&self, lane: Lane) -> Option<NetworkCondition> {
        self.condition(lane).filter(|c| self.fresh(c))
    }

    /// The size to use for a lane right now.
    pub fn recommended_chunk_size(&self, lane: Lane) -> u32 {
        self.fresh_condition(lane)
            .map_or_else(|| self.base_size(lane), |c| c.optimal_chunk_size)
    }

    /// The lane's last condition, fresh or not.
    pub fn condition(&self, lane: Lane) -> Option<NetworkCondition> {
        let window = self.lanes.read().get(&lane).cloned()?;
        let condition = window.lock().condition.clone();
        condition
    }

    /// Every lane's last condition.
    pub fn conditions(&self) -> Vec<NetworkCondition> {
        let windows: Vec<Arc<Mutex<LaneWindow>>> = self.lanes.read().values().cloned().collect();
        let mut all: Vec<NetworkCondition> = windows
            .iter()
            .filter_map(|w| w.lock().condition.clone())
            .collect();
        all.sort_by_key(|c| c.lane);
        all
    }

    /// Summarizes the outcomes of the last `period`.
    pub fn performance_report(&self, period: Duration) -> PerformanceReport {
        let now = self.clock.now_ms();
        let since = now.saturating_sub(duration_ms(period));
        let windows: Vec<Arc<Mutex<LaneWindow>>> = self.lanes.read().values().cloned().collect();
        let outcomes: Vec<ChunkOutcome> = windows
            .iter()
            .flat_map(|w| {
                w.lock()
                    .samples
                    .iter()
                    .filter(|s| s.at_ms >= since)
                    .map(|s| s.outcome.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        let total = outcomes.len();
        let mut report = PerformanceReport {
            period_ms: duration_ms(period),
            total_outcomes: total,
            success_rate: 0.0,
            avg_duration_ms: 0.0,
            total_bytes: outcomes.iter().map(|o| o.bytes).sum(),
            avg_throughput: 0.0,
            error_summary: BTreeMap::new(),
            recommendations: Vec::new(),
            conditions: self.conditions(),
        };
        if total == 0 {
            return report;
        }

        let count = total as f64;
        let successes: Vec<&ChunkOutcome> = outcomes.iter().filter(|o| o.success).collect();
        report.success_rate = successes.len() as f64 / count;
        report.avg_duration_ms = outcomes
            .iter()
            .map(|o| o.duration.as_secs_f64() * 1000.0)
            .sum::<f64>()
            / count;
        if !successes.is_empty() {
            let bytes: u64 = successes.iter().map(|o| o.bytes).sum();
            let time: Duration = successes.iter().map(|o| o.duration).sum();
            report.avg_throughput = kbps(bytes, time);
        }
        for error in outcomes.iter().filter_map(|o| o.error.as_ref()) {
            *report.error_summary.entry(error.clone()).or_default() += 1;
        }

        let retried = outcomes.iter().filter(|o| o.retries > 0).count() as f64;
        let avg_items = outcomes.iter().map(|o| f64::from(o.items)).sum::<f64>() / count;
        if report.success_rate < 0.8 {
            report
                .recommendations
                .push("success rate below 80%: check network stability".to_string());
        }
        if retried / count > 0.3 {
            report
                .recommendations
                .push("over 30% of chunks needed retries: use smaller chunks".to_string());
        }
        if avg_items > 500.0 {
            report
                .recommendations
                .push("average chunk above 500 items: lower max_chunk_size".to_string());
        } else if avg_items < 10.0 {
            report
                .recommendations
                .push("average chunk below 10 items: check network conditions".to_string());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockferry_core::ManualClock;

    fn monitor() -> (NetworkMonitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let monitor = NetworkMonitor::new(MonitorConfig::default(), ChunkBounds::default(), clock.clone());
        (monitor, clock)
    }

    fn outcome(success: bool, kbps: u64, retries: u32) -> ChunkOutcome {
        ChunkOutcome {
            success,
            duration: Duration::from_secs(1),
            bytes: kbps * 1024,
            retries,
            items: 50,
            error: (!success).then(|| "timeout".to_string()),
        }
    }

    const COMPONENT: Lane = Lane::Category(Category::Component);

    #[test]
    fn lanes_per_operation() {
        assert_eq!(Lane::for_transfer(OperationKind::FullSync, Category::Pallet), Lane::Bulk);
        assert_eq!(
            Lane::for_transfer(OperationKind::Delete, Category::Pallet),
            Lane::Category(Category::Pallet)
        );
    }

    #[test]
    fn base_sizes_without_history() {
        let (monitor, _) = monitor();
        assert_eq!(monitor.recommended_chunk_size(COMPONENT), 300);
        assert_eq!(monitor.recommended_chunk_size(Lane::Bulk), 100);
        assert!(monitor.condition(COMPONENT).is_none());
    }

    #[test]
    fn too_few_samples_keep_base() {
        let (monitor, _) = monitor();
        monitor.record(COMPONENT, outcome(true, 500, 0));
        monitor.record(COMPONENT, outcome(true, 500, 0));
        assert!(monitor.condition(COMPONENT).is_none());
        assert_eq!(monitor.recommended_chunk_size(COMPONENT), 300);
    }

    #[test]
    fn poor_network_halves_and_slows() {
        let (monitor, _) = monitor();
        for _ in 0..4 {
            monitor.record(COMPONENT, outcome(false, 5, 2));
        }
        let condition = monitor.condition(COMPONENT).unwrap();
        assert_eq!(condition.success_rate, 0.0);
        assert!((condition.avg_latency - 2000.0).abs() < f64::EPSILON);
        // 300 * 0.5 * 0.8, no successes means zero throughput
        assert_eq!(condition.optimal_chunk_size, 120);
    }

    #[test]
    fn evaluation_waits_for_interval() {
        let (monitor, clock) = monitor();
        for _ in 0..3 {
            monitor.record(COMPONENT, outcome(true, 500, 0));
        }
        let first = monitor.condition(COMPONENT).unwrap();
        assert_eq!(first.evaluation, 1);

        for _ in 0..5 {
            monitor.record(COMPONENT, outcome(false, 1, 3));
        }
        assert_eq!(monitor.condition(COMPONENT).unwrap().evaluation, 1);

        clock.advance(Duration::from_secs(61));
        monitor.record(COMPONENT, outcome(false, 1, 3));
        let second = monitor.condition(COMPONENT).unwrap();
        assert_eq!(second.evaluation, 2);
        assert!(second.optimal_chunk_size < first.optimal_chunk_size);
    }

    #[test]
    fn stale_condition_falls_back_to_base() {
        let (monitor, clock) = monitor();
        for _ in 0..3 {
            monitor.record(COMPONENT, outcome(true, 500, 0));
        }
        assert_eq!(monitor.recommended_chunk_size(COMPONENT), 540);
        clock.advance(Duration::from_secs(11 * 60));
        assert_eq!(monitor.recommended_chunk_size(COMPONENT), 300);
        assert!(monitor.condition(COMPONENT).is_some());
    }

    #[test]
    fn window_is_trimmed() {
        let (monitor, _) = monitor();
        for _ in 0..101 {
            monitor.record(COMPONENT, outcome(true, 500, 0));
        }
        let window = monitor.window(COMPONENT);
        assert_eq!(window.lock().samples.len(), 50);
    }

    #[test]
    fn old_samples_leave_the_window() {
        let (monitor, clock) = monitor();
        for _ in 0..3 {
            monitor.record(COMPONENT, outcome(false, 1, 2));
        }
        clock.advance(Duration::from_secs(6 * 60));
        for _ in 0..3 {
            monitor.record(COMPONENT, outcome(true, 500, 0));
        }
        let condition = monitor.evaluate_now(COMPONENT).unwrap();
        assert_eq!(condition.sample_count, 3);
        assert!((condition.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn report_summarizes_errors() {
        let (monitor, _) = monitor();
        monitor.record(COMPONENT, outcome(true, 200, 0));
        monitor.record(Lane::Bulk, outcome(false, 1, 2));
        monitor.record(Lane::Bulk, outcome(false, 1, 2));

        let report = monitor.performance_report(Duration::from_secs(3600));
        assert_eq!(report.total_outcomes, 3);
        assert!((report.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.error_summary.get("timeout"), Some(&2));
        assert!(report.recommendations.iter().any(|r| r.contains("success rate")));
        assert!(report.recommendations.iter().any(|r| r.contains("retries")));
    }

    #[test]
    fn empty_report() {
        let (monitor, _) = monitor();
        let report = monitor.performance_report(Duration::from_secs(60));
        assert_eq!(report.total_outcomes, 0);
        assert!(report.recommendations.is_empty());
    }
}
