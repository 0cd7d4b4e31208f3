//! Chunk size planning.
//!
//! The planner combines two signals: the monitor's periodic recommendation
//! for a lane, and an immediate reaction to the chunk that just finished.

use crate::config::{ChunkBounds, PlannerConfig};
use crate::monitor::{ChunkOutcome, Lane, NetworkMonitor};
use std::sync::Arc;

/// Why a size was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeReason {
    /// The chunk failed after repeated retries.
    ShrinkAfterRetries,
    /// The chunk went through fast.
    GrowOnThroughput,
    /// The monitor published a newer recommendation.
    Recommendation,
    /// Nothing changed.
    Unchanged,
}

/// Size for the next chunk plus the evaluation it is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeDecision {
    /// The chunk size.
    pub size: u32,
    /// Monitor evaluation adopted so far.
    pub evaluation: u64,
    /// Why.
    pub reason: SizeReason,
}

/// Picks chunk sizes for transfers.
#[derive(Debug)]
pub struct ChunkPlanner {
    config: PlannerConfig,
    bounds: ChunkBounds,
    monitor: Arc<NetworkMonitor>,
}

impl ChunkPlanner {
    /// Creates a planner reading from `monitor`.
    pub fn new(config: PlannerConfig, bounds: ChunkBounds, monitor: Arc<NetworkMonitor>) -> Self {
        Self {
            config,
            bounds,
            monitor,
        }
    }

    /// The monitor this planner reads.
    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    /// Size for the first chunk of a new transfer.
    pub fn initial_size(&self, lane: Lane) -> SizeDecision {
        let condition = self.monitor.fresh_condition(lane);
        let mut size = f64::from(self.monitor.recommended_chunk_size(lane));
        if let Some(c) = &condition {
            if c.success_rate < self.config.success_rate_threshold {
                size *= 0.7;
            }
            if c.avg_latency > self.config.latency_threshold_ms {
                size *= 0.8;
            }
        }
        SizeDecision {
            size: self.bounds.clamp(size),
            evaluation: condition.map_or(0, |c| c.evaluation),
            reason: SizeReason::Recommendation,
        }
    }

    /// Size for the chunk after one that ended with `outcome`.
    ///
    /// `adopted` is the monitor evaluation the transfer last took a size
    /// from; a newer evaluation replaces the current size.
    pub fn next_size(
        &self,
        lane: Lane,
        current: u32,
        outcome: &ChunkOutcome,
        adopted: u64,
    ) -> SizeDecision {
        let current_f = f64::from(current);
        let factor = self.config.adjustment_factor;

        if !outcome.success && outcome.retries >= 2 {
            return SizeDecision {
                size: self.bounds.clamp(current_f * (1.0 - factor)),
                evaluation: adopted,
                reason: SizeReason::ShrinkAfterRetries,
            };
        }
        if outcome.success && outcome.throughput_kbps() > self.config.high_water_kbps {
            return SizeDecision {
                size: self.bounds.clamp(current_f * (1.0 + factor)),
                evaluation: adopted,
                reason: SizeReason::GrowOnThroughput,
            };
        }
        if let Some(condition) = self.monitor.fresh_condition(lane) {
            if condition.evaluation > adopted {
                return SizeDecision {
                    size: self.bounds.clamp(f64::from(condition.optimal_chunk_size)),
                    evaluation: condition.evaluation,
                    reason: SizeReason::Recommendation,
                };
            }
        }
        SizeDecision {
            size: self.bounds.clamp(current_f),
            evaluation: adopted,
            reason: SizeReason::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use std::time::Duration;
    use stockferry_core::{Category, ManualClock};

    const LANE: Lane = Lane::Category(Category::Package);

    fn planner(bounds: ChunkBounds) -> ChunkPlanner {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = Arc::new(NetworkMonitor::new(MonitorConfig::default(), bounds, clock));
        ChunkPlanner::new(PlannerConfig::default(), bounds, monitor)
    }

    fn outcome(success: bool, retries: u32, kbps: u64) -> ChunkOutcome {
        ChunkOutcome {
            success,
            duration: Duration::from_secs(1),
            bytes: kbps * 1024,
            retries,
            items: 10,
            error: None,
        }
    }

    #[test]
    fn initial_size_is_base_without_history() {
        let planner = planner(ChunkBounds::default());
        let decision = planner.initial_size(LANE);
        assert_eq!(decision.size, 300);
        assert_eq!(decision.evaluation, 0);
        assert_eq!(planner.initial_size(Lane::Bulk).size, 100);
    }

    #[test]
    fn initial_size_penalizes_bad_lane() {
        let planner = planner(ChunkBounds::default());
        for _ in 0..3 {
            planner.monitor().record(LANE, outcome(false, 6, 1));
        }
        // base 300 * 0.5 * 0.8 = 120, then * 0.7 * 0.8
        let decision = planner.initial_size(LANE);
        assert_eq!(decision.size, 67);
        assert_eq!(decision.evaluation, 1);
    }

    #[test]
    fn shrink_after_retried_failure() {
        let planner = planner(ChunkBounds::default());
        let decision = planner.next_size(LANE, 100, &outcome(false, 2, 0), 0);
        assert_eq!(decision.size, 80);
        assert_eq!(decision.reason, SizeReason::ShrinkAfterRetries);

        // One retry is not enough to react.
        let decision = planner.next_size(LANE, 100, &outcome(false, 1, 0), 0);
        assert_eq!(decision.reason, SizeReason::Unchanged);
        assert_eq!(decision.size, 100);
    }

    #[test]
    fn grow_on_throughput() {
        let planner = planner(ChunkBounds::default());
        let decision = planner.next_size(LANE, 100, &outcome(true, 0, 60), 0);
        assert_eq!(decision.size, 120);
        assert_eq!(decision.reason, SizeReason::GrowOnThroughput);
        let slow = planner.next_size(LANE, 100, &outcome(true, 0, 40), 0);
        assert_eq!(slow.size, 100);
    }

    #[test]
    fn adopts_newer_recommendation_once() {
        let planner = planner(ChunkBounds::default());
        for _ in 0..3 {
            planner.monitor().record(LANE, outcome(true, 0, 500));
        }
        let first = planner.next_size(LANE, 100, &outcome(true, 0, 20), 0);
        assert_eq!(first.reason, SizeReason::Recommendation);
        assert_eq!(first.size, 540);
        assert_eq!(first.evaluation, 1);

        let second = planner.next_size(LANE, 200, &outcome(true, 0, 20), first.evaluation);
        assert_eq!(second.reason, SizeReason::Unchanged);
        assert_eq!(second.size, 200);
    }

    #[test]
    fn sizes_stay_in_bounds() {
        let planner = planner(ChunkBounds::new(5, 20));
        assert_eq!(planner.next_size(LANE, 5, &outcome(false, 3, 0), 0).size, 5);
        assert_eq!(planner.next_size(LANE, 20, &outcome(true, 0, 900), 0).size, 20);
        assert_eq!(planner.initial_size(LANE).size, 20);
    }
}
