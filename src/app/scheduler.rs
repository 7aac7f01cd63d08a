use crate::app::service::DispatchService;
use chrono::{DateTime, Duration as SimDuration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock time between timer-driven cycles
    pub interval: Duration,
    /// Stop after this many cycles; `None` runs until shutdown
    pub max_cycles: Option<u32>,
    /// Simulated time added to the dispatch clock on every timer tick
    pub minutes_per_tick: i64,
    /// Plan only, commit nothing
    pub dry_run: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_cycles: Some(10),
            minutes_per_tick: 15,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSummary {
    pub cycles: u32,
    pub legs: usize,
    pub boxes_dispatched: u32,
    pub arrivals: usize,
    pub remainders: usize,
    pub deferred: usize,
    pub failed: usize,
    pub clock: Option<DateTime<Utc>>,
}

/// Drives dispatch cycles from a timer and from new-order notifications.
///
/// Each timer tick advances a simulated clock; flights whose ETA has passed
/// on that clock land before the next cycle plans.
pub struct Scheduler {
    service: Arc<DispatchService>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(service: Arc<DispatchService>, config: SchedulerConfig) -> Self {
        Self { service, config }
    }

    pub async fn run<F>(&self, start: DateTime<Utc>, shutdown: F) -> SchedulerSummary
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let new_orders = self.service.new_order_signal();
        tokio::pin!(shutdown);

        let mut clock = start;
        let mut summary = SchedulerSummary::default();

        loop {
            if self.config.max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("🛑 Shutdown requested after {} cycles", summary.cycles);
                    break;
                }
                _ = ticker.tick() => {
                    clock += SimDuration::minutes(self.config.minutes_per_tick);
                }
                _ = new_orders.notified() => {
                    tracing::debug!("New order received, running an extra cycle");
                }
            }

            self.tick(clock, &mut summary);
        }

        summary.clock = Some(clock);
        summary
    }

    fn tick(&self, clock: DateTime<Utc>, summary: &mut SchedulerSummary) {
        summary.cycles += 1;

        if self.config.dry_run {
            let plan = self.service.preview();
            tracing::info!(
                "🔍 Dry run cycle {}: {} legs planned, {} deferred, {} failed",
                summary.cycles,
                plan.legs.len(),
                plan.deferred.len(),
                plan.failed.len()
            );
            return;
        }

        for arrival in self.service.arrive_due(clock) {
            summary.arrivals += 1;
            if arrival.remainder.is_some() {
                summary.remainders += 1;
            }
        }

        let report = self.service.run_cycle(clock);
        summary.legs += report.assignments.len();
        summary.boxes_dispatched += report.boxes_dispatched();
        summary.deferred += report.deferred.len();
        summary.failed += report.failed.len();
    }
}
