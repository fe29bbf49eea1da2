use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::sourcing::Capability;

/// Metrics never climb past this through automatic tuning.
pub const METRIC_CAP: f64 = 95.0;
/// Consecutive successes before a worker's metrics are nudged.
pub const SUSTAINED_STREAK: u32 = 3;

const EFFICIENCY_NUDGE: f64 = 0.5;
const UTILIZATION_NUDGE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationLevel {
    Manual,
    Assisted,
    Autonomous,
}

impl AutomationLevel {
    pub fn permits_autonomous_assignment(self) -> bool {
        matches!(self, AutomationLevel::Assisted | AutomationLevel::Autonomous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub on_time_rate: f64,
    pub efficiency_rate: f64,
    pub satisfaction_rate: f64,
    pub profit_generated: f64,
    pub utilization_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub automation_level: AutomationLevel,
    pub performance_metrics: PerformanceMetrics,
    pub capabilities: BTreeSet<Capability>,
    pub experience_years: f64,
    #[serde(default)]
    pub success_streak: u32,
}

impl Worker {
    pub fn can_haul(&self, required: &BTreeSet<Capability>) -> bool {
        self.capabilities.is_superset(required)
    }
}

/// Driver pool. Only the assignment and tuning phases write to it.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Worker>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(workers: impl IntoIterator<Item = Worker>) -> Self {
        Self {
            workers: workers.into_iter().map(|w| (w.id.clone(), w)).collect(),
        }
    }

    pub fn get(&self, worker_id: &str) -> Option<&Worker> {
        self.workers.get(worker_id)
    }

    pub fn all(&self) -> Vec<Worker> {
        self.workers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Highest earner able to take the load on its own. `None` means nobody fits this tick.
    pub fn best_available(&self, required: &BTreeSet<Capability>) -> Option<&Worker> {
        self.workers
            .values()
            .filter(|w| w.automation_level.permits_autonomous_assignment())
            .filter(|w| w.can_haul(required))
            .max_by(|a, b| {
                a.performance_metrics
                    .profit_generated
                    .total_cmp(&b.performance_metrics.profit_generated)
                    // prefer the lower id on equal profit
                    .then_with(|| b.id.cmp(&a.id))
            })
    }

    pub fn record_profit(&mut self, worker_id: &str, amount: f64) -> Result<()> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| DispatchError::UnknownWorker(worker_id.to_string()))?;
        worker.performance_metrics.profit_generated += amount;
        Ok(())
    }

    /// Failures reset the streak but never lower metrics.
    pub fn apply_outcome(&mut self, worker_id: &str, success: bool) -> Result<()> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| DispatchError::UnknownWorker(worker_id.to_string()))?;

        if !success {
            worker.success_streak = 0;
            return Ok(());
        }

        worker.success_streak += 1;
        if worker.success_streak >= SUSTAINED_STREAK {
            let metrics = &mut worker.performance_metrics;
            metrics.efficiency_rate = nudge(metrics.efficiency_rate, EFFICIENCY_NUDGE);
            metrics.utilization_rate = nudge(metrics.utilization_rate, UTILIZATION_NUDGE);
            debug!(
                "Worker {} on a {}-load streak, efficiency now {:.1}",
                worker_id, worker.success_streak, metrics.efficiency_rate
            );
        }
        Ok(())
    }

    /// Fleet-wide efficiency nudge. Repeated calls converge on the cap.
    pub fn nudge_all_efficiency(&mut self, delta: f64) -> usize {
        let mut changed = 0;
        for worker in self.workers.values_mut() {
            let before = worker.performance_metrics.efficiency_rate;
            worker.performance_metrics.efficiency_rate = nudge(before, delta);
            if worker.performance_metrics.efficiency_rate != before {
                changed += 1;
            }
        }
        changed
    }
}

fn nudge(value: f64, delta: f64) -> f64 {
    if value >= METRIC_CAP {
        value
    } else {
        (value + delta).min(METRIC_CAP)
    }
}

/// Starter roster for the standalone binary.
pub fn default_roster() -> Vec<Worker> {
    use Capability::*;

    let worker = |id: &str, name: &str, level, caps: &[Capability], years: f64, metrics: [f64; 5]| Worker {
        id: id.to_string(),
        name: name.to_string(),
        automation_level: level,
        performance_metrics: PerformanceMetrics {
            on_time_rate: metrics[0],
            efficiency_rate: metrics[1],
            satisfaction_rate: metrics[2],
            profit_generated: metrics[3],
            utilization_rate: metrics[4],
        },
        capabilities: caps.iter().copied().collect(),
        experience_years: years,
        success_streak: 0,
    };

    vec![
        worker("drv-001", "R. Alvarez", AutomationLevel::Autonomous, &[DryVan, Reefer, Expedite], 12.0, [96.0, 91.0, 94.0, 18_500.0, 82.0]),
        worker("drv-002", "K. Osei", AutomationLevel::Autonomous, &[Flatbed, StepDeck, Hazmat], 7.0, [92.0, 88.0, 90.0, 14_200.0, 78.0]),
        worker("drv-003", "M. Chen", AutomationLevel::Assisted, &[DryVan, PowerOnly, Hazmat], 4.0, [89.0, 85.0, 87.0, 9_800.0, 74.0]),
        worker("drv-004", "S. Novak", AutomationLevel::Autonomous, &[Reefer, DryVan, Hazmat, Expedite], 9.0, [94.0, 90.0, 92.0, 16_900.0, 80.0]),
        worker("drv-005", "J. Banda", AutomationLevel::Manual, &[DryVan, Flatbed, StepDeck, PowerOnly], 15.0, [97.0, 93.0, 95.0, 21_000.0, 85.0]),
    ]
}

impl WorkerRegistry {
    pub fn with_default_roster() -> Self {
        Self::with_workers(default_roster())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::worker;
    use super::*;

    fn required(caps: &[Capability]) -> BTreeSet<Capability> {
        caps.iter().copied().collect()
    }

    #[test]
    fn best_available_picks_top_earner_with_capabilities() {
        let registry = WorkerRegistry::with_workers(vec![
            worker("a", AutomationLevel::Autonomous, &[Capability::DryVan], 5_000.0, 90.0),
            worker("b", AutomationLevel::Autonomous, &[Capability::DryVan, Capability::Hazmat], 3_000.0, 90.0),
            worker("c", AutomationLevel::Manual, &[Capability::DryVan, Capability::Hazmat], 9_000.0, 90.0),
        ]);

        let best = registry.best_available(&required(&[Capability::DryVan])).unwrap();
        assert_eq!(best.id, "a");

        // manual workers are never auto-assigned
        let best = registry
            .best_available(&required(&[Capability::DryVan, Capability::Hazmat]))
            .unwrap();
        assert_eq!(best.id, "b");

        assert!(registry.best_available(&required(&[Capability::Reefer])).is_none());
    }

    #[test]
    fn empty_pool_yields_none() {
        let registry = WorkerRegistry::new();
        assert!(registry.best_available(&BTreeSet::new()).is_none());
    }

    #[test]
    fn ties_break_on_lowest_id() {
        let registry = WorkerRegistry::with_workers(vec![
            worker("z", AutomationLevel::Autonomous, &[Capability::DryVan], 1_000.0, 90.0),
            worker("m", AutomationLevel::Autonomous, &[Capability::DryVan], 1_000.0, 90.0),
        ]);
        assert_eq!(registry.best_available(&BTreeSet::new()).unwrap().id, "m");
    }

    #[test]
    fn sustained_success_nudges_metrics_up_to_cap() {
        let mut registry = WorkerRegistry::with_workers(vec![worker(
            "a",
            AutomationLevel::Autonomous,
            &[Capability::DryVan],
            0.0,
            94.0,
        )]);

        registry.apply_outcome("a", true).unwrap();
        registry.apply_outcome("a", true).unwrap();
        assert_eq!(registry.get("a").unwrap().performance_metrics.efficiency_rate, 94.0);

        for _ in 0..10 {
            registry.apply_outcome("a", true).unwrap();
        }
        let metrics = registry.get("a").unwrap().performance_metrics;
        assert_eq!(metrics.efficiency_rate, METRIC_CAP);
        assert_eq!(metrics.utilization_rate, METRIC_CAP);
    }

    #[test]
    fn failure_resets_streak_without_lowering_metrics() {
        let mut registry = WorkerRegistry::with_workers(vec![worker(
            "a",
            AutomationLevel::Autonomous,
            &[Capability::DryVan],
            0.0,
            80.0,
        )]);
        for _ in 0..3 {
            registry.apply_outcome("a", true).unwrap();
        }
        let before = registry.get("a").unwrap().performance_metrics;
        registry.apply_outcome("a", false).unwrap();
        let after = registry.get("a").unwrap();
        assert_eq!(after.success_streak, 0);
        assert_eq!(after.performance_metrics, before);
    }

    #[test]
    fn fleet_nudge_is_idempotent_at_cap() {
        let mut registry = WorkerRegistry::with_workers(vec![
            worker("a", AutomationLevel::Autonomous, &[], 0.0, 94.0),
            worker("b", AutomationLevel::Autonomous, &[], 0.0, 95.0),
        ]);
        assert_eq!(registry.nudge_all_efficiency(2.0), 1);
        let snapshot = registry.all();
        assert_eq!(registry.nudge_all_efficiency(2.0), 0);
        assert_eq!(registry.all(), snapshot);
        assert!(snapshot.iter().all(|w| w.performance_metrics.efficiency_rate == METRIC_CAP));
    }

    #[test]
    fn unknown_worker_is_reported() {
        let mut registry = WorkerRegistry::new();
        assert!(matches!(
            registry.record_profit("ghost", 10.0),
            Err(DispatchError::UnknownWorker(_))
        ));
    }
}
