use serde::{Deserialize, Serialize};

use crate::monitoring::Decision;

/// Success rate above which thresholds are left alone.
pub const MAINTAIN_SUCCESS_RATE: f64 = 0.8;
/// How far ahead of target the run must be before the fleet is tightened.
pub const SURPLUS_TRIGGER: f64 = 0.20;
pub const FLEET_EFFICIENCY_NUDGE: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TuningOutcome {
    InsufficientHistory { available: usize, required: usize },
    Maintain { success_rate: f64, sample_size: usize },
    FlagForAdjustment { success_rate: f64, sample_size: usize },
}

/// Classify the most recent resolved decisions. Only classifies; the threshold itself is an
/// operator decision.
pub fn evaluate_history(resolved: &[Decision], window: usize) -> TuningOutcome {
    let sample: Vec<&Decision> = resolved.iter().filter(|d| d.result.is_some()).collect();
    if window == 0 || sample.len() < window {
        return TuningOutcome::InsufficientHistory {
            available: sample.len(),
            required: window,
        };
    }

    let sample = &sample[sample.len() - window..];
    let successes = sample
        .iter()
        .filter(|d| d.result.as_ref().map_or(false, |r| r.success))
        .count();
    let success_rate = successes as f64 / window as f64;

    if success_rate > MAINTAIN_SUCCESS_RATE {
        TuningOutcome::Maintain {
            success_rate,
            sample_size: window,
        }
    } else {
        TuningOutcome::FlagForAdjustment {
            success_rate,
            sample_size: window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StrategicOutcome {
    OnTrack { cumulative_profit: f64, rolling_target: f64 },
    ExpandCapacity { cumulative_profit: f64, rolling_target: f64, shortfall: f64 },
    Optimize { cumulative_profit: f64, rolling_target: f64, surplus_pct: f64 },
}

/// Compare run profit to the rolling target.
pub fn review_profit(cumulative_profit: f64, rolling_target: f64, capacity_gap_pct: f64) -> StrategicOutcome {
    if rolling_target <= 0.0 {
        return StrategicOutcome::OnTrack {
            cumulative_profit,
            rolling_target,
        };
    }

    let shortfall = rolling_target - cumulative_profit;
    if shortfall / rolling_target > capacity_gap_pct {
        return StrategicOutcome::ExpandCapacity {
            cumulative_profit,
            rolling_target,
            shortfall,
        };
    }

    let surplus_pct = (cumulative_profit - rolling_target) / rolling_target;
    if surplus_pct > SURPLUS_TRIGGER {
        return StrategicOutcome::Optimize {
            cumulative_profit,
            rolling_target,
            surplus_pct,
        };
    }

    StrategicOutcome::OnTrack {
        cumulative_profit,
        rolling_target,
    }
}
