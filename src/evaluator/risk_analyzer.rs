use tracing::debug;

use crate::fleet::Worker;
use crate::market::Lane;
use crate::sourcing::{Opportunity, Urgency};
use super::{Recommendations, RiskFactor, RiskLevel, ScoreBreakdown};

const HIGH_VOLATILITY: f64 = 60.0;
const ELEVATED_VOLATILITY: f64 = 35.0;
const THIN_MARGIN_PCT: f64 = 10.0;
const CROWDED_MARKET: u32 = 5;
const SEVERE_WEATHER: f64 = 50.0;
const LONG_HAUL_MILES: f64 = 1_000.0;

const TIGHT_MARKET_RATIO: f64 = 1.5;
const LOOSE_MARKET_RATIO: f64 = 0.8;
const RATE_STEP: f64 = 0.05;

#[derive(Debug, Clone, Default)]
pub struct RiskAnalyzer;

impl RiskAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Named risks with their mitigations, plus the aggregate level.
    pub fn analyze(&self, opportunity: &Opportunity, worker: &Worker, lane: &Lane) -> (Vec<RiskFactor>, RiskLevel) {
        let mut risks = Vec::new();

        if lane.rate_volatility > HIGH_VOLATILITY {
            risks.push(risk(
                "rate volatility",
                RiskLevel::High,
                "Lock the rate with the shipper before dispatch",
            ));
        } else if lane.rate_volatility > ELEVATED_VOLATILITY {
            risks.push(risk(
                "rate volatility",
                RiskLevel::Medium,
                "Re-quote if the load is not covered within the hour",
            ));
        }

        if opportunity.profitability.margin_pct < THIN_MARGIN_PCT {
            risks.push(risk(
                "thin margin",
                if opportunity.profitability.margin_pct < 0.0 { RiskLevel::High } else { RiskLevel::Medium },
                "Negotiate accessorials or decline",
            ));
        }

        if opportunity.competition.active_competitors > CROWDED_MARKET {
            risks.push(risk(
                "crowded market",
                RiskLevel::Medium,
                "Respond fast and lead with service differentiators",
            ));
        }

        if lane.conditions.weather_risk > SEVERE_WEATHER {
            risks.push(risk(
                "weather exposure",
                RiskLevel::Medium,
                "Build buffer time into the appointment window",
            ));
        }

        if opportunity.hazardous {
            risks.push(risk(
                "hazardous cargo",
                RiskLevel::Medium,
                "Verify placards and hazmat endorsement before pickup",
            ));
        }

        if opportunity.urgency == Urgency::Critical && worker.performance_metrics.on_time_rate < 90.0 {
            risks.push(risk(
                "service failure",
                RiskLevel::High,
                "Assign a dispatcher to track the load to delivery",
            ));
        }

        if opportunity.distance > LONG_HAUL_MILES {
            risks.push(risk(
                "hours of service",
                RiskLevel::Low,
                "Plan the rest stop before departure",
            ));
        }

        let level = aggregate(&risks);
        debug!("Risk for {}: {} ({} factors)", opportunity.id, level, risks.len());
        (risks, level)
    }

    pub fn recommend(
        &self,
        opportunity: &Opportunity,
        worker: &Worker,
        lane: &Lane,
        breakdown: &ScoreBreakdown,
    ) -> Recommendations {
        let ratio = lane.demand_supply_ratio();
        let rate_adjustment_pct = if ratio > TIGHT_MARKET_RATIO {
            RATE_STEP
        } else if ratio < LOOSE_MARKET_RATIO {
            -RATE_STEP
        } else {
            0.0
        };

        let timing = if breakdown.temporal < 50.0 {
            "Post during weekday business hours for better coverage".to_string()
        } else if opportunity.urgency != Urgency::Standard {
            "Book now; the pickup window is short".to_string()
        } else {
            "Timing is favorable".to_string()
        };

        let metrics = &worker.performance_metrics;
        let mut profile_improvements = Vec::new();
        if metrics.on_time_rate < 90.0 {
            profile_improvements.push("Raise on-time delivery above 90%".to_string());
        }
        if metrics.satisfaction_rate < 85.0 {
            profile_improvements.push("Follow up with shippers after delivery".to_string());
        }
        if metrics.utilization_rate < 75.0 {
            profile_improvements.push("Chain loads to reduce idle time".to_string());
        }

        let mut competitive_advantages = Vec::new();
        let comp = &opportunity.competition;
        if comp.market_rate > 0.0 && opportunity.rate < comp.market_rate {
            competitive_advantages.push("Quote is below market; emphasize price".to_string());
        }
        if comp.differentiators > 0 {
            competitive_advantages.push(format!("Lead with {} service differentiator(s)", comp.differentiators));
        }
        if metrics.on_time_rate >= 95.0 {
            competitive_advantages.push("Highlight the driver's on-time record".to_string());
        }

        Recommendations {
            rate_adjustment_pct,
            timing,
            profile_improvements,
            competitive_advantages,
        }
    }
}

fn risk(name: &str, severity: RiskLevel, mitigation: &str) -> RiskFactor {
    RiskFactor {
        name: name.to_string(),
        severity,
        mitigation: mitigation.to_string(),
    }
}

/// Any high risk, or three or more medium ones, makes the load high risk.
fn aggregate(risks: &[RiskFactor]) -> RiskLevel {
    let highs = risks.iter().filter(|r| r.severity == RiskLevel::High).count();
    let mediums = risks.iter().filter(|r| r.severity == RiskLevel::Medium).count();
    match (highs, mediums) {
        (h, _) if h > 0 => RiskLevel::High,
        (_, m) if m >= 3 => RiskLevel::High,
        (_, m) if m > 0 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}
