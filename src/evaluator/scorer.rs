use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use tracing::debug;

use crate::fleet::Worker;
use crate::market::Lane;
use crate::sourcing::{Opportunity, Urgency};
use super::risk_analyzer::RiskAnalyzer;
use super::{ProbabilityScore, ScoreBreakdown};

const SCORE_MIN: f64 = 0.0;
const SCORE_MAX: f64 = 100.0;

/// Sub-score weights in basis points of the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringWeights {
    pub market: u32,
    pub worker: u32,
    pub route: u32,
    pub temporal: u32,
    pub competitive: u32,
}

impl ScoringWeights {
    pub const BASIS: u32 = 10_000;

    pub const DEFAULT: ScoringWeights = ScoringWeights {
        market: 2_500,
        worker: 3_000,
        route: 2_000,
        temporal: 1_500,
        competitive: 1_000,
    };

    pub const fn total(&self) -> u32 {
        self.market + self.worker + self.route + self.temporal + self.competitive
    }

    pub fn fraction(bp: u32) -> f64 {
        bp as f64 / Self::BASIS as f64
    }

    pub fn combine(&self, b: &ScoreBreakdown) -> f64 {
        Self::fraction(self.market) * b.market
            + Self::fraction(self.worker) * b.worker
            + Self::fraction(self.route) * b.route
            + Self::fraction(self.temporal) * b.temporal
            + Self::fraction(self.competitive) * b.competitive
    }
}

const _: () = assert!(ScoringWeights::DEFAULT.total() == ScoringWeights::BASIS);

// Market
const RATIO_SCALE: f64 = 50.0;
const VOLATILITY_PENALTY: f64 = 0.3;
const SEASONAL_WEIGHT: f64 = 0.5;

// Worker
const RELIABILITY_WEIGHT: f64 = 0.5;
const SATISFACTION_WEIGHT: f64 = 0.3;
const TENURE_WEIGHT: f64 = 0.2;
const TENURE_POINTS_PER_YEAR: f64 = 10.0;

// Route
const FUEL_BASELINE: f64 = 100.0;
const FUEL_PENALTY: f64 = 2.0;

// Temporal
const TEMPORAL_BASE: f64 = 50.0;
const BUSINESS_HOURS: std::ops::Range<u32> = 8..18;
const BUSINESS_HOURS_BONUS: f64 = 15.0;
const WEEKDAY_BONUS: f64 = 10.0;
const PEAK_SEASON_BONUS: f64 = 10.0;
const HOLIDAY_WINDOW_DAYS: i64 = 3;
const HOLIDAY_PENALTY: f64 = 20.0;
/// (month, day) of the fixed-date shipping holidays.
const HOLIDAYS: [(u32, u32); 6] = [(1, 1), (5, 26), (7, 4), (9, 1), (11, 27), (12, 25)];

// Competitive
const COMPETITIVE_BASE: f64 = 70.0;
const PER_COMPETITOR_PENALTY: f64 = 8.0;
const RATE_ADVANTAGE_CAP: f64 = 20.0;
const PER_DIFFERENTIATOR_BONUS: f64 = 5.0;
const DIFFERENTIATOR_CAP: f64 = 15.0;

// Confidence
const CONFIDENCE_BASE: f64 = 85.0;
const CONFIDENCE_VOLATILITY_PENALTY: f64 = 0.2;
const EXPERIENCE_POINTS_PER_YEAR: f64 = 2.0;
const EXPERIENCE_CAP: f64 = 10.0;
const COMPETITOR_CONFIDENCE_PENALTY: f64 = 2.0;
const COMPETITOR_CONFIDENCE_CAP: f64 = 15.0;
const CONFIDENCE_MIN: f64 = 50.0;
const CONFIDENCE_MAX: f64 = 100.0;

/// Everything beyond the (load, worker) pair that a score depends on.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub lane: &'a Lane,
    /// Demand on the reverse lane when the market tracks it.
    pub backhaul_demand: Option<f64>,
    pub now: DateTime<Utc>,
}

/// Multi-factor probability model for a (load, worker) pair.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: ScoringWeights,
    risk_analyzer: RiskAnalyzer,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringEngine {
    pub fn new() -> Self {
        Self {
            weights: ScoringWeights::DEFAULT,
            risk_analyzer: RiskAnalyzer::new(),
        }
    }

    pub fn score(&self, opportunity: &Opportunity, worker: &Worker, ctx: &ScoringContext<'_>) -> ProbabilityScore {
        // Component scores, each 0-100
        let breakdown = ScoreBreakdown {
            market: market_score(ctx.lane),
            worker: worker_score(worker),
            route: route_score(ctx.lane, ctx.backhaul_demand),
            temporal: temporal_score(opportunity.urgency, ctx.now),
            competitive: competitive_score(opportunity),
        };

        // Weighted blend, then the side analyses
        let overall = clamp_score(self.weights.combine(&breakdown));
        let confidence = confidence(ctx.lane, worker, opportunity);
        let (risks, risk_level) = self.risk_analyzer.analyze(opportunity, worker, ctx.lane);
        let recommendations = self.risk_analyzer.recommend(opportunity, worker, ctx.lane, &breakdown);

        debug!(
            "Scored {} for {}: overall {:.1}, confidence {:.1}",
            opportunity.id, worker.id, overall, confidence
        );

        ProbabilityScore {
            overall,
            confidence,
            breakdown,
            recommendations,
            risks,
            risk_level,
        }
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return SCORE_MIN;
    }
    value.clamp(SCORE_MIN, SCORE_MAX)
}

pub fn market_score(lane: &Lane) -> f64 {
    let ratio_score = (lane.demand_supply_ratio() * RATIO_SCALE).min(SCORE_MAX);
    clamp_score(
        ratio_score - lane.rate_volatility * VOLATILITY_PENALTY + lane.seasonal_influence * SEASONAL_WEIGHT,
    )
}

pub fn worker_score(worker: &Worker) -> f64 {
    let m = &worker.performance_metrics;
    let reliability = 0.7 * m.on_time_rate + 0.3 * m.efficiency_rate;
    let tenure = (worker.experience_years * TENURE_POINTS_PER_YEAR).min(SCORE_MAX);
    clamp_score(
        RELIABILITY_WEIGHT * clamp_score(reliability)
            + SATISFACTION_WEIGHT * clamp_score(m.satisfaction_rate)
            + TENURE_WEIGHT * clamp_score(tenure),
    )
}

pub fn route_score(lane: &Lane, backhaul_demand: Option<f64>) -> f64 {
    let c = &lane.conditions;
    let backhaul = match backhaul_demand {
        Some(reverse) => (reverse + c.backhaul_availability) / 2.0,
        None => c.backhaul_availability,
    };
    let fuel = SCORE_MAX - FUEL_PENALTY * (c.fuel_cost_index - FUEL_BASELINE).max(0.0);

    clamp_score(
        0.30 * clamp_score(lane.demand_level)
            + 0.25 * clamp_score(backhaul)
            + 0.15 * clamp_score(SCORE_MAX - c.weather_risk)
            + 0.15 * clamp_score(SCORE_MAX - c.traffic_congestion)
            + 0.15 * clamp_score(fuel),
    )
}

pub fn temporal_score(urgency: Urgency, now: DateTime<Utc>) -> f64 {
    let mut score = TEMPORAL_BASE;

    // Calendar bonuses
    if BUSINESS_HOURS.contains(&now.hour()) {
        score += BUSINESS_HOURS_BONUS;
    }
    if !matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        score += WEEKDAY_BONUS;
    }
    if (9..=11).contains(&now.month()) {
        score += PEAK_SEASON_BONUS;
    }
    // Urgency
    score += match urgency {
        Urgency::Standard => 0.0,
        Urgency::Expedited => 10.0,
        Urgency::Critical => 15.0,
    };
    if near_holiday(now.date_naive()) {
        score -= HOLIDAY_PENALTY;
    }

    clamp_score(score)
}

fn near_holiday(date: NaiveDate) -> bool {
    (date.year() - 1..=date.year() + 1).any(|year| {
        HOLIDAYS.iter().any(|&(month, day)| {
            NaiveDate::from_ymd_opt(year, month, day)
                .map(|holiday| (date - holiday).num_days().abs() <= HOLIDAY_WINDOW_DAYS)
                .unwrap_or(false)
        })
    })
}

pub fn competitive_score(opportunity: &Opportunity) -> f64 {
    let comp = &opportunity.competition;
    let mut score = COMPETITIVE_BASE - PER_COMPETITOR_PENALTY * comp.active_competitors as f64;

    // Paying above market helps, up to a cap
    if comp.market_rate > 0.0 && opportunity.rate > comp.market_rate {
        let advantage = (opportunity.rate / comp.market_rate - 1.0) * 100.0;
        score += advantage.min(RATE_ADVANTAGE_CAP);
    }
    score += (PER_DIFFERENTIATOR_BONUS * comp.differentiators as f64).min(DIFFERENTIATOR_CAP);

    clamp_score(score)
}

pub fn confidence(lane: &Lane, worker: &Worker, opportunity: &Opportunity) -> f64 {
    let experience = (worker.experience_years.max(0.0) * EXPERIENCE_POINTS_PER_YEAR).min(EXPERIENCE_CAP);
    let competitors = (opportunity.competition.active_competitors as f64 * COMPETITOR_CONFIDENCE_PENALTY)
        .min(COMPETITOR_CONFIDENCE_CAP);
    let raw = CONFIDENCE_BASE - lane.rate_volatility * CONFIDENCE_VOLATILITY_PENALTY + experience - competitors;
    if raw.is_nan() {
        return CONFIDENCE_MIN;
    }
    raw.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
}
