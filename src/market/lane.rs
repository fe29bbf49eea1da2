use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{DispatchError, Result};

const LEVEL_MIN: f64 = 0.0;
const LEVEL_MAX: f64 = 100.0;
const SEASONAL_LIMIT: f64 = 50.0;

const DEMAND_STEP: f64 = 5.0;
const SUPPLY_STEP: f64 = 5.0;
const VOLATILITY_STEP: f64 = 3.0;
const MAX_RATE_DRIFT: f64 = 0.02;
const RATE_FLOOR: f64 = 0.50;

/// Month (1-12) to seasonal influence. Produce season and Q4 retail push are the peaks.
const SEASONAL_TABLE: [f64; 12] = [
    -15.0, -10.0, 0.0, 5.0, 10.0, 20.0, 15.0, 10.0, 20.0, 30.0, 35.0, 10.0,
];

/// Seasonal influence on freight demand for a calendar month.
///
/// Months outside 1..=12 have no influence.
pub fn seasonal_influence(month: u32) -> f64 {
    match month {
        1..=12 => SEASONAL_TABLE[(month - 1) as usize],
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteConditions {
    pub backhaul_availability: f64,
    pub weather_risk: f64,
    pub traffic_congestion: f64,
    /// 100 is the baseline diesel cost.
    pub fuel_cost_index: f64,
}

impl Default for RouteConditions {
    fn default() -> Self {
        Self {
            backhaul_availability: 50.0,
            weather_risk: 20.0,
            traffic_congestion: 30.0,
            fuel_cost_index: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub origin: String,
    pub destination: String,
    pub demand_level: f64,
    pub supply_level: f64,
    pub rate_volatility: f64,
    pub seasonal_influence: f64,
    /// Average linehaul rate per mile.
    pub average_rate: f64,
    pub distance_miles: f64,
    pub conditions: RouteConditions,
    pub last_updated: DateTime<Utc>,
}

impl Lane {
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        distance_miles: f64,
        average_rate: f64,
    ) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
            demand_level: 50.0,
            supply_level: 50.0,
            rate_volatility: 20.0,
            seasonal_influence: 0.0,
            average_rate,
            distance_miles,
            conditions: RouteConditions::default(),
            last_updated: Utc::now(),
        }
        .clamped()
    }

    pub fn with_levels(mut self, demand: f64, supply: f64, volatility: f64) -> Self {
        self.demand_level = demand;
        self.supply_level = supply;
        self.rate_volatility = volatility;
        self.clamped()
    }

    pub fn with_conditions(mut self, conditions: RouteConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn key(&self) -> String {
        lane_key(&self.origin, &self.destination)
    }

    pub fn reverse_key(&self) -> String {
        lane_key(&self.destination, &self.origin)
    }

    /// Demand over supply; supply is floored at 1 so an empty market does not divide by zero.
    pub fn demand_supply_ratio(&self) -> f64 {
        self.demand_level / self.supply_level.max(1.0)
    }

    fn clamped(mut self) -> Self {
        self.clamp_levels();
        self
    }

    fn clamp_levels(&mut self) {
        self.demand_level = self.demand_level.clamp(LEVEL_MIN, LEVEL_MAX);
        self.supply_level = self.supply_level.clamp(LEVEL_MIN, LEVEL_MAX);
        self.rate_volatility = self.rate_volatility.clamp(LEVEL_MIN, LEVEL_MAX);
        self.seasonal_influence = self.seasonal_influence.clamp(-SEASONAL_LIMIT, SEASONAL_LIMIT);
    }

    fn drift<R: Rng + ?Sized>(&mut self, rng: &mut R, now: DateTime<Utc>) {
        self.demand_level += rng.gen_range(-DEMAND_STEP..=DEMAND_STEP);
        self.supply_level += rng.gen_range(-SUPPLY_STEP..=SUPPLY_STEP);
        self.rate_volatility += rng.gen_range(-VOLATILITY_STEP..=VOLATILITY_STEP);
        self.seasonal_influence = seasonal_influence(now.month());
        self.clamp_levels();

        // Tight markets push rates up, loose markets pull them down.
        let imbalance = (self.demand_level - self.supply_level) / LEVEL_MAX;
        let drift = (imbalance * MAX_RATE_DRIFT).clamp(-MAX_RATE_DRIFT, MAX_RATE_DRIFT);
        self.average_rate = (self.average_rate * (1.0 + drift)).max(RATE_FLOOR);
        self.last_updated = now;
    }
}

pub fn lane_key(origin: &str, destination: &str) -> String {
    format!("{}→{}", origin, destination)
}

/// Per-lane market state. Lanes only evolve; they are never removed.
#[derive(Debug, Clone, Default)]
pub struct MarketModel {
    lanes: BTreeMap<String, Lane>,
}

impl MarketModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lanes(lanes: impl IntoIterator<Item = Lane>) -> Self {
        let mut model = Self::new();
        for lane in lanes {
            model.upsert_lane(lane);
        }
        model
    }

    pub fn upsert_lane(&mut self, lane: Lane) {
        self.lanes.insert(lane.key(), lane.clamped());
    }

    pub fn lane(&self, key: &str) -> Option<&Lane> {
        self.lanes.get(key)
    }

    pub fn lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.values()
    }

    pub fn snapshot(&self) -> Vec<Lane> {
        self.lanes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Demand on the return leg, if the reverse lane is tracked.
    pub fn backhaul_demand(&self, lane: &Lane) -> Option<f64> {
        self.lanes.get(&lane.reverse_key()).map(|l| l.demand_level)
    }

    /// Advance every lane by one bounded random-walk step.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R, now: DateTime<Utc>) -> Result<usize> {
        if self.lanes.is_empty() {
            return Err(DispatchError::NoLanes);
        }

        for lane in self.lanes.values_mut() {
            lane.drift(rng, now);
        }

        debug!("Market tick updated {} lanes", self.lanes.len());
        Ok(self.lanes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> MarketModel {
        MarketModel::with_lanes(vec![
            Lane::new("Chicago", "Atlanta", 716.0, 2.4).with_levels(99.0, 1.0, 99.0),
            Lane::new("Atlanta", "Chicago", 716.0, 2.1).with_levels(1.0, 99.0, 1.0),
            Lane::new("Dallas", "Houston", 239.0, 2.9),
        ])
    }

    #[test]
    fn levels_stay_in_range_after_many_ticks() {
        let mut market = model();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            market.tick(&mut rng, Utc::now()).unwrap();
        }
        for lane in market.lanes() {
            assert!((0.0..=100.0).contains(&lane.demand_level));
            assert!((0.0..=100.0).contains(&lane.supply_level));
            assert!((0.0..=100.0).contains(&lane.rate_volatility));
            assert!((-50.0..=50.0).contains(&lane.seasonal_influence));
            assert!(lane.average_rate >= RATE_FLOOR);
        }
    }

    #[test]
    fn tick_is_deterministic_for_a_seed() {
        let now = Utc::now();
        let mut a = model();
        let mut b = model();
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        for _ in 0..25 {
            a.tick(&mut rng_a, now).unwrap();
            b.tick(&mut rng_b, now).unwrap();
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn constructor_clamps_out_of_range_levels() {
        let lane = Lane::new("A", "B", 100.0, 2.0).with_levels(140.0, -3.0, 250.0);
        assert_eq!(lane.demand_level, 100.0);
        assert_eq!(lane.supply_level, 0.0);
        assert_eq!(lane.rate_volatility, 100.0);
    }

    #[test]
    fn tick_without_lanes_is_a_configuration_error() {
        let mut market = MarketModel::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(market.tick(&mut rng, Utc::now()), Err(DispatchError::NoLanes)));
    }

    #[test]
    fn seasonal_table_is_bounded() {
        for month in 1..=12 {
            assert!(seasonal_influence(month).abs() <= SEASONAL_LIMIT);
        }
        assert_eq!(seasonal_influence(13), 0.0);
        assert_eq!(seasonal_influence(11), 35.0);
    }

    #[test]
    fn backhaul_demand_reads_reverse_lane() {
        let market = model();
        let lane = market.lane(&lane_key("Chicago", "Atlanta")).unwrap();
        assert_eq!(market.backhaul_demand(lane), Some(1.0));
        let lane = market.lane(&lane_key("Dallas", "Houston")).unwrap();
        assert_eq!(market.backhaul_demand(lane), None);
    }
}
