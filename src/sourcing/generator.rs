use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::market::Lane;
use super::opportunity::{Competition, CostModel, EquipmentClass, LoadFilter, Opportunity, Urgency};

const MIN_BATCH: usize = 3;
const MAX_BATCH: usize = 5;
const RATE_VARIATION_MIN: f64 = 0.8;
const RATE_VARIATION_MAX: f64 = 1.2;
const MAX_COMPETITORS: u32 = 8;
const MAX_DIFFERENTIATORS: u32 = 3;

const FALLBACK_SOURCES: [&str; 4] = ["DAT", "Truckstop", "123Loadboard", "Direct"];

/// (commodity, hazardous)
const COMMODITIES: [(&str, bool); 8] = [
    ("Consumer electronics", false),
    ("Frozen produce", false),
    ("Building materials", false),
    ("Auto parts", false),
    ("Paper goods", false),
    ("Industrial chemicals", true),
    ("Beverages", false),
    ("Lithium batteries", true),
];

/// Turns lane state into candidate loads.
pub struct OpportunityGenerator {
    cost_model: CostModel,
    source_tags: Vec<String>,
    next_seq: u64,
}

impl OpportunityGenerator {
    pub fn new(cost_model: CostModel) -> Self {
        Self {
            cost_model,
            source_tags: Vec::new(),
            next_seq: 1,
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    /// Source feeds to attribute new loads to, usually the active region's top boards.
    pub fn set_source_tags(&mut self, tags: Vec<String>) {
        self.source_tags = tags;
    }

    /// Produce 3 to 5 loads from lanes sampled with replacement.
    pub fn generate<R: Rng + ?Sized>(
        &mut self,
        lanes: &[Lane],
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<Vec<Opportunity>> {
        if lanes.is_empty() {
            return Err(DispatchError::NoLanes);
        }

        let count = rng.gen_range(MIN_BATCH..=MAX_BATCH);
        let mut batch = Vec::with_capacity(count);

        for _ in 0..count {
            let lane = lanes.choose(rng).ok_or(DispatchError::NoLanes)?;
            batch.push(self.from_lane(lane, rng, now));
        }

        debug!("Generated {} candidate loads", batch.len());
        Ok(batch)
    }

    /// Generate, then drop anything the region's filter rejects.
    pub fn generate_filtered<R: Rng + ?Sized>(
        &mut self,
        lanes: &[Lane],
        filter: &LoadFilter,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<Vec<Opportunity>> {
        let batch = self.generate(lanes, rng, now)?;
        let total = batch.len();
        let accepted: Vec<Opportunity> = batch.into_iter().filter(|o| filter.accepts(o)).collect();
        if accepted.len() < total {
            debug!("Region filter dropped {} of {} loads", total - accepted.len(), total);
        }
        Ok(accepted)
    }

    fn from_lane<R: Rng + ?Sized>(&mut self, lane: &Lane, rng: &mut R, now: DateTime<Utc>) -> Opportunity {
        // Offered rate swings around the lane average
        let variation = rng.gen_range(RATE_VARIATION_MIN..=RATE_VARIATION_MAX);
        let market_rate = lane.average_rate * lane.distance_miles;
        let rate = market_rate * variation;

        let equipment_class = *EquipmentClass::ALL.choose(rng).unwrap_or(&EquipmentClass::DryVan);
        let urgency = *Urgency::ALL.choose(rng).unwrap_or(&Urgency::Standard);
        let (commodity, hazardous) = *COMMODITIES.choose(rng).unwrap_or(&COMMODITIES[0]);
        // Prefer the active region's boards as the source
        let source_tag = match self.source_tags.choose(rng) {
            Some(tag) => tag.clone(),
            None => FALLBACK_SOURCES.choose(rng).unwrap_or(&FALLBACK_SOURCES[0]).to_string(),
        };

        let id = format!("load-{:06}", self.next_seq);
        self.next_seq += 1;

        Opportunity {
            id,
            source_tag,
            lane: lane.key(),
            rate,
            distance: lane.distance_miles,
            equipment_class,
            urgency,
            commodity: commodity.to_string(),
            hazardous,
            competition: Competition {
                active_competitors: rng.gen_range(0..=MAX_COMPETITORS),
                differentiators: rng.gen_range(0..=MAX_DIFFERENTIATORS),
                market_rate,
            },
            profitability: self.cost_model.estimate(rate, lane.distance_miles),
            created_at: now,
        }
    }
}
