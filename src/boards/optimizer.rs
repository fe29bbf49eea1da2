use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::sourcing::LoadFilter;

const RATE_RATIO_CAP: f64 = 2.0;
const VOLUME_REFERENCE: f64 = 10_000.0;
const VOLUME_CAP: f64 = 1.0;
const ASSUMED_AVG_DISTANCE: f64 = 500.0;

/// Board factor weights in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardWeights {
    pub market_share: u32,
    pub rate: u32,
    pub volume: u32,
    pub compliance: u32,
    pub language: u32,
    pub timezone: u32,
}

impl BoardWeights {
    pub const BASIS: u32 = 10_000;

    pub const DEFAULT: BoardWeights = BoardWeights {
        market_share: 2_500,
        rate: 2_000,
        volume: 2_000,
        compliance: 1_500,
        language: 1_000,
        timezone: 1_000,
    };

    pub const fn total(&self) -> u32 {
        self.market_share + self.rate + self.volume + self.compliance + self.language + self.timezone
    }

    fn apply(&self, f: &FactorBreakdown) -> f64 {
        let w = |bp: u32| bp as f64 / Self::BASIS as f64;
        w(self.market_share) * f.market_share
            + w(self.rate) * f.rate_ratio
            + w(self.volume) * f.volume
            + w(self.compliance) * f.compliance
            + w(self.language) * f.language
            + w(self.timezone) * f.timezone
    }
}

const _: () = assert!(BoardWeights::DEFAULT.total() == BoardWeights::BASIS);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CostStructure {
    Free,
    Subscription { monthly_fee: f64 },
    PerLoad { fee: f64 },
}

impl CostStructure {
    pub fn monthly_cost(&self, loads_per_day: f64) -> f64 {
        match self {
            CostStructure::Free => 0.0,
            CostStructure::Subscription { monthly_fee } => *monthly_fee,
            CostStructure::PerLoad { fee } => fee * loads_per_day * 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalBoard {
    pub id: String,
    pub name: String,
    pub region: String,
    pub market_share_pct: f64,
    pub avg_rate_per_distance: f64,
    pub load_volume_per_day: f64,
    pub compliance_tags: BTreeSet<String>,
    pub languages: BTreeSet<String>,
    pub timezone_offset_hours: i32,
    pub cost_structure: CostStructure,
    pub active: bool,
}

/// What a region expects from its boards, and how often to re-rank them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionProfile {
    pub region: String,
    pub required_compliance: BTreeSet<String>,
    pub languages: BTreeSet<String>,
    pub timezone_offset_hours: i32,
    pub rate_floor_per_distance: f64,
    pub poll_interval_secs: u64,
    /// Board ids switched on for this region; `None` means every active board.
    pub activated_boards: Option<BTreeSet<String>>,
    pub filter: LoadFilter,
}

impl RegionProfile {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub market_share: f64,
    pub rate_ratio: f64,
    pub volume: f64,
    pub compliance: f64,
    pub language: f64,
    pub timezone: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardOptimization {
    pub board_id: String,
    pub region: String,
    pub score: f64,
    pub factor_breakdown: FactorBreakdown,
    pub estimated_loads_per_day: f64,
    pub projected_revenue: f64,
    pub monthly_cost: f64,
}

/// Ranks freight-source boards per region. Holds reference data only.
#[derive(Debug, Clone, Default)]
pub struct BoardOptimizer {
    boards: Vec<RegionalBoard>,
    profiles: BTreeMap<String, RegionProfile>,
}

pub fn normalize_region(region: &str) -> String {
    region.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

impl BoardOptimizer {
    pub fn new(boards: Vec<RegionalBoard>, profiles: Vec<RegionProfile>) -> Self {
        Self {
            boards: boards
                .into_iter()
                .map(|mut b| {
                    b.region = normalize_region(&b.region);
                    b
                })
                .collect(),
            profiles: profiles
                .into_iter()
                .map(|mut p| {
                    p.region = normalize_region(&p.region);
                    (p.region.clone(), p)
                })
                .collect(),
        }
    }

    pub fn profile(&self, region: &str) -> Option<&RegionProfile> {
        self.profiles.get(&normalize_region(region))
    }

    pub fn profile_mut(&mut self, region: &str) -> Option<&mut RegionProfile> {
        self.profiles.get_mut(&normalize_region(region))
    }

    pub fn regions(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn board(&self, board_id: &str) -> Option<&RegionalBoard> {
        self.boards.iter().find(|b| b.id == board_id)
    }

    pub fn active_boards(&self, region: &str) -> Vec<&RegionalBoard> {
        let region = normalize_region(region);
        let activated = self.profiles.get(&region).and_then(|p| p.activated_boards.as_ref());
        self.boards
            .iter()
            .filter(|b| b.region == region && b.active)
            .filter(|b| activated.map_or(true, |ids| ids.contains(&b.id)))
            .collect()
    }

    /// Score every active board in `region`, best first. Ties go to the lower board id.
    pub fn optimize(&self, region: &str) -> Result<Vec<BoardOptimization>> {
        let key = normalize_region(region);
        let profile = self
            .profiles
            .get(&key)
            .ok_or_else(|| DispatchError::RegionNotConfigured(region.to_string()))?;

        // Only boards that serve this region
        let boards = self.active_boards(&key);
        if boards.is_empty() {
            return Err(DispatchError::RegionNotConfigured(region.to_string()));
        }

        let weights = BoardWeights::DEFAULT;
        let mut ranked: Vec<BoardOptimization> = boards
            .into_iter()
            .map(|board| evaluate_board(board, profile, &weights))
            .collect();

        // Best first, ties by id
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.board_id.cmp(&b.board_id))
        });

        if let Some(top) = ranked.first() {
            info!("Region {}: {} boards ranked, top {} ({:.3})", key, ranked.len(), top.board_id, top.score);
        }
        Ok(ranked)
    }
}

fn overlap(offered: &BTreeSet<String>, required: &BTreeSet<String>) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let matched = required.iter().filter(|tag| offered.contains(*tag)).count();
    matched as f64 / required.len() as f64
}

fn timezone_alignment(board_offset: i32, region_offset: i32) -> f64 {
    match (board_offset - region_offset).abs() {
        0..=1 => 1.0,
        2..=3 => 0.5,
        _ => 0.0,
    }
}

fn evaluate_board(board: &RegionalBoard, profile: &RegionProfile, weights: &BoardWeights) -> BoardOptimization {
    let rate_ratio = if profile.rate_floor_per_distance > 0.0 {
        (board.avg_rate_per_distance / profile.rate_floor_per_distance).min(RATE_RATIO_CAP)
    } else {
        RATE_RATIO_CAP
    };

    let factors = FactorBreakdown {
        market_share: (board.market_share_pct / 100.0).clamp(0.0, 1.0),
        rate_ratio: rate_ratio.max(0.0),
        volume: (board.load_volume_per_day / VOLUME_REFERENCE).clamp(0.0, VOLUME_CAP),
        compliance: overlap(&board.compliance_tags, &profile.required_compliance),
        language: overlap(&board.languages, &profile.languages),
        timezone: timezone_alignment(board.timezone_offset_hours, profile.timezone_offset_hours),
    };

    let estimated_loads_per_day = board.load_volume_per_day * factors.market_share * factors.compliance;
    let projected_revenue = estimated_loads_per_day * board.avg_rate_per_distance * ASSUMED_AVG_DISTANCE;
    let score = weights.apply(&factors);

    debug!("Board {} scored {:.3}", board.id, score);

    BoardOptimization {
        board_id: board.id.clone(),
        region: profile.region.clone(),
        score,
        factor_breakdown: factors,
        estimated_loads_per_day,
        projected_revenue,
        monthly_cost: board.cost_structure.monthly_cost(estimated_loads_per_day),
    }
}
