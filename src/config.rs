use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::boards::catalog::default_profiles;
use crate::boards::RegionProfile;
use crate::sourcing::EquipmentClass;

/// Per-region overrides read from `DISPATCH_REGION_<REGION>_*`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionOverride {
    pub region: String,
    pub boards: Option<BTreeSet<String>>,
    pub equipment: Option<BTreeSet<EquipmentClass>>,
    pub min_rate_per_mile: Option<f64>,
    pub max_distance: Option<f64>,
}

impl RegionOverride {
    pub fn apply(&self, profile: &mut RegionProfile) {
        if let Some(boards) = &self.boards {
            profile.activated_boards = Some(boards.clone());
        }
        if let Some(equipment) = &self.equipment {
            profile.filter.equipment = Some(equipment.clone());
        }
        if self.min_rate_per_mile.is_some() {
            profile.filter.min_rate_per_mile = self.min_rate_per_mile;
        }
        if self.max_distance.is_some() {
            profile.filter.max_distance = self.max_distance;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Decision gates
    pub auto_threshold: f64,
    pub min_margin_pct: f64,

    // Strategic targets
    pub profit_target: f64,
    pub capacity_gap_pct: f64,

    // Loop cadences
    pub market_tick_interval_secs: u64,
    pub decision_tick_interval_secs: u64,
    pub strategic_interval_secs: u64,

    // Self-tuning
    pub tuning_window: usize,
    pub tuning_every_ticks: u64,
    pub opportunity_ttl_ticks: u64,

    // Scoring oracle
    pub oracle_url: Option<String>,
    pub oracle_api_key: Option<String>,
    pub oracle_timeout_ms: u64,

    // Per-step budget for route planning, paperwork and notifications
    pub executor_timeout_ms: u64,

    pub rng_seed: Option<u64>,
    pub decision_log_dir: Option<PathBuf>,
    pub default_region: String,
    pub region_overrides: Vec<RegionOverride>,

    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_threshold: 65.0,
            min_margin_pct: 15.0,
            profit_target: 25_000.0,
            capacity_gap_pct: 0.10,
            market_tick_interval_secs: 30,
            decision_tick_interval_secs: 10,
            strategic_interval_secs: 300,
            tuning_window: 10,
            tuning_every_ticks: 6,
            opportunity_ttl_ticks: 3,
            oracle_url: None,
            oracle_api_key: None,
            oracle_timeout_ms: 2_000,
            executor_timeout_ms: 5_000,
            rng_seed: None,
            decision_log_dir: None,
            default_region: "north_america".to_string(),
            region_overrides: Vec::new(),
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

impl EngineConfig {
    pub fn market_tick_interval(&self) -> Duration {
        Duration::from_secs(self.market_tick_interval_secs)
    }

    pub fn decision_tick_interval(&self) -> Duration {
        Duration::from_secs(self.decision_tick_interval_secs)
    }

    pub fn strategic_interval(&self) -> Duration {
        Duration::from_secs(self.strategic_interval_secs)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }

    /// Region profiles with any environment overrides applied.
    pub fn region_profiles(&self) -> Vec<RegionProfile> {
        let mut profiles = default_profiles();
        for profile in profiles.iter_mut() {
            let region = profile.region.clone();
            for region_override in self.region_overrides.iter().filter(|o| o.region == region) {
                region_override.apply(profile);
            }
        }
        profiles
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.auto_threshold) {
            bail!("auto threshold {} must be within 0..=100", self.auto_threshold);
        }
        if !(-100.0..100.0).contains(&self.min_margin_pct) {
            bail!("minimum margin {}% is not a usable percentage", self.min_margin_pct);
        }
        if self.profit_target <= 0.0 {
            bail!("profit target must be positive");
        }
        if !(0.0..1.0).contains(&self.capacity_gap_pct) {
            bail!("capacity gap {} must be a fraction below 1", self.capacity_gap_pct);
        }
        if self.market_tick_interval_secs == 0 || self.decision_tick_interval_secs == 0 || self.strategic_interval_secs == 0 {
            bail!("tick intervals must be at least one second");
        }
        if self.tuning_window == 0 || self.tuning_every_ticks == 0 {
            bail!("tuning window and cadence must be positive");
        }
        if self.opportunity_ttl_ticks == 0 {
            bail!("opportunity ttl must be at least one tick");
        }
        if self.oracle_timeout_ms == 0 || self.executor_timeout_ms == 0 {
            bail!("oracle and executor timeouts must be positive");
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{}: {}", key, e)),
        None => Ok(None),
    }
}

fn parse_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Build the configuration from an arbitrary variable source.
pub fn load_config_from(lookup: impl Fn(&str) -> Option<String>) -> Result<EngineConfig> {
    let mut config = EngineConfig::default();

    // Thresholds and targets
    if let Some(v) = parse_var(&lookup, "DISPATCH_AUTO_THRESHOLD")? {
        config.auto_threshold = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_MIN_MARGIN_PCT")? {
        config.min_margin_pct = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_PROFIT_TARGET")? {
        config.profit_target = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_CAPACITY_GAP_PCT")? {
        config.capacity_gap_pct = v;
    }
    // Scheduling
    if let Some(v) = parse_var(&lookup, "DISPATCH_MARKET_INTERVAL_SECS")? {
        config.market_tick_interval_secs = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_DECISION_INTERVAL_SECS")? {
        config.decision_tick_interval_secs = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_STRATEGIC_INTERVAL_SECS")? {
        config.strategic_interval_secs = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_TUNING_WINDOW")? {
        config.tuning_window = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_TUNING_EVERY_TICKS")? {
        config.tuning_every_ticks = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_OPPORTUNITY_TTL_TICKS")? {
        config.opportunity_ttl_ticks = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_ORACLE_TIMEOUT_MS")? {
        config.oracle_timeout_ms = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_EXECUTOR_TIMEOUT_MS")? {
        config.executor_timeout_ms = v;
    }
    if let Some(v) = parse_var(&lookup, "DISPATCH_RNG_SEED")? {
        config.rng_seed = Some(v);
    }

    // Collaborators
    if let Some(url) = lookup("DISPATCH_ORACLE_URL") {
        config.oracle_url = Some(url);
    }
    if let Some(key) = lookup("DISPATCH_ORACLE_API_KEY") {
        config.oracle_api_key = Some(key);
    }
    if let Some(dir) = lookup("DISPATCH_DECISION_LOG_DIR") {
        config.decision_log_dir = Some(PathBuf::from(dir));
    }
    if let Some(region) = lookup("DISPATCH_DEFAULT_REGION") {
        config.default_region = region.trim().to_ascii_lowercase();
    }
    if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
        config.telegram_bot_token = Some(token);
    }
    if let Some(chat) = lookup("TELEGRAM_CHAT_ID") {
        config.telegram_chat_id = Some(chat);
    }

    // Per-region overrides
    for profile in default_profiles() {
        let prefix = format!("DISPATCH_REGION_{}", profile.region.to_ascii_uppercase());
        let mut region_override = RegionOverride {
            region: profile.region.clone(),
            ..RegionOverride::default()
        };

        if let Some(raw) = lookup(&format!("{}_BOARDS", prefix)) {
            region_override.boards = Some(parse_list(&raw));
        }
        if let Some(raw) = lookup(&format!("{}_EQUIPMENT", prefix)) {
            let equipment = parse_list(&raw)
                .iter()
                .map(|name| {
                    EquipmentClass::parse(name).ok_or_else(|| anyhow!("{}_EQUIPMENT: unknown equipment '{}'", prefix, name))
                })
                .collect::<Result<BTreeSet<_>>>()?;
            region_override.equipment = Some(equipment);
        }
        region_override.min_rate_per_mile = parse_var(&lookup, &format!("{}_MIN_RATE", prefix))?;
        region_override.max_distance = parse_var(&lookup, &format!("{}_MAX_DISTANCE", prefix))?;

        if region_override != (RegionOverride { region: profile.region.clone(), ..RegionOverride::default() }) {
            config.region_overrides.push(region_override);
        }
    }

    config.validate().context("invalid dispatch configuration")?;
    Ok(config)
}

pub async fn load_config() -> Result<EngineConfig> {
    let config = load_config_from(|key| env::var(key).ok())?;
    info!(
        "Loaded configuration: threshold {}, min margin {}%, region {}",
        config.auto_threshold, config.min_margin_pct, config.default_region
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = load_config_from(vars(&[])).unwrap();
        assert_eq!(config.auto_threshold, 65.0);
        assert_eq!(config.min_margin_pct, 15.0);
        assert!(config.region_overrides.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load_config_from(vars(&[
            ("DISPATCH_AUTO_THRESHOLD", "70"),
            ("DISPATCH_RNG_SEED", "99"),
            ("DISPATCH_ORACLE_URL", "http://oracle.local/evaluate"),
            ("DISPATCH_REGION_NORTH_AMERICA_BOARDS", "dat, truckstop"),
            ("DISPATCH_REGION_NORTH_AMERICA_EQUIPMENT", "dry_van,reefer"),
            ("DISPATCH_REGION_NORTH_AMERICA_MAX_DISTANCE", "800"),
        ]))
        .unwrap();

        assert_eq!(config.auto_threshold, 70.0);
        assert_eq!(config.rng_seed, Some(99));
        assert!(config.oracle_url.is_some());

        let profiles = config.region_profiles();
        let na = profiles.iter().find(|p| p.region == "north_america").unwrap();
        assert_eq!(na.activated_boards.as_ref().unwrap().len(), 2);
        assert_eq!(na.filter.max_distance, Some(800.0));
        assert!(na.filter.equipment.as_ref().unwrap().contains(&EquipmentClass::Reefer));
    }

    #[test]
    fn overrides_only_touch_their_own_region() {
        let config = EngineConfig {
            region_overrides: vec![
                RegionOverride {
                    region: "europe".to_string(),
                    max_distance: Some(400.0),
                    ..RegionOverride::default()
                },
                RegionOverride {
                    region: "europe".to_string(),
                    min_rate_per_mile: Some(1.7),
                    ..RegionOverride::default()
                },
            ],
            ..EngineConfig::default()
        };

        let profiles = config.region_profiles();
        let europe = profiles.iter().find(|p| p.region == "europe").unwrap();
        assert_eq!(europe.filter.max_distance, Some(400.0));
        assert_eq!(europe.filter.min_rate_per_mile, Some(1.7));

        let na = profiles.iter().find(|p| p.region == "north_america").unwrap();
        assert_eq!(na.filter, crate::sourcing::LoadFilter::default());
    }

    #[test]
    fn malformed_values_fail_fast() {
        assert!(load_config_from(vars(&[("DISPATCH_AUTO_THRESHOLD", "high")])).is_err());
        assert!(load_config_from(vars(&[("DISPATCH_AUTO_THRESHOLD", "140")])).is_err());
        assert!(load_config_from(vars(&[("DISPATCH_REGION_EUROPE_EQUIPMENT", "tanker")])).is_err());
        assert!(load_config_from(vars(&[("DISPATCH_DECISION_INTERVAL_SECS", "0")])).is_err());
        assert!(load_config_from(vars(&[("DISPATCH_EXECUTOR_TIMEOUT_MS", "0")])).is_err());
    }
}
