use std::collections::BTreeSet;

use crate::sourcing::LoadFilter;
use super::optimizer::{CostStructure, RegionProfile, RegionalBoard};

fn tags(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[allow(clippy::too_many_arguments)]
fn board(
    id: &str,
    name: &str,
    region: &str,
    share: f64,
    rate: f64,
    volume: f64,
    compliance: &[&str],
    languages: &[&str],
    tz: i32,
    cost: CostStructure,
) -> RegionalBoard {
    RegionalBoard {
        id: id.to_string(),
        name: name.to_string(),
        region: region.to_string(),
        market_share_pct: share,
        avg_rate_per_distance: rate,
        load_volume_per_day: volume,
        compliance_tags: tags(compliance),
        languages: tags(languages),
        timezone_offset_hours: tz,
        cost_structure: cost,
        active: true,
    }
}

/// Reference data for the load boards the brokerage subscribes to.
pub fn default_boards() -> Vec<RegionalBoard> {
    let mut boards = vec![
        board("dat", "DAT One", "north_america", 38.0, 2.55, 9_500.0, &["fmcsa", "ctpat"], &["en"], -6, CostStructure::Subscription { monthly_fee: 1_800.0 }),
        board("truckstop", "Truckstop", "north_america", 24.0, 2.45, 6_200.0, &["fmcsa"], &["en", "es"], -6, CostStructure::Subscription { monthly_fee: 1_200.0 }),
        board("123lb", "123Loadboard", "north_america", 9.0, 2.30, 2_100.0, &["fmcsa"], &["en"], -5, CostStructure::Subscription { monthly_fee: 450.0 }),
        board("convoy-spot", "Spot Direct", "north_america", 6.0, 2.70, 1_400.0, &["fmcsa", "ctpat"], &["en"], -8, CostStructure::PerLoad { fee: 15.0 }),
        board("timocom", "TIMOCOM", "europe", 31.0, 1.95, 8_000.0, &["eu-mobility", "cmr"], &["de", "en", "fr", "pl"], 1, CostStructure::Subscription { monthly_fee: 2_100.0 }),
        board("trans-eu", "Trans.eu", "europe", 27.0, 1.80, 7_100.0, &["eu-mobility", "cmr"], &["pl", "en", "de"], 1, CostStructure::Subscription { monthly_fee: 1_500.0 }),
        board("teleroute", "Teleroute", "europe", 14.0, 1.85, 3_300.0, &["cmr"], &["fr", "en", "es"], 1, CostStructure::Subscription { monthly_fee: 900.0 }),
        board("cargox", "CargoX", "latin_america", 18.0, 1.60, 2_600.0, &["sat-cfdi"], &["es", "pt"], -6, CostStructure::PerLoad { fee: 8.0 }),
        board("fretebras", "Fretebras", "latin_america", 33.0, 1.45, 5_400.0, &["antt"], &["pt"], -3, CostStructure::Subscription { monthly_fee: 600.0 }),
        board("lalamove-freight", "Regional Freight Exchange", "asia_pacific", 21.0, 1.70, 4_200.0, &["apac-customs"], &["en", "zh"], 8, CostStructure::Free),
    ];

    // suspended pending contract renewal
    boards.push(RegionalBoard {
        active: false,
        ..board("loadlink", "Loadlink", "north_america", 12.0, 2.60, 3_000.0, &["fmcsa"], &["en", "fr"], -5, CostStructure::Subscription { monthly_fee: 700.0 })
    });

    boards
}

pub fn default_profiles() -> Vec<RegionProfile> {
    let profile = |region: &str, compliance: &[&str], languages: &[&str], tz: i32, floor: f64, poll: u64| RegionProfile {
        region: region.to_string(),
        required_compliance: tags(compliance),
        languages: tags(languages),
        timezone_offset_hours: tz,
        rate_floor_per_distance: floor,
        poll_interval_secs: poll,
        activated_boards: None,
        filter: LoadFilter::default(),
    };

    vec![
        profile("north_america", &["fmcsa"], &["en"], -6, 1.90, 300),
        profile("europe", &["eu-mobility", "cmr"], &["en", "de"], 1, 1.50, 600),
        profile("latin_america", &["sat-cfdi", "antt"], &["es", "pt"], -5, 1.20, 900),
        profile("asia_pacific", &["apac-customs"], &["en"], 8, 1.30, 900),
    ]
}
