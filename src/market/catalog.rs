use super::lane::{Lane, MarketModel, RouteConditions};

/// Built-in corridor set used when no lanes are supplied by the host.
pub fn default_lanes() -> Vec<Lane> {
    let corridor = |origin: &str, dest: &str, miles: f64, rate: f64, levels: (f64, f64, f64), cond: RouteConditions| {
        Lane::new(origin, dest, miles, rate)
            .with_levels(levels.0, levels.1, levels.2)
            .with_conditions(cond)
    };

    let busy = RouteConditions {
        backhaul_availability: 70.0,
        weather_risk: 15.0,
        traffic_congestion: 55.0,
        fuel_cost_index: 104.0,
    };
    let open_road = RouteConditions {
        backhaul_availability: 45.0,
        weather_risk: 25.0,
        traffic_congestion: 15.0,
        fuel_cost_index: 98.0,
    };
    let mountain = RouteConditions {
        backhaul_availability: 35.0,
        weather_risk: 55.0,
        traffic_congestion: 20.0,
        fuel_cost_index: 112.0,
    };

    vec![
        corridor("Chicago", "Atlanta", 716.0, 2.45, (72.0, 48.0, 22.0), busy),
        corridor("Atlanta", "Chicago", 716.0, 2.10, (55.0, 52.0, 18.0), busy),
        corridor("Los Angeles", "Phoenix", 372.0, 2.95, (80.0, 35.0, 30.0), open_road),
        corridor("Phoenix", "Los Angeles", 372.0, 1.85, (30.0, 70.0, 25.0), open_road),
        corridor("Dallas", "Houston", 239.0, 3.10, (65.0, 55.0, 15.0), busy),
        corridor("Houston", "Dallas", 239.0, 2.90, (60.0, 58.0, 15.0), busy),
        corridor("Denver", "Salt Lake City", 520.0, 2.70, (50.0, 30.0, 45.0), mountain),
        corridor("Newark", "Boston", 226.0, 3.40, (75.0, 60.0, 35.0), busy),
        corridor("Seattle", "Portland", 174.0, 3.05, (45.0, 50.0, 20.0), open_road),
        corridor("Memphis", "Columbus", 580.0, 2.35, (68.0, 42.0, 28.0), open_road),
    ]
}

impl MarketModel {
    pub fn with_default_lanes() -> Self {
        Self::with_lanes(default_lanes())
    }
}
