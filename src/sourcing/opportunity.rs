use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentClass {
    DryVan,
    Reefer,
    Flatbed,
    StepDeck,
    PowerOnly,
}

impl EquipmentClass {
    pub const ALL: [EquipmentClass; 5] = [
        EquipmentClass::DryVan,
        EquipmentClass::Reefer,
        EquipmentClass::Flatbed,
        EquipmentClass::StepDeck,
        EquipmentClass::PowerOnly,
    ];

    pub fn capability(self) -> Capability {
        match self {
            EquipmentClass::DryVan => Capability::DryVan,
            EquipmentClass::Reefer => Capability::Reefer,
            EquipmentClass::Flatbed => Capability::Flatbed,
            EquipmentClass::StepDeck => Capability::StepDeck,
            EquipmentClass::PowerOnly => Capability::PowerOnly,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "dry_van" | "van" => Some(EquipmentClass::DryVan),
            "reefer" => Some(EquipmentClass::Reefer),
            "flatbed" => Some(EquipmentClass::Flatbed),
            "step_deck" => Some(EquipmentClass::StepDeck),
            "power_only" => Some(EquipmentClass::PowerOnly),
            _ => None,
        }
    }
}

impl fmt::Display for EquipmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EquipmentClass::DryVan => "dry van",
            EquipmentClass::Reefer => "reefer",
            EquipmentClass::Flatbed => "flatbed",
            EquipmentClass::StepDeck => "step deck",
            EquipmentClass::PowerOnly => "power only",
        };
        f.write_str(name)
    }
}

/// Something a worker must be able to do to haul a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DryVan,
    Reefer,
    Flatbed,
    StepDeck,
    PowerOnly,
    Hazmat,
    Expedite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Standard,
    Expedited,
    Critical,
}

impl Urgency {
    pub const ALL: [Urgency; 3] = [Urgency::Standard, Urgency::Expedited, Urgency::Critical];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub fuel_rate_per_mile: f64,
    pub labor_rate_per_mile: f64,
    pub insurance_pct: f64,
    pub overhead_pct: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            fuel_rate_per_mile: 0.55,
            labor_rate_per_mile: 0.65,
            insurance_pct: 0.03,
            overhead_pct: 0.08,
        }
    }
}

impl CostModel {
    pub fn estimate(&self, rate: f64, distance: f64) -> Profitability {
        let estimated_cost = distance * self.fuel_rate_per_mile
            + distance * self.labor_rate_per_mile
            + rate * self.insurance_pct
            + rate * self.overhead_pct;
        let net_profit = rate - estimated_cost;
        let margin_pct = if rate > 0.0 { net_profit / rate * 100.0 } else { 0.0 };

        Profitability {
            gross_rate: rate,
            estimated_cost,
            net_profit,
            margin_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Profitability {
    pub gross_rate: f64,
    pub estimated_cost: f64,
    pub net_profit: f64,
    pub margin_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub active_competitors: u32,
    pub differentiators: u32,
    /// Market linehaul for the whole trip, used to judge rate competitiveness.
    pub market_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub source_tag: String,
    pub lane: String,
    pub rate: f64,
    pub distance: f64,
    pub equipment_class: EquipmentClass,
    pub urgency: Urgency,
    pub commodity: String,
    pub hazardous: bool,
    pub competition: Competition,
    pub profitability: Profitability,
    pub created_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn rate_per_mile(&self) -> f64 {
        if self.distance > 0.0 {
            self.rate / self.distance
        } else {
            0.0
        }
    }

    pub fn required_capabilities(&self) -> BTreeSet<Capability> {
        let mut required = BTreeSet::new();
        required.insert(self.equipment_class.capability());
        if self.hazardous {
            required.insert(Capability::Hazmat);
        }
        if self.urgency == Urgency::Critical {
            required.insert(Capability::Expedite);
        }
        required
    }
}

/// Per-region acceptance criteria applied to freshly generated loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadFilter {
    pub equipment: Option<BTreeSet<EquipmentClass>>,
    pub min_rate_per_mile: Option<f64>,
    pub max_distance: Option<f64>,
}

impl LoadFilter {
    pub fn accepts(&self, opportunity: &Opportunity) -> bool {
        if let Some(allowed) = &self.equipment {
            if !allowed.contains(&opportunity.equipment_class) {
                return false;
            }
        }
        if let Some(min_rate) = self.min_rate_per_mile {
            if opportunity.rate_per_mile() < min_rate {
                return false;
            }
        }
        if let Some(max_distance) = self.max_distance {
            if opportunity.distance > max_distance {
                return false;
            }
        }
        true
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::load_with_margin;
    use super::*;

    #[test]
    fn cost_model_matches_formula() {
        let p = CostModel::default().estimate(2_000.0, 500.0);
        // 500*0.55 + 500*0.65 + 2000*0.03 + 2000*0.08
        assert!((p.estimated_cost - 820.0).abs() < 1e-9);
        assert!((p.net_profit - 1_180.0).abs() < 1e-9);
        assert!((p.margin_pct - 59.0).abs() < 1e-9);
    }

    #[test]
    fn zero_rate_has_zero_margin() {
        let p = CostModel::default().estimate(0.0, 100.0);
        assert_eq!(p.margin_pct, 0.0);
        assert!(p.net_profit < 0.0);
    }

    #[test]
    fn required_capabilities_include_hazmat_and_expedite() {
        let mut load = load_with_margin("l-1", "A→B", 20.0);
        load.hazardous = true;
        load.urgency = Urgency::Critical;
        let required = load.required_capabilities();
        assert!(required.contains(&Capability::DryVan));
        assert!(required.contains(&Capability::Hazmat));
        assert!(required.contains(&Capability::Expedite));
    }

    #[test]
    fn filter_rejects_by_equipment_rate_and_distance() {
        let load = load_with_margin("l-1", "A→B", 20.0);
        assert!(LoadFilter::default().accepts(&load));

        let reefer_only = LoadFilter {
            equipment: Some([EquipmentClass::Reefer].into_iter().collect()),
            ..LoadFilter::default()
        };
        assert!(!reefer_only.accepts(&load));

        let pricey = LoadFilter {
            min_rate_per_mile: Some(3.5),
            ..LoadFilter::default()
        };
        assert!(!pricey.accepts(&load));

        let short_haul = LoadFilter {
            max_distance: Some(300.0),
            ..LoadFilter::default()
        };
        assert!(!short_haul.accepts(&load));
    }

    #[test]
    fn equipment_names_parse() {
        assert_eq!(EquipmentClass::parse("Dry-Van"), Some(EquipmentClass::DryVan));
        assert_eq!(EquipmentClass::parse("step deck"), Some(EquipmentClass::StepDeck));
        assert_eq!(EquipmentClass::parse("tanker"), None);
    }
}
