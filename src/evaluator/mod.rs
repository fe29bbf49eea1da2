pub mod scorer;
pub mod risk_analyzer;
pub mod decision_maker;

pub use scorer::{ScoringContext, ScoringEngine, ScoringWeights};
pub use risk_analyzer::RiskAnalyzer;
pub use decision_maker::{DecisionMaker, DispatchVerdict};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

/// Sub-scores, each already clamped to 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub market: f64,
    pub worker: f64,
    pub route: f64,
    pub temporal: f64,
    pub competitive: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub severity: RiskLevel,
    pub mitigation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    /// Suggested rate change as a fraction, e.g. 0.05 for +5%.
    pub rate_adjustment_pct: f64,
    pub timing: String,
    pub profile_improvements: Vec<String>,
    pub competitive_advantages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityScore {
    pub overall: f64,
    pub confidence: f64,
    pub breakdown: ScoreBreakdown,
    pub recommendations: Recommendations,
    pub risks: Vec<RiskFactor>,
    pub risk_level: RiskLevel,
}
