use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::oracle::{OracleVerdict, VerdictSource};
use crate::sourcing::Opportunity;
use super::{ProbabilityScore, RiskLevel};

pub const DEFAULT_AUTO_THRESHOLD: f64 = 65.0;
pub const DEFAULT_MIN_MARGIN_PCT: f64 = 15.0;

/// Outcome of the DECIDE phase for one load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchVerdict {
    pub auto_execute: bool,
    pub confidence: f64,
    pub risk: RiskLevel,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionMaker {
    auto_threshold: f64,
    min_margin_pct: f64,
}

impl Default for DecisionMaker {
    fn default() -> Self {
        Self::new(DEFAULT_AUTO_THRESHOLD, DEFAULT_MIN_MARGIN_PCT)
    }
}

impl DecisionMaker {
    pub fn new(auto_threshold: f64, min_margin_pct: f64) -> Self {
        Self {
            auto_threshold,
            min_margin_pct,
        }
    }

    pub fn auto_threshold(&self) -> f64 {
        self.auto_threshold
    }

    pub fn min_margin_pct(&self) -> f64 {
        self.min_margin_pct
    }

    pub fn with_auto_threshold(mut self, auto_threshold: f64) -> Self {
        self.auto_threshold = auto_threshold;
        self
    }

    /// Auto-execute iff the score clears the threshold and the margin clears the minimum.
    /// The oracle informs confidence, risk and reasoning but cannot override the gates.
    pub fn decide(
        &self,
        opportunity: &Opportunity,
        score: &ProbabilityScore,
        verdict: &OracleVerdict,
        source: VerdictSource,
    ) -> DispatchVerdict {
        let margin = opportunity.profitability.margin_pct;
        let score_ok = score.overall >= self.auto_threshold;
        let margin_ok = margin > self.min_margin_pct;
        let auto_execute = score_ok && margin_ok;

        let mut reasoning = format!(
            "Score {:.1} (threshold {:.0}), margin {:.1}% (minimum {:.0}%).",
            score.overall, self.auto_threshold, margin, self.min_margin_pct
        );
        if !score_ok {
            reasoning.push_str(" Score below threshold.");
        }
        if !margin_ok {
            reasoning.push_str(" Margin below minimum.");
        }
        if verdict.should_book != auto_execute {
            reasoning.push_str(if verdict.should_book {
                " Oracle would book; held for manual review."
            } else {
                " Oracle would pass."
            });
        }
        reasoning.push(' ');
        reasoning.push_str(&verdict.reasoning);
        if source == VerdictSource::Fallback {
            reasoning.push_str(" (oracle unavailable)");
        }

        if auto_execute {
            info!("Auto-executing {} (score {:.1}, margin {:.1}%)", opportunity.id, score.overall, margin);
        } else {
            debug!("Holding {} for manual review", opportunity.id);
        }

        DispatchVerdict {
            auto_execute,
            confidence: ((score.confidence + verdict.confidence) / 2.0).clamp(0.0, 100.0),
            risk: score.risk_level.max(verdict.risk),
            reasoning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{Recommendations, ScoreBreakdown};
    use crate::oracle::fallback_verdict;
    use crate::sourcing::opportunity::fixtures::load_with_margin;

    fn score(overall: f64) -> ProbabilityScore {
        ProbabilityScore {
            overall,
            confidence: 90.0,
            breakdown: ScoreBreakdown {
                market: overall,
                worker: overall,
                route: overall,
                temporal: overall,
                competitive: overall,
            },
            recommendations: Recommendations::default(),
            risks: Vec::new(),
            risk_level: RiskLevel::Low,
        }
    }

    #[test]
    fn both_gates_must_pass() {
        let maker = DecisionMaker::default();
        let good = load_with_margin("a", "X→Y", 25.0);
        let verdict = fallback_verdict(&good);
        assert!(maker.decide(&good, &score(80.0), &verdict, VerdictSource::Oracle).auto_execute);
        assert!(!maker.decide(&good, &score(64.9), &verdict, VerdictSource::Oracle).auto_execute);
        assert!(maker.decide(&good, &score(65.0), &verdict, VerdictSource::Oracle).auto_execute);
    }

    #[test]
    fn thin_margin_blocks_regardless_of_score() {
        let maker = DecisionMaker::default();
        let thin = load_with_margin("a", "X→Y", 10.0);
        let verdict = fallback_verdict(&thin);
        let outcome = maker.decide(&thin, &score(100.0), &verdict, VerdictSource::Oracle);
        assert!(!outcome.auto_execute);
        assert!(outcome.reasoning.contains("Margin below minimum"));

        // the minimum is exclusive
        let edge = load_with_margin("b", "X→Y", 15.0);
        assert!(!maker.decide(&edge, &score(100.0), &fallback_verdict(&edge), VerdictSource::Oracle).auto_execute);
    }

    #[test]
    fn risk_takes_the_worse_of_model_and_oracle() {
        let maker = DecisionMaker::default();
        let load = load_with_margin("a", "X→Y", 25.0);
        let mut verdict = fallback_verdict(&load);
        verdict.risk = RiskLevel::High;
        let outcome = maker.decide(&load, &score(80.0), &verdict, VerdictSource::Fallback);
        assert_eq!(outcome.risk, RiskLevel::High);
        assert!((outcome.confidence - 87.5).abs() < 1e-9);
        assert!(outcome.reasoning.ends_with("(oracle unavailable)"));
    }
}
