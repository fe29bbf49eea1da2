use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, Result};
use crate::evaluator::RiskLevel;
use crate::monitoring::notifier::http_client;
use crate::sourcing::Opportunity;

const STRONG_MARGIN_PCT: f64 = 20.0;
const BOOKABLE_MARGIN_PCT: f64 = 15.0;
const STRONG_CONFIDENCE: f64 = 85.0;
const BASE_CONFIDENCE: f64 = 65.0;
// Callers cap evaluation tighter; this only stops orphaned connections
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub confidence: f64,
    pub risk: RiskLevel,
    pub reasoning: String,
    pub should_book: bool,
}

/// What the engine already knows about a load when it asks for a second opinion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleContext {
    pub worker_id: String,
    pub demand_level: f64,
    pub supply_level: f64,
    pub rate_volatility: f64,
    pub local_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Oracle,
    Fallback,
}

/// Pluggable evaluator consulted before every dispatch decision.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, opportunity: &Opportunity, context: &OracleContext) -> Result<OracleVerdict>;
}

/// Margin-only heuristic, used as the default oracle and as the fallback for every other one.
pub fn fallback_verdict(opportunity: &Opportunity) -> OracleVerdict {
    let margin = opportunity.profitability.margin_pct;
    let strong = margin > STRONG_MARGIN_PCT;
    let should_book = margin > BOOKABLE_MARGIN_PCT;

    OracleVerdict {
        confidence: if strong { STRONG_CONFIDENCE } else { BASE_CONFIDENCE },
        risk: if strong {
            RiskLevel::Low
        } else if should_book {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        },
        reasoning: format!(
            "Local heuristic: {:.1}% margin on {} ({}) suggests {}.",
            margin,
            opportunity.lane,
            opportunity.equipment_class,
            if should_book { "booking" } else { "passing" }
        ),
        should_book,
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalHeuristicOracle;

#[async_trait]
impl ScoringOracle for LocalHeuristicOracle {
    fn name(&self) -> &str {
        "local-heuristic"
    }

    async fn evaluate(&self, opportunity: &Opportunity, _context: &OracleContext) -> Result<OracleVerdict> {
        Ok(fallback_verdict(opportunity))
    }
}

#[derive(Debug, Serialize)]
struct OracleRequest<'a> {
    instructions: String,
    opportunity: &'a Opportunity,
    context: &'a OracleContext,
}

/// Shape of the remote reply before validation.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    confidence: f64,
    risk: String,
    reasoning: String,
    #[serde(alias = "shouldBook")]
    should_book: bool,
}

impl RawVerdict {
    fn validate(self) -> Result<OracleVerdict> {
        if !(0.0..=100.0).contains(&self.confidence) {
            return Err(DispatchError::oracle_error(format!(
                "confidence {} outside 0..=100",
                self.confidence
            )));
        }
        let risk = RiskLevel::parse(&self.risk)
            .ok_or_else(|| DispatchError::oracle_error(format!("unknown risk level '{}'", self.risk)))?;
        Ok(OracleVerdict {
            confidence: self.confidence,
            risk,
            reasoning: self.reasoning,
            should_book: self.should_book,
        })
    }
}

/// HTTP JSON evaluator.
pub struct RemoteOracle {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl RemoteOracle {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            endpoint,
            api_key,
            client: http_client(REQUEST_TIMEOUT),
        }
    }

    fn format_instructions(&self, opportunity: &Opportunity, context: &OracleContext) -> String {
        format!(
            "You are a freight brokerage analyst. Decide whether the following load should be booked.\n\n\
            Load Details:\n\
            - Lane: {}\n\
            - Rate: ${:.2} over {:.0} miles\n\
            - Equipment: {}\n\
            - Commodity: {}{}\n\
            - Estimated margin: {:.1}%\n\
            - Competing carriers: {}\n\
            - Demand/Supply: {:.0}/{:.0}, volatility {:.0}\n\
            - Local model score: {:.1}\n\n\
            Return JSON with the fields confidence (0-100), risk ('low', 'medium' or 'high'), \
            reasoning (one sentence) and should_book (boolean).",
            opportunity.lane,
            opportunity.rate,
            opportunity.distance,
            opportunity.equipment_class,
            opportunity.commodity,
            if opportunity.hazardous { " (hazmat)" } else { "" },
            opportunity.profitability.margin_pct,
            opportunity.competition.active_competitors,
            context.demand_level,
            context.supply_level,
            context.rate_volatility,
            context.local_score,
        )
    }
}

#[async_trait]
impl ScoringOracle for RemoteOracle {
    fn name(&self) -> &str {
        "remote"
    }

    async fn evaluate(&self, opportunity: &Opportunity, context: &OracleContext) -> Result<OracleVerdict> {
        debug!("Requesting oracle evaluation for {}", opportunity.id);

        let body = OracleRequest {
            instructions: self.format_instructions(opportunity, context),
            opportunity,
            context,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::oracle_error(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("Oracle returned {}: {}", status, text);
            return Err(DispatchError::oracle_error(format!("HTTP {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| DispatchError::oracle_error(e.to_string()))?;
        let raw: RawVerdict = serde_json::from_str(&text).map_err(|e| {
            error!("Raw oracle response: {}", text);
            DispatchError::oracle_error(format!("malformed response: {}", e))
        })?;

        raw.validate()
    }
}

/// Ask the oracle, but never wait past `timeout` and never fail: errors become the local verdict.
pub async fn evaluate_with_fallback(
    oracle: &dyn ScoringOracle,
    opportunity: &Opportunity,
    context: &OracleContext,
    timeout: Duration,
) -> (OracleVerdict, VerdictSource) {
    match tokio::time::timeout(timeout, oracle.evaluate(opportunity, context)).await {
        Ok(Ok(verdict)) => (verdict, VerdictSource::Oracle),
        Ok(Err(e)) => {
            warn!("Oracle '{}' failed for {}: {}; using local heuristic", oracle.name(), opportunity.id, e);
            (fallback_verdict(opportunity), VerdictSource::Fallback)
        }
        Err(_) => {
            warn!(
                "Oracle '{}' timed out after {:?} for {}; using local heuristic",
                oracle.name(),
                timeout,
                opportunity.id
            );
            (fallback_verdict(opportunity), VerdictSource::Fallback)
        }
    }
}

pub fn build_oracle(endpoint: Option<String>, api_key: Option<String>) -> Box<dyn ScoringOracle> {
    match endpoint {
        Some(url) => {
            info!("Using remote scoring oracle at {}", url);
            Box::new(RemoteOracle::new(url, api_key))
        }
        None => {
            info!("No scoring oracle configured, using local heuristic");
            Box::new(LocalHeuristicOracle)
        }
    }
}
