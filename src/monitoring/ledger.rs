use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{DispatchError, Result};
use crate::evaluator::RiskLevel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum OptimizationTarget {
    Fleet { efficiency_nudge: f64, workers_changed: usize },
    Region { region: String, top_board_id: String },
}

/// One variant per decision type, each carrying only its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionKind {
    Assign {
        opportunity_id: String,
        worker_id: Option<String>,
    },
    ExpandCapacity {
        cumulative_profit: f64,
        rolling_target: f64,
    },
    Optimize {
        target: OptimizationTarget,
    },
    Adapt {
        success_rate: f64,
        sample_size: usize,
    },
}

impl DecisionKind {
    pub fn label(&self) -> &'static str {
        match self {
            DecisionKind::Assign { .. } => "assign",
            DecisionKind::ExpandCapacity { .. } => "expand_capacity",
            DecisionKind::Optimize { .. } => "optimize",
            DecisionKind::Adapt { .. } => "adapt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub success: bool,
    pub actual_profit: f64,
    pub learning_points: Vec<String>,
}

/// A decision before the ledger has given it an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionDraft {
    pub kind: DecisionKind,
    pub confidence: f64,
    pub expected_profit: f64,
    pub risk: RiskLevel,
    pub reasoning: String,
    pub auto_executed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: DecisionKind,
    pub confidence: f64,
    pub expected_profit: f64,
    pub risk: RiskLevel,
    pub reasoning: String,
    pub auto_executed: bool,
    pub result: Option<DecisionResult>,
}

/// Line format of the on-disk ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LedgerRecord {
    Decision(Decision),
    Outcome { decision_id: String, result: DecisionResult },
}

#[derive(Debug, Default)]
struct LedgerInner {
    decisions: Vec<Decision>,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Append-only, monotonically timestamped decision log.
///
/// Ids and timestamps are assigned under the same lock as the push, so a reader never sees a
/// decision without its identity, and never sees an older timestamp after a newer one. When a
/// directory is configured every record is mirrored to `decisions.jsonl` there.
pub struct DecisionLedger {
    inner: Mutex<LedgerInner>,
    sink_path: Option<PathBuf>,
}

impl DecisionLedger {
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            sink_path: None,
        }
    }

    pub fn with_sink(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let sink_path = log_dir.join("decisions.jsonl");
        info!("Mirroring decisions to {}", sink_path.display());
        Ok(Self {
            inner: Mutex::new(LedgerInner::default()),
            sink_path: Some(sink_path),
        })
    }

    pub fn sink_path(&self) -> Option<&Path> {
        self.sink_path.as_deref()
    }

    pub async fn append(&self, draft: DecisionDraft, now: DateTime<Utc>) -> Decision {
        let mut inner = self.inner.lock().await;
        self.append_locked(&mut inner, draft, now)
    }

    /// Append several drafts atomically, in order.
    pub async fn append_all(&self, drafts: Vec<DecisionDraft>, now: DateTime<Utc>) -> Vec<Decision> {
        let mut inner = self.inner.lock().await;
        drafts
            .into_iter()
            .map(|draft| self.append_locked(&mut inner, draft, now))
            .collect()
    }

    fn append_locked(&self, inner: &mut LedgerInner, draft: DecisionDraft, now: DateTime<Utc>) -> Decision {
        let timestamp = match inner.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        inner.next_seq += 1;

        let decision = Decision {
            id: format!("dec-{:08}", inner.next_seq),
            timestamp,
            kind: draft.kind,
            confidence: draft.confidence,
            expected_profit: draft.expected_profit,
            risk: draft.risk,
            reasoning: draft.reasoning,
            auto_executed: draft.auto_executed,
            result: None,
        };

        debug!("Logged {} decision {}", decision.kind.label(), decision.id);
        self.mirror(&LedgerRecord::Decision(decision.clone()));
        inner.last_timestamp = Some(timestamp);
        inner.decisions.push(decision.clone());
        decision
    }

    /// Attach an outcome. Each decision accepts exactly one.
    pub async fn record_result(&self, decision_id: &str, result: DecisionResult) -> Result<Decision> {
        let mut inner = self.inner.lock().await;
        let decision = inner
            .decisions
            .iter_mut()
            .find(|d| d.id == decision_id)
            .ok_or_else(|| DispatchError::UnknownDecision(decision_id.to_string()))?;

        if decision.result.is_some() {
            return Err(DispatchError::OutcomeAlreadyRecorded(decision_id.to_string()));
        }
        decision.result = Some(result.clone());
        let updated = decision.clone();

        self.mirror(&LedgerRecord::Outcome {
            decision_id: decision_id.to_string(),
            result,
        });
        Ok(updated)
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Decision> {
        let inner = self.inner.lock().await;
        inner.decisions.iter().rev().take(limit).cloned().collect()
    }

    /// The last `window` decisions that have an outcome, oldest first.
    pub async fn recent_with_results(&self, window: usize) -> Vec<Decision> {
        let inner = self.inner.lock().await;
        let mut resolved: Vec<Decision> = inner
            .decisions
            .iter()
            .rev()
            .filter(|d| d.result.is_some())
            .take(window)
            .cloned()
            .collect();
        resolved.reverse();
        resolved
    }

    pub async fn all(&self) -> Vec<Decision> {
        self.inner.lock().await.decisions.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.decisions.len()
    }

    fn mirror(&self, record: &LedgerRecord) {
        let Some(path) = &self.sink_path else {
            return;
        };
        if let Err(e) = write_record(path, record) {
            // the in-memory ledger stays authoritative
            error!("Failed to mirror ledger record to {}: {}", path.display(), e);
        }
    }
}

fn write_record(path: &Path, record: &LedgerRecord) -> Result<()> {
    let line = serde_json::to_string(record)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Read a mirrored ledger back, e.g. for offline analysis.
pub fn read_history(path: &Path) -> Result<Vec<LedgerRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| DispatchError::ledger_error(format!("bad ledger line: {}", e)))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn assign_draft(opportunity_id: &str) -> DecisionDraft {
        DecisionDraft {
            kind: DecisionKind::Assign {
                opportunity_id: opportunity_id.to_string(),
                worker_id: Some("drv-1".to_string()),
            },
            confidence: 80.0,
            expected_profit: 500.0,
            risk: RiskLevel::Low,
            reasoning: "test".to_string(),
            auto_executed: true,
        }
    }
}
