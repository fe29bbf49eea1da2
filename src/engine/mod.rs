pub mod clock;
pub mod execution;
pub mod phases;
pub mod scheduler;
pub mod tuning;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::boards::catalog::default_boards;
use crate::boards::optimizer::normalize_region;
use crate::boards::{BoardOptimization, BoardOptimizer, RegionProfile, RegionalBoard};
use crate::config::EngineConfig;
use crate::error::{DispatchError, Result};
use crate::evaluator::{DecisionMaker, ProbabilityScore, RiskLevel, ScoringContext, ScoringEngine};
use crate::fleet::{Worker, WorkerRegistry};
use crate::market::{Lane, MarketModel};
use crate::monitoring::{
    Decision, DecisionDraft, DecisionKind, DecisionLedger, DecisionResult, OptimizationTarget, TelegramNotifier,
};
use crate::oracle::agent::build_oracle;
use crate::oracle::{evaluate_with_fallback, OracleContext, OracleVerdict, ScoringOracle, VerdictSource};
use crate::sourcing::{CostModel, LoadFilter, Opportunity, OpportunityGenerator};

use clock::{Clock, SystemClock};
use execution::{bounded_step, run_post_assignment, AcquiredLoad, AssignmentExecutor, NotifyingExecutor};
use phases::{Phase, TickCycle};
use tuning::{evaluate_history, review_profit, StrategicOutcome, TuningOutcome, FLEET_EFFICIENCY_NUDGE};

const REVIEW_QUEUE_LIMIT: usize = 500;
const SOURCE_TAGS_PER_REGION: usize = 3;

#[derive(Debug, Clone)]
struct PendingLoad {
    opportunity: Opportunity,
    first_seen_tick: u64,
}

/// A load held back for a dispatcher to look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub opportunity: Opportunity,
    pub suggested_worker: Option<String>,
    pub score: f64,
    pub decision_id: Option<String>,
}

#[derive(Debug, Default)]
struct DispatchState {
    tick: u64,
    pending: BTreeMap<String, PendingLoad>,
    consumed: HashSet<String>,
    acquired: Vec<AcquiredLoad>,
    review_queue: Vec<ReviewItem>,
    cumulative_profit: f64,
    strategic_reviews: u64,
}

#[derive(Debug)]
struct TuningState {
    decision_maker: DecisionMaker,
    review_pending: Option<TuningOutcome>,
    last_outcome: Option<TuningOutcome>,
    // Decision ids behind the last flag; the same window never flags twice
    last_flagged_window: Vec<String>,
}

struct RegionPoller {
    region: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RegionState {
    current: Option<String>,
    poller: Option<RegionPoller>,
}

struct Scored {
    opportunity: Opportunity,
    worker_id: String,
    score: ProbabilityScore,
    verdict: OracleVerdict,
    source: VerdictSource,
}

enum DraftLink {
    Acquired(usize),
    Review(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub generated: usize,
    pub expired: usize,
    pub scored: usize,
    pub unmatched: usize,
    pub auto_executed: usize,
    pub held_for_review: usize,
    pub decisions: Vec<String>,
    pub phases: Vec<Phase>,
    pub tuning: Option<TuningOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousStatus {
    pub enabled: bool,
    pub current_region: Option<String>,
    pub ticks_completed: u64,
    pub pending_opportunities: usize,
    pub acquired_loads: usize,
    pub review_queue: usize,
    pub decisions_logged: usize,
    pub cumulative_profit: f64,
    pub rolling_target: f64,
    pub auto_threshold: f64,
    pub min_margin_pct: f64,
    pub threshold_review_pending: bool,
    pub last_tuning: Option<TuningOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub total_decisions: usize,
    pub auto_executed: usize,
    pub manual_review: usize,
    pub resolved: usize,
    pub success_rate: Option<f64>,
    pub average_confidence: f64,
    pub expected_profit_total: f64,
    pub realized_profit_total: f64,
    pub cumulative_profit: f64,
    pub profit_target: f64,
    pub target_progress_pct: f64,
    pub decisions_by_kind: BTreeMap<String, usize>,
}

/// Wires an engine together. Anything not supplied falls back to the configured default.
pub struct EngineBuilder {
    config: EngineConfig,
    market: Option<MarketModel>,
    workers: Option<WorkerRegistry>,
    boards: Option<(Vec<RegionalBoard>, Vec<RegionProfile>)>,
    oracle: Option<Arc<dyn ScoringOracle>>,
    executor: Option<Arc<dyn AssignmentExecutor>>,
    clock: Option<Arc<dyn Clock>>,
    ledger: Option<DecisionLedger>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            market: None,
            workers: None,
            boards: None,
            oracle: None,
            executor: None,
            clock: None,
            ledger: None,
        }
    }

    pub fn market(mut self, market: MarketModel) -> Self {
        self.market = Some(market);
        self
    }

    pub fn workers(mut self, workers: WorkerRegistry) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn boards(mut self, boards: Vec<RegionalBoard>, profiles: Vec<RegionProfile>) -> Self {
        self.boards = Some((boards, profiles));
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn ScoringOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn AssignmentExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ledger(mut self, ledger: DecisionLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn build(self) -> Result<Arc<AutonomousEngine>> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| DispatchError::config_error(e.to_string()))?;

        let market = self.market.unwrap_or_else(MarketModel::with_default_lanes);
        if market.is_empty() {
            return Err(DispatchError::NoLanes);
        }

        let (boards, profiles) = self
            .boards
            .unwrap_or_else(|| (default_boards(), config.region_profiles()));

        let ledger = match (self.ledger, &config.decision_log_dir) {
            (Some(ledger), _) => ledger,
            (None, Some(dir)) => DecisionLedger::with_sink(dir)?,
            (None, None) => DecisionLedger::in_memory(),
        };

        let oracle = self
            .oracle
            .unwrap_or_else(|| Arc::from(build_oracle(config.oracle_url.clone(), config.oracle_api_key.clone())));
        let executor = self.executor.unwrap_or_else(|| {
            Arc::new(NotifyingExecutor::new(
                TelegramNotifier::new(config.telegram_bot_token.clone(), config.telegram_chat_id.clone())
                    .with_timeout(config.executor_timeout()),
            ))
        });

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            "Dispatch engine ready: {} lanes, {} regions",
            market.len(),
            profiles.len()
        );

        Ok(Arc::new(AutonomousEngine {
            market: RwLock::new(market),
            workers: RwLock::new(self.workers.unwrap_or_else(WorkerRegistry::with_default_roster)),
            ledger,
            boards: BoardOptimizer::new(boards, profiles),
            optimizations: RwLock::new(BTreeMap::new()),
            region: Mutex::new(RegionState::default()),
            dispatch: Mutex::new(DispatchState::default()),
            generator: Mutex::new(OpportunityGenerator::new(CostModel::default())),
            rng: Mutex::new(rng),
            tuning: Mutex::new(TuningState {
                decision_maker: DecisionMaker::new(config.auto_threshold, config.min_margin_pct),
                review_pending: None,
                last_flagged_window: Vec::new(),
                last_outcome: None,
            }),
            scorer: ScoringEngine::new(),
            oracle,
            executor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            autonomous: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            config,
        }))
    }
}

/// The autonomous load-matching engine. Construct once, share behind `Arc`.
pub struct AutonomousEngine {
    config: EngineConfig,
    market: RwLock<MarketModel>,
    workers: RwLock<WorkerRegistry>,
    ledger: DecisionLedger,
    boards: BoardOptimizer,
    optimizations: RwLock<BTreeMap<String, Vec<BoardOptimization>>>,
    region: Mutex<RegionState>,
    dispatch: Mutex<DispatchState>,
    generator: Mutex<OpportunityGenerator>,
    rng: Mutex<StdRng>,
    tuning: Mutex<TuningState>,
    scorer: ScoringEngine,
    oracle: Arc<dyn ScoringOracle>,
    executor: Arc<dyn AssignmentExecutor>,
    clock: Arc<dyn Clock>,
    autonomous: AtomicBool,
    shutdown: CancellationToken,
}

impl AutonomousEngine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_autonomous(&self) -> bool {
        self.autonomous.load(Ordering::SeqCst)
    }

    /// Child token that fires when the engine shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    // ----- market -----

    pub async fn run_market_tick(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut rng = self.rng.lock().await;
        let mut market = self.market.write().await;
        market.tick(&mut *rng, now)
    }

    // ----- decision loop -----

    /// One GENERATE → … → IDLE pass. `None` while autonomous mode is off.
    pub async fn run_decision_tick(&self) -> Result<Option<TickReport>> {
        if !self.is_autonomous() {
            debug!("Autonomous mode off, decision tick skipped");
            return Ok(None);
        }

        let mut dispatch = self.dispatch.lock().await;
        dispatch.tick += 1;
        let now = self.clock.now();

        let mut cycle = TickCycle::new();
        cycle.advance(Phase::Generate)?;
        let batch = self.generate_batch(now).await?;

        self.process_batch(&mut dispatch, cycle, batch, now).await.map(Some)
    }

    /// Run a tick over loads supplied by the caller instead of the generator.
    #[cfg(test)]
    pub(crate) async fn process_opportunities(&self, batch: Vec<Opportunity>) -> Result<TickReport> {
        let mut dispatch = self.dispatch.lock().await;
        dispatch.tick += 1;
        let now = self.clock.now();

        let mut cycle = TickCycle::new();
        cycle.advance(Phase::Generate)?;
        self.process_batch(&mut dispatch, cycle, batch, now).await
    }

    async fn generate_batch(&self, now: DateTime<Utc>) -> Result<Vec<Opportunity>> {
        let lanes = self.market.read().await.snapshot();
        let filter = self.active_filter().await;
        let mut rng = self.rng.lock().await;
        let mut generator = self.generator.lock().await;
        generator.generate_filtered(&lanes, &filter, &mut *rng, now)
    }

    async fn active_filter(&self) -> LoadFilter {
        let region = self.region.lock().await.current.clone();
        region
            .and_then(|r| self.boards.profile(&r).map(|p| p.filter.clone()))
            .unwrap_or_default()
    }

    async fn lane_context(&self, lane_key: &str) -> Option<(Lane, Option<f64>)> {
        let market = self.market.read().await;
        market
            .lane(lane_key)
            .map(|lane| (lane.clone(), market.backhaul_demand(lane)))
    }

    async fn process_batch(
        &self,
        dispatch: &mut DispatchState,
        mut cycle: TickCycle,
        batch: Vec<Opportunity>,
        now: DateTime<Utc>,
    ) -> Result<TickReport> {
        let tick = dispatch.tick;
        let mut report = TickReport {
            tick,
            generated: batch.len(),
            ..TickReport::default()
        };

        for opportunity in batch {
            if dispatch.consumed.contains(&opportunity.id) || dispatch.pending.contains_key(&opportunity.id) {
                debug!("Ignoring already-seen load {}", opportunity.id);
                continue;
            }
            dispatch.pending.insert(
                opportunity.id.clone(),
                PendingLoad {
                    opportunity,
                    first_seen_tick: tick,
                },
            );
        }

        let ttl = self.config.opportunity_ttl_ticks;
        let before = dispatch.pending.len();
        dispatch.pending.retain(|_, p| tick - p.first_seen_tick < ttl);
        report.expired = before - dispatch.pending.len();

        // SCORE
        cycle.advance(Phase::Score)?;
        let candidates: Vec<Opportunity> = dispatch
            .pending
            .values()
            .filter(|p| !dispatch.consumed.contains(&p.opportunity.id))
            .map(|p| p.opportunity.clone())
            .collect();

        // Match and score locally first, then ask the oracle about the whole batch at once
        let mut prepared = Vec::with_capacity(candidates.len());
        for opportunity in candidates {
            let required = opportunity.required_capabilities();
            let worker: Option<Worker> = self.workers.read().await.best_available(&required).cloned();
            let Some(worker) = worker else {
                debug!("No eligible worker for {} this tick", opportunity.id);
                report.unmatched += 1;
                continue;
            };

            let Some((lane, backhaul_demand)) = self.lane_context(&opportunity.lane).await else {
                warn!("Load {} references unknown lane {}, dropping", opportunity.id, opportunity.lane);
                dispatch.pending.remove(&opportunity.id);
                continue;
            };

            let score = self.scorer.score(
                &opportunity,
                &worker,
                &ScoringContext {
                    lane: &lane,
                    backhaul_demand,
                    now,
                },
            );
            let context = OracleContext {
                worker_id: worker.id.clone(),
                demand_level: lane.demand_level,
                supply_level: lane.supply_level,
                rate_volatility: lane.rate_volatility,
                local_score: score.overall,
            };
            prepared.push((opportunity, worker.id, score, context));
        }

        let oracle_timeout = self.config.oracle_timeout();
        let verdicts = join_all(
            prepared
                .iter()
                .map(|(opportunity, _, _, context)| {
                    evaluate_with_fallback(self.oracle.as_ref(), opportunity, context, oracle_timeout)
                }),
        )
        .await;

        let scored: Vec<Scored> = prepared
            .into_iter()
            .zip(verdicts)
            .map(|((opportunity, worker_id, score, _), (verdict, source))| Scored {
                opportunity,
                worker_id,
                score,
                verdict,
                source,
            })
            .collect();
        report.scored = scored.len();

        // DECIDE
        cycle.advance(Phase::Decide)?;
        let maker = self.tuning.lock().await.decision_maker;
        let decided: Vec<_> = scored
            .into_iter()
            .map(|s| {
                let verdict = maker.decide(&s.opportunity, &s.score, &s.verdict, s.source);
                (s, verdict)
            })
            .collect();

        let any_auto = decided.iter().any(|(_, v)| v.auto_execute);
        cycle.advance(if any_auto { Phase::Assign } else { Phase::Skip })?;

        // ASSIGN | SKIP
        let mut drafts = Vec::new();
        let mut links = Vec::new();
        for (scored, verdict) in decided {
            let opportunity_id = scored.opportunity.id.clone();
            let net_profit = scored.opportunity.profitability.net_profit;

            // Held back: queue it for a dispatcher, still log the decision
            if !verdict.auto_execute {
                dispatch.pending.remove(&opportunity_id);
                dispatch.review_queue.push(ReviewItem {
                    opportunity: scored.opportunity,
                    suggested_worker: Some(scored.worker_id.clone()),
                    score: scored.score.overall,
                    decision_id: None,
                });
                links.push(DraftLink::Review(dispatch.review_queue.len() - 1));
                drafts.push(DecisionDraft {
                    kind: DecisionKind::Assign {
                        opportunity_id,
                        worker_id: Some(scored.worker_id),
                    },
                    confidence: verdict.confidence,
                    expected_profit: net_profit,
                    risk: verdict.risk,
                    reasoning: verdict.reasoning,
                    auto_executed: false,
                });
                report.held_for_review += 1;
                continue;
            }

            if dispatch.consumed.contains(&opportunity_id) {
                warn!("Load {} already assigned, not re-selecting", opportunity_id);
                continue;
            }

            // Re-pick under the write lock, the pool may have changed since SCORE
            let assigned_worker = {
                let mut workers = self.workers.write().await;
                let chosen = workers
                    .best_available(&scored.opportunity.required_capabilities())
                    .map(|w| w.id.clone());
                if let Some(worker_id) = &chosen {
                    if let Err(e) = workers.record_profit(worker_id, net_profit) {
                        warn!("Could not credit profit to {}: {}", worker_id, e);
                    }
                }
                chosen
            };
            let Some(worker_id) = assigned_worker else {
                debug!("Worker pool changed, {} stays pending", opportunity_id);
                report.unmatched += 1;
                continue;
            };

            dispatch.pending.remove(&opportunity_id);
            dispatch.consumed.insert(opportunity_id.clone());
            dispatch.cumulative_profit += net_profit;

            let load = AcquiredLoad {
                opportunity: scored.opportunity,
                worker_id: worker_id.clone(),
                decision_id: None,
                score: scored.score.overall,
                assigned_at: now,
                actual_profit: None,
            };
            let failed = run_post_assignment(self.executor.as_ref(), &load, self.config.executor_timeout()).await;

            let mut reasoning = verdict.reasoning;
            if !failed.is_empty() {
                reasoning.push_str(&format!(" Post-assignment steps failed: {}.", failed.join(", ")));
            }

            dispatch.acquired.push(load);
            links.push(DraftLink::Acquired(dispatch.acquired.len() - 1));
            drafts.push(DecisionDraft {
                kind: DecisionKind::Assign {
                    opportunity_id,
                    worker_id: Some(worker_id),
                },
                confidence: verdict.confidence,
                expected_profit: net_profit,
                risk: verdict.risk,
                reasoning,
                auto_executed: true,
            });
            report.auto_executed += 1;
        }

        // LOG
        cycle.advance(Phase::Log)?;
        let logged = self.ledger.append_all(drafts, now).await;
        for (decision, link) in logged.iter().zip(links) {
            match link {
                DraftLink::Acquired(i) => dispatch.acquired[i].decision_id = Some(decision.id.clone()),
                DraftLink::Review(i) => dispatch.review_queue[i].decision_id = Some(decision.id.clone()),
            }
        }
        report.decisions = logged.into_iter().map(|d| d.id).collect();
        if dispatch.review_queue.len() > REVIEW_QUEUE_LIMIT {
            let overflow = dispatch.review_queue.len() - REVIEW_QUEUE_LIMIT;
            dispatch.review_queue.drain(..overflow);
        }

        // ADAPT
        cycle.advance(Phase::Adapt)?;
        if tick % self.config.tuning_every_ticks == 0 {
            report.tuning = Some(self.self_tune(now).await);
        }

        cycle.advance(Phase::Idle)?;
        report.phases = cycle.into_visited();

        info!(
            "Tick {}: {} generated, {} scored, {} booked, {} for review, {} unmatched, {} expired",
            tick,
            report.generated,
            report.scored,
            report.auto_executed,
            report.held_for_review,
            report.unmatched,
            report.expired
        );
        Ok(report)
    }

    /// Classify recent outcomes; a poor run raises a threshold review for the operator.
    pub async fn self_tune(&self, now: DateTime<Utc>) -> TuningOutcome {
        let window = self.config.tuning_window;
        let resolved = self.ledger.recent_with_results(window).await;
        let outcome = evaluate_history(&resolved, window);
        let window_ids: Vec<String> = resolved.iter().map(|d| d.id.clone()).collect();

        // Nothing new resolved since the last flag, keep the operator's answer
        let repeated_flag = matches!(outcome, TuningOutcome::FlagForAdjustment { .. })
            && self.tuning.lock().await.last_flagged_window == window_ids;
        if repeated_flag {
            debug!("Self-tuning: no new outcomes since the last threshold review");
            self.tuning.lock().await.last_outcome = Some(outcome.clone());
            return outcome;
        }

        match &outcome {
            TuningOutcome::InsufficientHistory { available, required } => {
                debug!("Self-tuning skipped: {}/{} resolved decisions", available, required);
            }
            TuningOutcome::Maintain { success_rate, .. } => {
                info!("Self-tuning: success rate {:.0}%, maintaining thresholds", success_rate * 100.0);
            }
            TuningOutcome::FlagForAdjustment { success_rate, sample_size } => {
                warn!(
                    "Self-tuning: success rate {:.0}% over {} decisions, threshold review needed",
                    success_rate * 100.0,
                    sample_size
                );
                let threshold = self.tuning.lock().await.decision_maker.auto_threshold();
                self.ledger
                    .append(
                        DecisionDraft {
                            kind: DecisionKind::Adapt {
                                success_rate: *success_rate,
                                sample_size: *sample_size,
                            },
                            confidence: (success_rate * 100.0).clamp(0.0, 100.0),
                            expected_profit: 0.0,
                            risk: RiskLevel::Medium,
                            reasoning: format!(
                                "Success rate {:.0}% is at or below 80%; review the auto threshold (currently {:.0}).",
                                success_rate * 100.0,
                                threshold
                            ),
                            auto_executed: false,
                        },
                        now,
                    )
                    .await;
            }
        }

        let mut tuning = self.tuning.lock().await;
        if matches!(outcome, TuningOutcome::FlagForAdjustment { .. }) {
            tuning.review_pending = Some(outcome.clone());
            tuning.last_flagged_window = window_ids;
        }
        tuning.last_outcome = Some(outcome.clone());
        outcome
    }

    // ----- strategic loop -----

    /// Compare run profit with the rolling target. `None` while autonomous mode is off.
    pub async fn run_strategic_tick(&self) -> Result<Option<StrategicOutcome>> {
        if !self.is_autonomous() {
            return Ok(None);
        }

        let now = self.clock.now();
        let (cumulative, rolling_target) = {
            let mut dispatch = self.dispatch.lock().await;
            dispatch.strategic_reviews += 1;
            (
                dispatch.cumulative_profit,
                self.config.profit_target * dispatch.strategic_reviews as f64,
            )
        };

        let outcome = review_profit(cumulative, rolling_target, self.config.capacity_gap_pct);
        match &outcome {
            StrategicOutcome::ExpandCapacity { shortfall, .. } => {
                let decision = self
                    .ledger
                    .append(
                        DecisionDraft {
                            kind: DecisionKind::ExpandCapacity {
                                cumulative_profit: cumulative,
                                rolling_target,
                            },
                            confidence: 90.0,
                            expected_profit: *shortfall,
                            risk: if *shortfall > rolling_target * 0.5 { RiskLevel::High } else { RiskLevel::Medium },
                            reasoning: format!(
                                "Profit ${:.0} is ${:.0} behind the ${:.0} target; add carrier capacity.",
                                cumulative, shortfall, rolling_target
                            ),
                            auto_executed: true,
                        },
                        now,
                    )
                    .await;
                warn!("{}", decision.reasoning);
                bounded_step(
                    "capacity alert",
                    &decision.id,
                    self.config.executor_timeout(),
                    self.executor.raise_alert(&decision),
                )
                .await;
            }
            StrategicOutcome::Optimize { surplus_pct, .. } => {
                let changed = self.workers.write().await.nudge_all_efficiency(FLEET_EFFICIENCY_NUDGE);
                let decision = self
                    .ledger
                    .append(
                        DecisionDraft {
                            kind: DecisionKind::Optimize {
                                target: OptimizationTarget::Fleet {
                                    efficiency_nudge: FLEET_EFFICIENCY_NUDGE,
                                    workers_changed: changed,
                                },
                            },
                            confidence: 80.0,
                            expected_profit: 0.0,
                            risk: RiskLevel::Low,
                            reasoning: format!(
                                "Profit is {:.0}% ahead of target; tightening fleet efficiency ({} drivers adjusted).",
                                surplus_pct * 100.0,
                                changed
                            ),
                            auto_executed: true,
                        },
                        now,
                    )
                    .await;
                info!("{}", decision.reasoning);
            }
            StrategicOutcome::OnTrack { .. } => {
                debug!("Profit ${:.0} on track against ${:.0}", cumulative, rolling_target);
            }
        }

        Ok(Some(outcome))
    }

    // ----- regions -----

    /// Re-rank one region's boards and store the result. Logs a decision when the top board changes.
    pub async fn optimize_region(&self, region: &str, refresh_sources: bool) -> Result<Vec<BoardOptimization>> {
        let key = normalize_region(region);
        let ranked = self.boards.optimize(&key)?;

        let previous_top = {
            let mut optimizations = self.optimizations.write().await;
            let previous = optimizations
                .get(&key)
                .and_then(|list| list.first())
                .map(|o| o.board_id.clone());
            optimizations.insert(key.clone(), ranked.clone());
            previous
        };

        if refresh_sources {
            let tags: Vec<String> = ranked
                .iter()
                .take(SOURCE_TAGS_PER_REGION)
                .map(|o| {
                    self.boards
                        .board(&o.board_id)
                        .map(|b| b.name.clone())
                        .unwrap_or_else(|| o.board_id.clone())
                })
                .collect();
            self.generator.lock().await.set_source_tags(tags);
        }

        if let (Some(previous), Some(top)) = (previous_top, ranked.first()) {
            if previous != top.board_id {
                self.ledger
                    .append(
                        DecisionDraft {
                            kind: DecisionKind::Optimize {
                                target: OptimizationTarget::Region {
                                    region: key.clone(),
                                    top_board_id: top.board_id.clone(),
                                },
                            },
                            confidence: (top.score * 100.0).clamp(0.0, 100.0),
                            expected_profit: top.projected_revenue,
                            risk: RiskLevel::Low,
                            reasoning: format!("{} now leads {} (was {}).", top.board_id, key, previous),
                            auto_executed: true,
                        },
                        self.clock.now(),
                    )
                    .await;
            }
        }

        Ok(ranked)
    }

    /// Optimize every configured region concurrently. Failures are logged per region.
    pub async fn optimize_all(&self) -> BTreeMap<String, Vec<BoardOptimization>> {
        let regions = self.boards.regions();
        let results = join_all(regions.iter().map(|r| self.optimize_region(r, false))).await;

        regions
            .into_iter()
            .zip(results)
            .filter_map(|(region, result)| match result {
                Ok(ranked) => Some((region, ranked)),
                Err(e) => {
                    warn!("Region {} not optimized: {}", region, e);
                    None
                }
            })
            .collect()
    }

    /// Stop the current region's polling, re-rank `region` and poll it at its own interval.
    /// On failure polling stays stopped.
    pub async fn switch_region(self: &Arc<Self>, region: &str) -> Result<Vec<BoardOptimization>> {
        let key = normalize_region(region);
        let mut state = self.region.lock().await;

        // Stop the old poller before anything else can fail
        if let Some(poller) = state.poller.take() {
            info!("Stopping board polling for {}", poller.region);
            poller.token.cancel();
            if let Err(e) = poller.handle.await {
                warn!("Region poller for {} ended abnormally: {}", poller.region, e);
            }
        }
        state.current = None;

        let ranked = self.optimize_region(&key, true).await?;
        let interval = self
            .boards
            .profile(&key)
            .map(|p| p.poll_interval())
            .ok_or_else(|| DispatchError::RegionNotConfigured(key.clone()))?;

        let token = self.shutdown.child_token();
        let handle = scheduler::spawn_region_poller(Arc::clone(self), key.clone(), interval, token.clone());

        info!("Switched to region {} (polling every {:?})", key, interval);
        state.current = Some(key.clone());
        state.poller = Some(RegionPoller {
            region: key,
            token,
            handle,
        });

        Ok(ranked)
    }

    pub async fn stop_region_polling(&self) {
        let poller = self.region.lock().await.poller.take();
        if let Some(poller) = poller {
            poller.token.cancel();
            if let Err(e) = poller.handle.await {
                warn!("Region poller for {} ended abnormally: {}", poller.region, e);
            }
        }
    }

    pub async fn is_polling_region(&self) -> bool {
        self.region
            .lock()
            .await
            .poller
            .as_ref()
            .map_or(false, |p| !p.handle.is_finished())
    }

    pub async fn current_region(&self) -> Option<String> {
        self.region.lock().await.current.clone()
    }

    // ----- operator and collaborator entry points -----

    /// Returns the previous setting.
    pub fn toggle_autonomous_mode(&self, enabled: bool) -> bool {
        let previous = self.autonomous.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!("Autonomous mode {}", if enabled { "enabled" } else { "disabled" });
        }
        previous
    }

    /// Outcome callback from the assignment collaborator.
    pub async fn report_outcome(&self, decision_id: &str, result: DecisionResult) -> Result<Decision> {
        let decision = self.ledger.record_result(decision_id, result.clone()).await?;

        // Only loads the engine booked itself feed back into driver stats
        if let DecisionKind::Assign {
            worker_id: Some(worker_id),
            ..
        } = &decision.kind
        {
            if decision.auto_executed {
                self.workers.write().await.apply_outcome(worker_id, result.success)?;
                let mut dispatch = self.dispatch.lock().await;
                if let Some(load) = dispatch
                    .acquired
                    .iter_mut()
                    .find(|l| l.decision_id.as_deref() == Some(decision_id))
                {
                    load.actual_profit = Some(result.actual_profit);
                }
            }
        }

        Ok(decision)
    }

    /// Operator-confirmed threshold change, accepted only while self-tuning has a review open.
    pub async fn confirm_threshold_adjustment(&self, new_threshold: f64) -> Result<f64> {
        if !(0.0..=100.0).contains(&new_threshold) {
            return Err(DispatchError::config_error(format!(
                "threshold {} must be within 0..=100",
                new_threshold
            )));
        }

        let mut tuning = self.tuning.lock().await;
        if tuning.review_pending.is_none() {
            return Err(DispatchError::NoReviewPending);
        }
        let previous = tuning.decision_maker.auto_threshold();
        tuning.decision_maker = tuning.decision_maker.with_auto_threshold(new_threshold);
        tuning.review_pending = None;

        info!("Auto threshold changed {:.1} -> {:.1} by operator", previous, new_threshold);
        Ok(previous)
    }

    /// Cancel every loop owned by this engine and wait for region polling to stop.
    pub async fn shutdown(&self) {
        info!("Shutting down dispatch engine");
        self.shutdown.cancel();
        self.stop_region_polling().await;
    }

    // ----- read-only accessors -----

    pub async fn get_autonomous_status(&self) -> AutonomousStatus {
        let (ticks, pending, acquired, review, cumulative, reviews) = {
            let d = self.dispatch.lock().await;
            (
                d.tick,
                d.pending.len(),
                d.acquired.len(),
                d.review_queue.len(),
                d.cumulative_profit,
                d.strategic_reviews,
            )
        };
        let (threshold, margin, review_pending, last_tuning) = {
            let t = self.tuning.lock().await;
            (
                t.decision_maker.auto_threshold(),
                t.decision_maker.min_margin_pct(),
                t.review_pending.is_some(),
                t.last_outcome.clone(),
            )
        };

        AutonomousStatus {
            enabled: self.is_autonomous(),
            current_region: self.current_region().await,
            ticks_completed: ticks,
            pending_opportunities: pending,
            acquired_loads: acquired,
            review_queue: review,
            decisions_logged: self.ledger.len().await,
            cumulative_profit: cumulative,
            rolling_target: self.config.profit_target * reviews.max(1) as f64,
            auto_threshold: threshold,
            min_margin_pct: margin,
            threshold_review_pending: review_pending,
            last_tuning,
        }
    }

    pub async fn get_recent_decisions(&self, limit: usize) -> Vec<Decision> {
        self.ledger.recent(limit).await
    }

    pub async fn get_acquired_loads(&self) -> Vec<AcquiredLoad> {
        self.dispatch.lock().await.acquired.clone()
    }

    pub async fn get_review_queue(&self) -> Vec<ReviewItem> {
        self.dispatch.lock().await.review_queue.clone()
    }

    pub async fn get_managed_drivers(&self) -> Vec<Worker> {
        self.workers.read().await.all()
    }

    pub async fn get_lanes(&self) -> Vec<Lane> {
        self.market.read().await.snapshot()
    }

    pub async fn get_all_regional_optimizations(&self) -> BTreeMap<String, Vec<BoardOptimization>> {
        self.optimizations.read().await.clone()
    }

    pub async fn get_optimization_metrics(&self) -> OptimizationMetrics {
        let decisions = self.ledger.all().await;
        let cumulative = self.dispatch.lock().await.cumulative_profit;

        let mut by_kind = BTreeMap::new();
        for decision in &decisions {
            *by_kind.entry(decision.kind.label().to_string()).or_insert(0) += 1;
        }

        let resolved: Vec<&DecisionResult> = decisions.iter().filter_map(|d| d.result.as_ref()).collect();
        let successes = resolved.iter().filter(|r| r.success).count();
        let average_confidence = if decisions.is_empty() {
            0.0
        } else {
            decisions.iter().map(|d| d.confidence).sum::<f64>() / decisions.len() as f64
        };
        let assignments = || decisions.iter().filter(|d| matches!(d.kind, DecisionKind::Assign { .. }));

        OptimizationMetrics {
            total_decisions: decisions.len(),
            auto_executed: assignments().filter(|d| d.auto_executed).count(),
            manual_review: assignments().filter(|d| !d.auto_executed).count(),
            resolved: resolved.len(),
            success_rate: if resolved.is_empty() {
                None
            } else {
                Some(successes as f64 / resolved.len() as f64)
            },
            average_confidence,
            expected_profit_total: assignments()
                .filter(|d| d.auto_executed)
                .map(|d| d.expected_profit)
                .sum(),
            realized_profit_total: resolved.iter().map(|r| r.actual_profit).sum(),
            cumulative_profit: cumulative,
            profit_target: self.config.profit_target,
            target_progress_pct: cumulative / self.config.profit_target * 100.0,
            decisions_by_kind: by_kind,
        }
    }
}

#[cfg(test)]
mod tests;
