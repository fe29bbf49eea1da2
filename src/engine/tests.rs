use super::clock::ManualClock;
use super::execution::fixtures::RecordingExecutor;
use super::*;
use crate::fleet::registry::fixtures::worker;
use crate::fleet::AutomationLevel;
use crate::market::RouteConditions;
use crate::oracle::LocalHeuristicOracle;
use crate::sourcing::opportunity::fixtures::load_with_margin;
use crate::sourcing::{Capability, EquipmentClass};
use async_trait::async_trait;
use chrono::TimeZone;
use std::time::Duration;

fn tuesday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 15, 10, 0, 0).unwrap()
}

fn hot_lane() -> Lane {
    Lane::new("Chicago", "Atlanta", 700.0, 2.6)
        .with_levels(90.0, 20.0, 10.0)
        .with_conditions(RouteConditions {
            backhaul_availability: 70.0,
            weather_risk: 10.0,
            traffic_congestion: 20.0,
            fuel_cost_index: 100.0,
        })
}

struct Harness {
    engine: Arc<AutonomousEngine>,
    executor: Arc<RecordingExecutor>,
    lane: String,
}

fn harness_with(config: EngineConfig, oracle: Arc<dyn ScoringOracle>, metric: f64) -> Harness {
    harness_with_executor(config, oracle, metric, RecordingExecutor::default())
}

fn harness_with_executor(
    config: EngineConfig,
    oracle: Arc<dyn ScoringOracle>,
    metric: f64,
    executor: RecordingExecutor,
) -> Harness {
    let lane = hot_lane();
    let key = lane.key();
    let executor = Arc::new(executor);
    let engine = EngineBuilder::new(config)
        .market(MarketModel::with_lanes([lane]))
        .workers(WorkerRegistry::with_workers([worker(
            "d1",
            AutomationLevel::Autonomous,
            &[Capability::DryVan],
            0.0,
            metric,
        )]))
        .oracle(oracle)
        .executor(executor.clone())
        .clock(Arc::new(ManualClock::new(tuesday_morning())))
        .build()
        .unwrap();

    Harness {
        engine,
        executor,
        lane: key,
    }
}

fn harness() -> Harness {
    harness_with(
        EngineConfig {
            rng_seed: Some(7),
            ..EngineConfig::default()
        },
        Arc::new(LocalHeuristicOracle),
        95.0,
    )
}

fn ok(actual_profit: f64) -> DecisionResult {
    DecisionResult {
        success: true,
        actual_profit,
        learning_points: Vec::new(),
    }
}

fn failed() -> DecisionResult {
    DecisionResult {
        success: false,
        actual_profit: 0.0,
        learning_points: vec!["late pickup".to_string()],
    }
}

#[tokio::test]
async fn strong_load_is_auto_assigned() {
    let h = harness();
    let report = h
        .engine
        .process_opportunities(vec![load_with_margin("l1", &h.lane, 25.0)])
        .await
        .unwrap();

    assert_eq!(report.auto_executed, 1);
    assert_eq!(report.held_for_review, 0);
    assert!(report.phases.contains(&Phase::Assign));
    assert_eq!(report.decisions.len(), 1);

    let decisions = h.engine.get_recent_decisions(10).await;
    assert!(decisions[0].auto_executed);
    assert!(matches!(
        &decisions[0].kind,
        DecisionKind::Assign { opportunity_id, worker_id: Some(w) } if opportunity_id == "l1" && w == "d1"
    ));

    let acquired = h.engine.get_acquired_loads().await;
    assert_eq!(acquired.len(), 1);
    assert_eq!(acquired[0].decision_id.as_deref(), Some(decisions[0].id.as_str()));
    assert_eq!(h.executor.calls(), vec!["route:l1", "docs:l1", "notify:l1"]);

    let drivers = h.engine.get_managed_drivers().await;
    assert_eq!(drivers[0].performance_metrics.profit_generated, 500.0);
}

#[tokio::test]
async fn thin_margin_goes_to_review() {
    let h = harness();
    let report = h
        .engine
        .process_opportunities(vec![load_with_margin("l1", &h.lane, 10.0)])
        .await
        .unwrap();

    assert_eq!(report.auto_executed, 0);
    assert_eq!(report.held_for_review, 1);
    assert!(report.phases.contains(&Phase::Skip));
    assert!(h.engine.get_acquired_loads().await.is_empty());
    assert!(h.executor.calls().is_empty());

    let decision = &h.engine.get_recent_decisions(1).await[0];
    assert!(!decision.auto_executed);
    assert!(decision.reasoning.contains("Margin below minimum"));

    let queue = h.engine.get_review_queue().await;
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].decision_id.as_deref(), Some(decision.id.as_str()));
}

#[tokio::test]
async fn a_load_is_never_assigned_twice() {
    let h = harness();
    let load = load_with_margin("l1", &h.lane, 25.0);
    h.engine.process_opportunities(vec![load.clone()]).await.unwrap();
    let second = h.engine.process_opportunities(vec![load]).await.unwrap();

    assert_eq!(second.auto_executed, 0);
    assert!(second.decisions.is_empty());
    assert_eq!(h.engine.get_acquired_loads().await.len(), 1);
}

#[tokio::test]
async fn unmatched_load_waits_then_expires() {
    let h = harness();
    let mut load = load_with_margin("l1", &h.lane, 25.0);
    load.equipment_class = EquipmentClass::Reefer;

    let first = h.engine.process_opportunities(vec![load]).await.unwrap();
    assert_eq!(first.unmatched, 1);
    assert_eq!(h.engine.get_autonomous_status().await.pending_opportunities, 1);

    h.engine.process_opportunities(Vec::new()).await.unwrap();
    h.engine.process_opportunities(Vec::new()).await.unwrap();
    let fourth = h.engine.process_opportunities(Vec::new()).await.unwrap();
    assert_eq!(fourth.expired, 1);
    assert_eq!(h.engine.get_autonomous_status().await.pending_opportunities, 0);
}

struct SlowOracle;

#[async_trait]
impl ScoringOracle for SlowOracle {
    fn name(&self) -> &str {
        "slow"
    }

    async fn evaluate(&self, _o: &Opportunity, _c: &OracleContext) -> Result<OracleVerdict> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(DispatchError::oracle_error("unreachable"))
    }
}

#[tokio::test]
async fn slow_oracle_falls_back_within_the_tick() {
    let h = harness_with(
        EngineConfig {
            oracle_timeout_ms: 50,
            rng_seed: Some(7),
            ..EngineConfig::default()
        },
        Arc::new(SlowOracle),
        95.0,
    );

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine.process_opportunities(vec![load_with_margin("l1", &h.lane, 25.0)]),
    )
    .await
    .expect("tick blocked on the oracle")
    .unwrap();

    assert_eq!(report.auto_executed, 1);
    let decision = &h.engine.get_recent_decisions(1).await[0];
    assert!(decision.reasoning.contains("oracle unavailable"));
}

#[tokio::test]
async fn oracle_budget_is_shared_across_the_batch() {
    let h = harness_with(
        EngineConfig {
            oracle_timeout_ms: 300,
            rng_seed: Some(7),
            ..EngineConfig::default()
        },
        Arc::new(SlowOracle),
        95.0,
    );
    let batch: Vec<Opportunity> = (1..=5)
        .map(|i| load_with_margin(&format!("l{}", i), &h.lane, 25.0))
        .collect();

    let started = std::time::Instant::now();
    let report = h.engine.process_opportunities(batch).await.unwrap();
    let elapsed = started.elapsed();

    // five sequential timeouts would take 1.5s
    assert!(elapsed < Duration::from_millis(1_000), "tick took {:?}", elapsed);
    assert_eq!(report.scored, 5);
    assert_eq!(report.auto_executed, 5);

    let decisions = h.engine.get_recent_decisions(10).await;
    assert_eq!(decisions.len(), 5);
    assert!(decisions.iter().all(|d| d.reasoning.contains("oracle unavailable")));
}

#[tokio::test]
async fn hung_notifications_do_not_wedge_the_engine() {
    let h = harness_with_executor(
        EngineConfig {
            executor_timeout_ms: 50,
            rng_seed: Some(7),
            ..EngineConfig::default()
        },
        Arc::new(LocalHeuristicOracle),
        95.0,
        RecordingExecutor {
            hang_messages: true,
            ..RecordingExecutor::default()
        },
    );

    let report = tokio::time::timeout(
        Duration::from_secs(3),
        h.engine.process_opportunities(vec![load_with_margin("l1", &h.lane, 25.0)]),
    )
    .await
    .expect("tick blocked on the executor")
    .unwrap();

    assert_eq!(report.auto_executed, 1);
    let decisions = h.engine.get_recent_decisions(10).await;
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].reasoning.contains("notification"));
    assert!(!decisions[0].reasoning.contains("route_plan"));

    let outcome = tokio::time::timeout(Duration::from_secs(3), h.engine.run_strategic_tick())
        .await
        .expect("strategic tick blocked on the alert")
        .unwrap();
    assert!(matches!(outcome, Some(StrategicOutcome::ExpandCapacity { .. })));
    assert_eq!(h.engine.get_recent_decisions(1).await[0].kind.label(), "expand_capacity");

    tokio::time::timeout(Duration::from_secs(3), h.engine.shutdown())
        .await
        .expect("shutdown blocked");
}

/// Falls back after a short think, long enough to be caught mid-tick.
struct DelayedOracle;

#[async_trait]
impl ScoringOracle for DelayedOracle {
    fn name(&self) -> &str {
        "delayed"
    }

    async fn evaluate(&self, o: &Opportunity, _c: &OracleContext) -> Result<OracleVerdict> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(crate::oracle::agent::fallback_verdict(o))
    }
}

#[tokio::test]
async fn stopping_mid_tick_still_logs_its_decisions() {
    let engine = EngineBuilder::new(EngineConfig {
        market_tick_interval_secs: 3_600,
        decision_tick_interval_secs: 1,
        strategic_interval_secs: 3_600,
        oracle_timeout_ms: 2_000,
        rng_seed: Some(42),
        ..EngineConfig::default()
    })
    .workers(WorkerRegistry::with_workers([worker(
        "any",
        AutomationLevel::Autonomous,
        &[
            Capability::DryVan,
            Capability::Reefer,
            Capability::Flatbed,
            Capability::StepDeck,
            Capability::PowerOnly,
            Capability::Hazmat,
            Capability::Expedite,
        ],
        0.0,
        95.0,
    )]))
    .oracle(Arc::new(DelayedOracle))
    .executor(Arc::new(RecordingExecutor::default()))
    .clock(Arc::new(ManualClock::new(tuesday_morning())))
    .build()
    .unwrap();

    let handle = scheduler::spawn(Arc::clone(&engine));
    // first decision tick fires at 1s and spends 500ms in the oracle
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("scheduler did not stop");

    // every generated batch carries at least three loads, all haulable by "any"
    let status = engine.get_autonomous_status().await;
    assert_eq!(status.ticks_completed, 1);
    assert!(status.decisions_logged >= 3);
    assert_eq!(status.pending_opportunities, 0);
}

#[tokio::test]
async fn unknown_region_stops_previous_polling() {
    let h = harness();
    let ranked = h.engine.switch_region("north_america").await.unwrap();
    assert!(!ranked.is_empty());
    assert!(h.engine.is_polling_region().await);
    assert_eq!(h.engine.current_region().await.as_deref(), Some("north_america"));

    let err = h.engine.switch_region("antarctica").await.unwrap_err();
    assert!(matches!(err, DispatchError::RegionNotConfigured(_)));
    assert!(!h.engine.is_polling_region().await);
    assert_eq!(h.engine.current_region().await, None);
}

#[tokio::test]
async fn optimize_all_covers_every_region() {
    let h = harness();
    let all = h.engine.optimize_all().await;
    assert_eq!(all.len(), 4);
    assert_eq!(h.engine.get_all_regional_optimizations().await, all);
}

#[tokio::test]
async fn outcomes_are_recorded_once() {
    let h = harness();
    let report = h
        .engine
        .process_opportunities(vec![load_with_margin("l1", &h.lane, 25.0)])
        .await
        .unwrap();
    let id = &report.decisions[0];

    let decision = h.engine.report_outcome(id, ok(480.0)).await.unwrap();
    assert_eq!(decision.result, Some(ok(480.0)));
    assert_eq!(h.engine.get_acquired_loads().await[0].actual_profit, Some(480.0));
    assert_eq!(h.engine.get_managed_drivers().await[0].success_streak, 1);

    let again = h.engine.report_outcome(id, failed()).await.unwrap_err();
    assert!(matches!(again, DispatchError::OutcomeAlreadyRecorded(_)));

    let missing = h.engine.report_outcome("dec-missing", ok(1.0)).await.unwrap_err();
    assert!(matches!(missing, DispatchError::UnknownDecision(_)));
}

#[tokio::test]
async fn poor_results_open_a_threshold_review() {
    let h = harness_with(
        EngineConfig {
            tuning_window: 2,
            tuning_every_ticks: 3,
            rng_seed: Some(7),
            ..EngineConfig::default()
        },
        Arc::new(LocalHeuristicOracle),
        95.0,
    );

    assert!(matches!(
        h.engine.confirm_threshold_adjustment(70.0).await,
        Err(DispatchError::NoReviewPending)
    ));

    for id in ["l1", "l2"] {
        let report = h
            .engine
            .process_opportunities(vec![load_with_margin(id, &h.lane, 25.0)])
            .await
            .unwrap();
        h.engine.report_outcome(&report.decisions[0], failed()).await.unwrap();
    }
    let third = h.engine.process_opportunities(Vec::new()).await.unwrap();
    assert!(matches!(third.tuning, Some(TuningOutcome::FlagForAdjustment { .. })));

    let status = h.engine.get_autonomous_status().await;
    assert!(status.threshold_review_pending);
    assert_eq!(status.auto_threshold, 65.0);
    assert_eq!(h.engine.get_recent_decisions(1).await[0].kind.label(), "adapt");

    assert_eq!(h.engine.confirm_threshold_adjustment(70.0).await.unwrap(), 65.0);
    let status = h.engine.get_autonomous_status().await;
    assert_eq!(status.auto_threshold, 70.0);
    assert!(!status.threshold_review_pending);

    // ticks 4..=6 tune again over the same two failures
    for _ in 0..3 {
        h.engine.process_opportunities(Vec::new()).await.unwrap();
    }
    let status = h.engine.get_autonomous_status().await;
    assert!(!status.threshold_review_pending);
    assert_eq!(status.auto_threshold, 70.0);
    let adapts = h
        .engine
        .get_recent_decisions(usize::MAX)
        .await
        .into_iter()
        .filter(|d| d.kind.label() == "adapt")
        .count();
    assert_eq!(adapts, 1);
}

#[tokio::test]
async fn profit_shortfall_expands_capacity() {
    let h = harness();
    let outcome = h.engine.run_strategic_tick().await.unwrap();
    assert!(matches!(outcome, Some(StrategicOutcome::ExpandCapacity { .. })));

    let decision = &h.engine.get_recent_decisions(1).await[0];
    assert_eq!(decision.kind.label(), "expand_capacity");
    assert_eq!(h.executor.calls(), vec!["alert:expand_capacity"]);
}

#[tokio::test]
async fn profit_surplus_tightens_the_fleet() {
    let h = harness_with(
        EngineConfig {
            profit_target: 1_000.0,
            rng_seed: Some(7),
            ..EngineConfig::default()
        },
        Arc::new(LocalHeuristicOracle),
        80.0,
    );
    h.engine.dispatch.lock().await.cumulative_profit = 2_000.0;

    let outcome = h.engine.run_strategic_tick().await.unwrap();
    assert!(matches!(outcome, Some(StrategicOutcome::Optimize { .. })));
    assert_eq!(h.engine.get_managed_drivers().await[0].performance_metrics.efficiency_rate, 82.0);
    assert_eq!(h.engine.get_recent_decisions(1).await[0].kind.label(), "optimize");
}

#[tokio::test]
async fn paused_engine_skips_ticks() {
    let h = harness();
    assert!(h.engine.toggle_autonomous_mode(false));
    assert!(h.engine.run_decision_tick().await.unwrap().is_none());
    assert!(h.engine.run_strategic_tick().await.unwrap().is_none());
    assert_eq!(h.engine.get_autonomous_status().await.ticks_completed, 0);

    assert!(!h.engine.toggle_autonomous_mode(true));
    assert!(h.engine.run_decision_tick().await.unwrap().is_some());
}

#[tokio::test]
async fn metrics_summarize_the_ledger() {
    let h = harness();
    let report = h
        .engine
        .process_opportunities(vec![
            load_with_margin("l1", &h.lane, 25.0),
            load_with_margin("l2", &h.lane, 5.0),
        ])
        .await
        .unwrap();
    h.engine.report_outcome(&report.decisions[0], ok(450.0)).await.unwrap();

    let metrics = h.engine.get_optimization_metrics().await;
    assert_eq!(metrics.total_decisions, 2);
    assert_eq!(metrics.auto_executed, 1);
    assert_eq!(metrics.manual_review, 1);
    assert_eq!(metrics.success_rate, Some(1.0));
    assert_eq!(metrics.realized_profit_total, 450.0);
    assert_eq!(metrics.decisions_by_kind.get("assign"), Some(&2));
}

#[tokio::test]
async fn same_seed_replays_the_same_run() {
    async fn run() -> Vec<Decision> {
        let engine = EngineBuilder::new(EngineConfig {
            rng_seed: Some(42),
            ..EngineConfig::default()
        })
        .oracle(Arc::new(LocalHeuristicOracle))
        .executor(Arc::new(RecordingExecutor::default()))
        .clock(Arc::new(ManualClock::new(tuesday_morning())))
        .build()
        .unwrap();

        for _ in 0..3 {
            engine.run_market_tick().await.unwrap();
            engine.run_decision_tick().await.unwrap();
        }
        engine.ledger.all().await
    }

    let first = run().await;
    assert!(!first.is_empty());
    assert_eq!(first, run().await);
}

#[tokio::test]
async fn empty_market_is_rejected() {
    let err = EngineBuilder::new(EngineConfig::default())
        .market(MarketModel::new())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, DispatchError::NoLanes));
}
