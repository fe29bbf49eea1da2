use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::AutonomousEngine;
use crate::error::Result;

/// Handles for the three engine loops.
pub struct SchedulerHandle {
    engine: Arc<AutonomousEngine>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl SchedulerHandle {
    pub fn loop_names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    /// Cancel every loop and wait for in-flight ticks to finish.
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(phase = name, "loop ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

/// Start the market, decision and strategic loops on the current runtime.
pub fn spawn(engine: Arc<AutonomousEngine>) -> SchedulerHandle {
    let config = engine.config().clone();

    let handles = vec![
        (
            "market",
            spawn_loop(Arc::clone(&engine), "market", config.market_tick_interval(), |engine| async move {
                engine.run_market_tick().await
            }),
        ),
        (
            "decision",
            spawn_loop(Arc::clone(&engine), "decision", config.decision_tick_interval(), |engine| async move {
                engine.run_decision_tick().await
            }),
        ),
        (
            "strategic",
            spawn_loop(Arc::clone(&engine), "strategic", config.strategic_interval(), |engine| async move {
                engine.run_strategic_tick().await
            }),
        ),
    ];

    info!(
        "Scheduler started: market every {:?}, decisions every {:?}, strategy every {:?}",
        config.market_tick_interval(),
        config.decision_tick_interval(),
        config.strategic_interval()
    );

    SchedulerHandle { engine, handles }
}

/// Re-optimize one region until `token` fires. The first run happens one period from now.
pub(crate) fn spawn_region_poller(
    engine: Arc<AutonomousEngine>,
    region: String,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let engine = Arc::clone(&engine);
                    let region = region.clone();
                    run_guarded("region_poll", async move { engine.optimize_region(&region, true).await }).await;
                }
            }
        }
        debug!("Board polling for {} stopped", region);
    })
}

fn spawn_loop<F, Fut, T>(
    engine: Arc<AutonomousEngine>,
    name: &'static str,
    period: Duration,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<AutonomousEngine>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let token = engine.shutdown_token();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    run_guarded(name, tick(Arc::clone(&engine))).await;
                }
            }
        }
        debug!("{} loop stopped", name);
    })
}

/// Run one tick in its own task so an error or panic is logged and the loop keeps going.
pub(crate) async fn run_guarded<Fut, T>(phase: &'static str, tick: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(tick).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) if e.is_configuration() => {
            error!(phase, "configuration problem: {}", e);
            None
        }
        Ok(Err(e)) => {
            error!(phase, "tick failed: {}", e);
            None
        }
        Err(e) => {
            error!(phase, "tick panicked: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::EngineBuilder;
    use crate::error::DispatchError;

    #[tokio::test]
    async fn panicking_tick_is_contained() {
        let result: Option<()> = run_guarded("test", async {
            if true {
                panic!("tick exploded");
            }
            Ok(())
        })
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn failing_tick_returns_none() {
        let result: Option<()> = run_guarded("test", async { Err(DispatchError::NoLanes) }).await;
        assert!(result.is_none());
        assert_eq!(run_guarded("test", async { Ok(7) }).await, Some(7));
    }

    #[tokio::test]
    async fn shutdown_joins_every_loop() {
        let engine = EngineBuilder::new(EngineConfig {
            rng_seed: Some(1),
            ..EngineConfig::default()
        })
        .build()
        .unwrap();
        engine.switch_region("north_america").await.unwrap();

        let handle = spawn(Arc::clone(&engine));
        assert_eq!(handle.loop_names(), vec!["market", "decision", "strategic"]);

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("scheduler did not stop");
        assert!(!engine.is_polling_region().await);
    }
}
