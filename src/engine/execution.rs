use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::monitoring::{Decision, TelegramNotifier};
use crate::sourcing::Opportunity;

/// A load the engine committed to, with the driver it went to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquiredLoad {
    pub opportunity: Opportunity,
    pub worker_id: String,
    pub decision_id: Option<String>,
    pub score: f64,
    pub assigned_at: DateTime<Utc>,
    pub actual_profit: Option<f64>,
}

/// Side effects that follow an assignment. Owned by the host system.
#[async_trait]
pub trait AssignmentExecutor: Send + Sync {
    async fn plan_route(&self, load: &AcquiredLoad) -> Result<()>;

    async fn prepare_documents(&self, load: &AcquiredLoad) -> Result<()>;

    async fn notify_assignment(&self, load: &AcquiredLoad) -> Result<()>;

    async fn raise_alert(&self, decision: &Decision) -> Result<()>;
}

/// Run the post-assignment steps in order. A failing or overrunning step is logged and does not
/// stop the rest. Returns the names of the steps that failed.
pub async fn run_post_assignment(
    executor: &dyn AssignmentExecutor,
    load: &AcquiredLoad,
    limit: Duration,
) -> Vec<&'static str> {
    let mut failed = Vec::new();
    let id = &load.opportunity.id;

    if !bounded_step("route_plan", id, limit, executor.plan_route(load)).await {
        failed.push("route_plan");
    }
    if !bounded_step("documents", id, limit, executor.prepare_documents(load)).await {
        failed.push("documents");
    }
    if !bounded_step("notification", id, limit, executor.notify_assignment(load)).await {
        failed.push("notification");
    }

    failed
}

/// Await one executor call under `limit`. True when it finished cleanly.
pub(crate) async fn bounded_step<F>(step: &str, subject: &str, limit: Duration, call: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{} failed for {}: {}", step, subject, e);
            false
        }
        Err(_) => {
            warn!("{} for {} timed out after {:?}", step, subject, limit);
            false
        }
    }
}

/// Default executor: route and paperwork are recorded in the log, notifications go to Telegram.
pub struct NotifyingExecutor {
    notifier: TelegramNotifier,
}

impl NotifyingExecutor {
    pub fn new(notifier: TelegramNotifier) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl AssignmentExecutor for NotifyingExecutor {
    async fn plan_route(&self, load: &AcquiredLoad) -> Result<()> {
        debug!(
            "Route plan requested for {} on {} ({:.0} mi)",
            load.opportunity.id, load.opportunity.lane, load.opportunity.distance
        );
        Ok(())
    }

    async fn prepare_documents(&self, load: &AcquiredLoad) -> Result<()> {
        debug!("Rate confirmation and BOL requested for {}", load.opportunity.id);
        Ok(())
    }

    async fn notify_assignment(&self, load: &AcquiredLoad) -> Result<()> {
        self.notifier.notify_assignment(&load.opportunity, &load.worker_id).await
    }

    async fn raise_alert(&self, decision: &Decision) -> Result<()> {
        self.notifier.notify_strategic_alert(decision).await
    }
}
