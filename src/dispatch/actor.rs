use actix::prelude::*;
use futures_util::future::join_all;
use std::sync::Arc;

use super::pricer::Pricer;
use super::task::PricingTask;
use crate::domain::request::RequestOperation;
use crate::metrics::Metrics;
use crate::store::LicenseStore;
use crate::utils::{retry_on_transient, RetryConfig, RetryOutcome};

// ============================================================================
// Dispatch Actor
// ============================================================================
//
// The mailbox is the task queue. Each DispatchBatch carries the tasks of one
// completed request; every task is sent on its own with retries, so one slow
// or failing line never holds back the others. Batches run concurrently.
// Nothing here is durable: a restart drops in-flight tasks.
//
// ============================================================================

pub struct DispatchActor {
    pricer: Arc<dyn Pricer>,
    store: Arc<dyn LicenseStore>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
    stats: DispatchStats,
}

impl DispatchActor {
    pub fn new(
        pricer: Arc<dyn Pricer>,
        store: Arc<dyn LicenseStore>,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pricer,
            store,
            retry,
            metrics,
            stats: DispatchStats::default(),
        }
    }
}

impl Actor for DispatchActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            max_attempts = self.retry.max_attempts,
            "DispatchActor started - pricing queue ready"
        );
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct DispatchBatch {
    pub request_id: i64,
    pub tasks: Vec<PricingTask>,
}

#[derive(Message)]
#[rtype(result = "DispatchStats")]
pub struct GetDispatchStats;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches: u64,
    pub delivered: u64,
    pub failed: u64,
}

// ============================================================================
// Handlers
// ============================================================================

impl Handler<DispatchBatch> for DispatchActor {
    type Result = ();

    fn handle(&mut self, msg: DispatchBatch, ctx: &mut Self::Context) -> Self::Result {
        self.stats.batches += 1;

        tracing::info!(
            request_id = msg.request_id,
            tasks = msg.tasks.len(),
            "📤 Dispatching pricing tasks"
        );

        let sends = msg.tasks.into_iter().map(|task| {
            deliver(
                self.pricer.clone(),
                self.store.clone(),
                self.retry.clone(),
                self.metrics.clone(),
                task,
            )
        });

        ctx.spawn(join_all(sends).into_actor(self).map(|outcomes, act, _ctx| {
            for delivered in outcomes {
                if delivered {
                    act.stats.delivered += 1;
                } else {
                    act.stats.failed += 1;
                }
            }
        }));
    }
}

impl Handler<GetDispatchStats> for DispatchActor {
    type Result = MessageResult<GetDispatchStats>;

    fn handle(&mut self, _msg: GetDispatchStats, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.stats.clone())
    }
}

/// Sends one task. Returns whether the pricer accepted it.
async fn deliver(
    pricer: Arc<dyn Pricer>,
    store: Arc<dyn LicenseStore>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
    task: PricingTask,
) -> bool {
    let outcome = retry_on_transient(&retry, "pricing_dispatch", |attempt| {
        metrics.record_dispatch_attempt(attempt);
        let pricer = pricer.clone();
        let task = task.clone();
        async move { pricer.submit(&task).await }
    })
    .await;

    let (error, attempts) = match outcome {
        RetryOutcome::Success(()) => {
            metrics.record_dispatch_outcome(true);
            tracing::debug!(
                request_id = task.request_id,
                service_id = task.service_id,
                "Pricing task accepted"
            );
            return true;
        }
        RetryOutcome::Exhausted { error, attempts }
        | RetryOutcome::Permanent { error, attempts } => (error, attempts),
    };

    metrics.record_dispatch_outcome(false);
    tracing::error!(
        request_id = task.request_id,
        service_id = task.service_id,
        attempts,
        error = %error,
        "💀 Pricing task could not be delivered"
    );

    match store
        .mark_dispatch_failed(
            task.request_id,
            task.service_id,
            RequestOperation::SettlePricing,
        )
        .await
    {
        Ok(true) => {}
        // A timed-out attempt reached the pricer and its callback won.
        Ok(false) => tracing::info!(
            request_id = task.request_id,
            service_id = task.service_id,
            "Line already settled by callback, keeping its price"
        ),
        Err(e) => tracing::warn!(
            request_id = task.request_id,
            service_id = task.service_id,
            error = %e,
            "Could not flag line as dispatch_failed"
        ),
    }

    false
}
