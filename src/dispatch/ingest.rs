use std::sync::Arc;
use tracing::{info, warn};

use super::auth::{Authenticator, CallbackTarget};
use crate::domain::pricing::formula::round_cents;
use crate::domain::pricing::{PricingMode, RecalculationEngine};
use crate::domain::request::{RequestError, RequestOperation};
use crate::metrics::Metrics;
use crate::store::LicenseStore;

// ============================================================================
// Callback Ingestion
// ============================================================================
//
// The pricer reports one sub-total per (request, service). Only completed
// requests accept results, and only when an external pricer is configured.
// Each callback writes its own line and then re-sums the whole request under
// the store's lock, so concurrent callbacks for different lines cannot lose
// each other's contribution. Replaying a callback rewrites the same value and
// yields the same total.

pub struct CallbackIngestor {
    store: Arc<dyn LicenseStore>,
    recalculation: Arc<RecalculationEngine>,
    authenticator: Arc<dyn Authenticator>,
    metrics: Arc<Metrics>,
}

impl CallbackIngestor {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        recalculation: Arc<RecalculationEngine>,
        authenticator: Arc<dyn Authenticator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            recalculation,
            authenticator,
            metrics,
        }
    }

    /// Applies a calculated sub-total. Returns the new request total.
    pub async fn ingest(
        &self,
        target: CallbackTarget,
        credential: Option<&str>,
        sub_total: f64,
    ) -> Result<f64, RequestError> {
        let result = self.apply(target, credential, sub_total).await;

        match &result {
            Ok(total) => {
                self.metrics.record_callback("applied");
                info!(
                    request_id = target.request_id,
                    service_id = target.service_id,
                    sub_total,
                    total,
                    "📥 Applied pricing callback"
                );
            }
            Err(e) => {
                self.metrics.record_callback(e.reason());
                warn!(
                    request_id = target.request_id,
                    service_id = target.service_id,
                    error = %e,
                    "Refused pricing callback"
                );
            }
        }

        result
    }

    async fn apply(
        &self,
        target: CallbackTarget,
        credential: Option<&str>,
        sub_total: f64,
    ) -> Result<f64, RequestError> {
        if self.recalculation.mode() == PricingMode::Synchronous {
            return Err(RequestError::Unauthorized(
                "no external pricer is configured".to_string(),
            ));
        }
        if !self.authenticator.verify(target, credential) {
            return Err(RequestError::Unauthorized(
                "invalid callback credential".to_string(),
            ));
        }

        // Checked after rounding so a stored sub-total is never zero.
        let rounded = round_cents(sub_total);
        if !rounded.is_finite() || rounded <= 0.0 {
            return Err(RequestError::ValidationFailed(format!(
                "subtotal must be at least 0.01 (got {})",
                sub_total
            )));
        }

        self.store
            .record_subtotal(
                target.request_id,
                target.service_id,
                rounded,
                RequestOperation::SettlePricing,
            )
            .await?;

        self.recalculation.recalculate(target.request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::auth::SharedSecretAuthenticator;
    use crate::domain::catalog::LicenseType;
    use crate::domain::identity::Principal;
    use crate::domain::pricing::PricingMode;
    use crate::domain::request::{PricingState, RequestStatus, UsagePatch};
    use crate::store::MemoryStore;
    use crate::test_support::seed_service;
    use chrono::Utc;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        ingestor: CallbackIngestor,
        request_id: i64,
        services: Vec<i64>,
    }

    /// A formed request with two lines; `complete` decides whether it moves on.
    async fn fixture(complete: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut services = Vec::new();
        for name in ["Office", "Backup"] {
            services.push(seed_service(&*store, name, 100.0, LicenseType::PerUser).await.id);
        }

        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();
        for service_id in &services {
            store
                .add_line(draft.id, *service_id, RequestOperation::AddService)
                .await
                .unwrap();
        }
        store
            .update_usage(
                draft.id,
                &UsagePatch {
                    users: Some(5),
                    ..Default::default()
                },
                RequestOperation::UpdateUsage,
            )
            .await
            .unwrap();
        store
            .transition(draft.id, &|r, lines| r.plan_format(lines, true, Utc::now()))
            .await
            .unwrap();
        if complete {
            store
                .transition(draft.id, &|r, _| {
                    r.plan_complete(&Principal::moderator(Uuid::new_v4()), Utc::now())
                })
                .await
                .unwrap();
        }

        Fixture {
            ingestor: ingestor(&store, PricingMode::External),
            store,
            request_id: draft.id,
            services,
        }
    }

    fn ingestor(store: &Arc<MemoryStore>, mode: PricingMode) -> CallbackIngestor {
        let metrics = Arc::new(Metrics::new().unwrap());
        let recalculation = Arc::new(RecalculationEngine::new(
            store.clone(),
            mode,
            metrics.clone(),
        ));
        CallbackIngestor::new(
            store.clone(),
            recalculation,
            Arc::new(SharedSecretAuthenticator::new("key")),
            metrics,
        )
    }

    fn target(fixture: &Fixture, index: usize) -> CallbackTarget {
        CallbackTarget {
            request_id: fixture.request_id,
            service_id: fixture.services[index],
        }
    }

    #[tokio::test]
    async fn test_callbacks_accumulate_into_total() {
        let fx = fixture(true).await;

        let total = fx.ingestor.ingest(target(&fx, 0), Some("key"), 600.0).await.unwrap();
        assert_eq!(total, 600.0);
        let total = fx.ingestor.ingest(target(&fx, 1), Some("key"), 250.5).await.unwrap();
        assert_eq!(total, 850.5);

        let lines = fx.store.list_lines(fx.request_id).await.unwrap();
        assert!(lines.iter().all(|l| l.pricing_state == PricingState::Priced));
        let request = fx.store.get_request(fx.request_id).await.unwrap().unwrap();
        assert_eq!(request.total_cost, 850.5);
    }

    #[tokio::test]
    async fn test_duplicate_callback_is_idempotent() {
        let fx = fixture(true).await;

        let first = fx.ingestor.ingest(target(&fx, 0), Some("key"), 600.0).await.unwrap();
        let again = fx.ingestor.ingest(target(&fx, 0), Some("key"), 600.0).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(fx.store.list_lines(fx.request_id).await.unwrap()[0].sub_total, 600.0);
    }

    #[tokio::test]
    async fn test_concurrent_callbacks_do_not_clobber() {
        let fx = fixture(true).await;

        let (a, b) = tokio::join!(
            fx.ingestor.ingest(target(&fx, 0), Some("key"), 100.0),
            fx.ingestor.ingest(target(&fx, 1), Some("key"), 200.0),
        );
        a.unwrap();
        b.unwrap();

        let request = fx.store.get_request(fx.request_id).await.unwrap().unwrap();
        assert_eq!(request.total_cost, 300.0);
    }

    #[tokio::test]
    async fn test_bad_credential_and_bad_value() {
        let fx = fixture(true).await;

        assert!(matches!(
            fx.ingestor.ingest(target(&fx, 0), Some("nope"), 600.0).await,
            Err(RequestError::Unauthorized(_))
        ));
        assert!(matches!(
            fx.ingestor.ingest(target(&fx, 0), None, 600.0).await,
            Err(RequestError::Unauthorized(_))
        ));
        assert!(matches!(
            fx.ingestor.ingest(target(&fx, 0), Some("key"), 0.0).await,
            Err(RequestError::ValidationFailed(_))
        ));
        assert!(matches!(
            fx.ingestor.ingest(target(&fx, 0), Some("key"), f64::INFINITY).await,
            Err(RequestError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_callback_before_completion_is_refused() {
        let fx = fixture(false).await;

        let err = fx
            .ingestor
            .ingest(target(&fx, 0), Some("key"), 600.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::InvalidState {
                status: RequestStatus::Formed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_line_is_not_found() {
        let fx = fixture(true).await;
        let unknown = CallbackTarget {
            request_id: fx.request_id,
            service_id: 999,
        };

        assert!(matches!(
            fx.ingestor.ingest(unknown, Some("key"), 10.0).await,
            Err(RequestError::LineNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_subtotal_rounding_to_zero_is_refused() {
        let fx = fixture(true).await;

        assert!(matches!(
            fx.ingestor.ingest(target(&fx, 0), Some("key"), 0.004).await,
            Err(RequestError::ValidationFailed(_))
        ));

        let line = fx.store.list_lines(fx.request_id).await.unwrap()[0].clone();
        assert_eq!(line.pricing_state, PricingState::Pending);
        assert_eq!(line.sub_total, 0.0);

        // Half a cent rounds up to a cent and is accepted.
        let total = fx.ingestor.ingest(target(&fx, 0), Some("key"), 0.005).await.unwrap();
        assert_eq!(total, 0.01);
    }

    #[tokio::test]
    async fn test_callback_for_deleted_request_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let service = seed_service(&*store, "Office", 100.0, LicenseType::PerUser).await;
        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();
        store
            .add_line(draft.id, service.id, RequestOperation::AddService)
            .await
            .unwrap();
        store
            .transition(draft.id, &|r, _| r.plan_delete(Utc::now()))
            .await
            .unwrap();

        let target = CallbackTarget {
            request_id: draft.id,
            service_id: service.id,
        };
        let ingestor = ingestor(&store, PricingMode::External);

        assert!(matches!(
            ingestor.ingest(target, Some("key"), 600.0).await,
            Err(RequestError::RequestNotFound(id)) if id == draft.id
        ));
    }

    #[tokio::test]
    async fn test_callbacks_refused_without_external_pricer() {
        let fx = fixture(true).await;
        let local = ingestor(&fx.store, PricingMode::Synchronous);

        assert!(matches!(
            local.ingest(target(&fx, 0), Some("key"), 600.0).await,
            Err(RequestError::Unauthorized(_))
        ));
        assert_eq!(
            fx.store.list_lines(fx.request_id).await.unwrap()[0].pricing_state,
            PricingState::Pending
        );
    }
}
