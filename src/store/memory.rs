use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DecideTransition, LicenseStore, PlanRepricing, RequestFilter, StoreResult};
use crate::domain::catalog::{LicenseService, NewService, ServiceUpdate};
use crate::domain::pricing::{PricingSnapshot, SnapshotLine};
use crate::domain::request::{
    reset_line, LicenseRequest, PricingState, RequestError, RequestLine, RequestOperation,
    RequestStatus, SupportCoefficient, UsagePatch,
};

// ============================================================================
// In-memory store
// ============================================================================
//
// One async mutex around all state serializes every operation, which gives
// the same per-request guarantees the row locks give in PostgreSQL. Used when
// no database is configured and throughout the tests.

#[derive(Default)]
struct State {
    services: BTreeMap<i64, LicenseService>,
    requests: BTreeMap<i64, LicenseRequest>,
    lines: BTreeMap<i64, RequestLine>,
    next_service_id: i64,
    next_request_id: i64,
    next_line_id: i64,
}

impl State {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn guarded(
        &self,
        request_id: i64,
        operation: RequestOperation,
    ) -> Result<&LicenseRequest, RequestError> {
        let request = self
            .requests
            .get(&request_id)
            .ok_or(RequestError::RequestNotFound(request_id))?;
        request.guard(operation)?;
        Ok(request)
    }

    fn lines_of(&self, request_id: i64) -> Vec<RequestLine> {
        self.lines
            .values()
            .filter(|line| line.request_id == request_id)
            .cloned()
            .collect()
    }

    fn line_mut(
        &mut self,
        request_id: i64,
        service_id: i64,
    ) -> Result<&mut RequestLine, RequestError> {
        self.lines
            .values_mut()
            .find(|line| line.request_id == request_id && line.service_id == service_id)
            .ok_or(RequestError::LineNotFound {
                request_id,
                service_id,
            })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LicenseStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn list_services(&self, name_query: Option<&str>) -> StoreResult<Vec<LicenseService>> {
        let state = self.state.lock().await;
        let needle = name_query.map(str::to_lowercase);

        Ok(state
            .services
            .values()
            .filter(|service| service.is_live())
            .filter(|service| match &needle {
                Some(needle) => service.name.to_lowercase().contains(needle),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_service(&self, id: i64) -> StoreResult<Option<LicenseService>> {
        Ok(self.state.lock().await.services.get(&id).cloned())
    }

    async fn create_service(&self, service: NewService) -> StoreResult<LicenseService> {
        let mut state = self.state.lock().await;
        let id = State::next_id(&mut state.next_service_id);
        let service = LicenseService {
            id,
            name: service.name,
            description: service.description,
            base_price: service.base_price,
            license_type: service.license_type,
            image_url: None,
            is_deleted: false,
        };
        state.services.insert(id, service.clone());
        Ok(service)
    }

    async fn update_service(
        &self,
        id: i64,
        update: &ServiceUpdate,
    ) -> StoreResult<Option<LicenseService>> {
        let mut state = self.state.lock().await;
        Ok(state
            .services
            .get_mut(&id)
            .filter(|service| service.is_live())
            .map(|service| {
                update.apply_to(service);
                service.clone()
            }))
    }

    async fn delete_service(&self, id: i64) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.services.get_mut(&id) {
            Some(service) if service.is_live() => {
                service.is_deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_service_image(&self, id: i64, image_url: Option<&str>) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.services.get_mut(&id) {
            Some(service) if service.is_live() => {
                service.image_url = image_url.map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_request(&self, id: i64) -> StoreResult<Option<LicenseRequest>> {
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn find_draft(&self, creator_id: Uuid) -> StoreResult<Option<LicenseRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .find(|r| r.creator_id == creator_id && r.status == RequestStatus::Draft)
            .cloned())
    }

    async fn get_or_create_draft(&self, creator_id: Uuid) -> StoreResult<(LicenseRequest, bool)> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .requests
            .values()
            .find(|r| r.creator_id == creator_id && r.status == RequestStatus::Draft)
        {
            return Ok((existing.clone(), false));
        }

        let id = State::next_id(&mut state.next_request_id);
        let draft = LicenseRequest::new_draft(id, creator_id, Utc::now());
        state.requests.insert(id, draft.clone());
        Ok((draft, true))
    }

    async fn list_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<LicenseRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect())
    }

    async fn list_lines(&self, request_id: i64) -> StoreResult<Vec<RequestLine>> {
        Ok(self.state.lock().await.lines_of(request_id))
    }

    async fn add_line(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<bool, RequestError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.guarded(request_id, operation)?;

        match state.services.get(&service_id) {
            Some(service) if service.is_live() => {}
            _ => return Err(RequestError::ServiceNotFound(service_id)),
        }

        let present = state
            .lines
            .values()
            .any(|line| line.request_id == request_id && line.service_id == service_id);
        if present {
            return Ok(false);
        }

        let id = State::next_id(&mut state.next_line_id);
        state.lines.insert(
            id,
            RequestLine {
                id,
                request_id,
                service_id,
                support_coefficient: SupportCoefficient::DEFAULT,
                sub_total: 0.0,
                pricing_state: PricingState::Pending,
            },
        );
        Ok(true)
    }

    async fn remove_line(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<(), RequestError> {
        let mut state = self.state.lock().await;
        state.guarded(request_id, operation)?;

        let line_id = state.line_mut(request_id, service_id)?.id;
        state.lines.remove(&line_id);
        Ok(())
    }

    async fn set_support_coefficient(
        &self,
        request_id: i64,
        service_id: i64,
        coefficient: SupportCoefficient,
        operation: RequestOperation,
    ) -> Result<(), RequestError> {
        let mut state = self.state.lock().await;
        state.guarded(request_id, operation)?;

        state.line_mut(request_id, service_id)?.support_coefficient = coefficient.value();
        Ok(())
    }

    async fn update_usage(
        &self,
        request_id: i64,
        patch: &UsagePatch,
        operation: RequestOperation,
    ) -> Result<LicenseRequest, RequestError> {
        let mut state = self.state.lock().await;
        state.guarded(request_id, operation)?;

        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(RequestError::RequestNotFound(request_id))?;
        patch.apply_to(&mut request.usage);
        Ok(request.clone())
    }

    async fn transition(
        &self,
        request_id: i64,
        decide: &DecideTransition,
    ) -> Result<LicenseRequest, RequestError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let lines = state.lines_of(request_id);
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(RequestError::RequestNotFound(request_id))?;

        let transition = decide(request, &lines)?;
        request.apply_transition(&transition);
        let updated = request.clone();

        if transition.reset_pricing {
            state
                .lines
                .values_mut()
                .filter(|line| line.request_id == request_id)
                .for_each(reset_line);
        }

        Ok(updated)
    }

    async fn record_subtotal(
        &self,
        request_id: i64,
        service_id: i64,
        sub_total: f64,
        operation: RequestOperation,
    ) -> Result<(), RequestError> {
        let mut state = self.state.lock().await;
        state.guarded(request_id, operation)?;

        let line = state.line_mut(request_id, service_id)?;
        line.sub_total = sub_total;
        line.pricing_state = PricingState::Priced;
        Ok(())
    }

    async fn mark_dispatch_failed(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<bool, RequestError> {
        let mut state = self.state.lock().await;
        state.guarded(request_id, operation)?;

        let line = state.line_mut(request_id, service_id)?;
        if line.pricing_state != PricingState::Pending {
            return Ok(false);
        }
        line.pricing_state = PricingState::DispatchFailed;
        Ok(true)
    }

    async fn reprice(&self, request_id: i64, plan: &PlanRepricing) -> Result<f64, RequestError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let request = state
            .requests
            .get(&request_id)
            .filter(|r| !r.is_deleted())
            .cloned()
            .ok_or(RequestError::RequestNotFound(request_id))?;

        let lines = state
            .lines_of(request_id)
            .into_iter()
            .map(|line| SnapshotLine {
                service: state.services.get(&line.service_id).cloned(),
                line,
            })
            .collect();

        let repricing = plan(&PricingSnapshot { request, lines });

        for update in &repricing.lines {
            if let Some(line) = state.lines.get_mut(&update.line_id) {
                line.sub_total = update.sub_total;
                line.pricing_state = update.pricing_state;
            }
        }
        if let Some(request) = state.requests.get_mut(&request_id) {
            request.total_cost = repricing.total_cost;
        }

        Ok(repricing.total_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::LicenseType;
    use crate::domain::identity::Principal;
    use crate::domain::pricing::{plan_repricing, PricingMode};

    async fn seeded() -> (MemoryStore, LicenseService) {
        let store = MemoryStore::new();
        let service = store
            .create_service(NewService {
                name: "Office Suite".to_string(),
                description: String::new(),
                base_price: 16100.0,
                license_type: LicenseType::PerUser,
            })
            .await
            .unwrap();
        (store, service)
    }

    #[tokio::test]
    async fn test_one_draft_per_creator() {
        let store = MemoryStore::new();
        let creator = Uuid::new_v4();

        let (first, created) = store.get_or_create_draft(creator).await.unwrap();
        let (second, created_again) = store.get_or_create_draft(creator).await.unwrap();

        assert!(created);
        assert!(!created_again);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_add_line_twice_keeps_one_line() {
        let (store, service) = seeded().await;
        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();

        assert!(store
            .add_line(draft.id, service.id, RequestOperation::AddService)
            .await
            .unwrap());
        assert!(!store
            .add_line(draft.id, service.id, RequestOperation::AddService)
            .await
            .unwrap());
        assert_eq!(store.list_lines(draft.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_line_requires_live_service() {
        let (store, service) = seeded().await;
        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();
        store.delete_service(service.id).await.unwrap();

        let err = store
            .add_line(draft.id, service.id, RequestOperation::AddService)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn test_transition_reset_zeroes_lines() {
        let (store, service) = seeded().await;
        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();
        store
            .add_line(draft.id, service.id, RequestOperation::AddService)
            .await
            .unwrap();
        store
            .update_usage(
                draft.id,
                &UsagePatch {
                    users: Some(120),
                    ..Default::default()
                },
                RequestOperation::UpdateUsage,
            )
            .await
            .unwrap();
        store
            .reprice(draft.id, &|s| plan_repricing(PricingMode::Synchronous, s))
            .await
            .unwrap();

        store
            .transition(draft.id, &|request, lines| {
                request.plan_format(lines, false, Utc::now())
            })
            .await
            .unwrap();
        let completed = store
            .transition(draft.id, &|request, _| {
                request.plan_complete(&Principal::moderator(Uuid::new_v4()), Utc::now())
            })
            .await
            .unwrap();

        assert_eq!(completed.status, RequestStatus::Completed);
        assert_eq!(completed.total_cost, 0.0);
        let lines = store.list_lines(draft.id).await.unwrap();
        assert_eq!(lines[0].sub_total, 0.0);
        assert_eq!(lines[0].pricing_state, PricingState::Pending);
    }

    #[tokio::test]
    async fn test_refused_transition_changes_nothing() {
        let (store, service) = seeded().await;
        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();
        store
            .add_line(draft.id, service.id, RequestOperation::AddService)
            .await
            .unwrap();

        let err = store
            .transition(draft.id, &|request, lines| {
                request.plan_format(lines, true, Utc::now())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::PreconditionFailed(_)));
        let unchanged = store.get_request(draft.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, RequestStatus::Draft);
        assert!(unchanged.formatted_at.is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_line_is_not_found() {
        let (store, service) = seeded().await;
        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();

        let err = store
            .remove_line(draft.id, service.id, RequestOperation::RemoveService)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::LineNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reprice_deleted_request_is_not_found() {
        let store = MemoryStore::new();
        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();
        store
            .transition(draft.id, &|request, _| request.plan_delete(Utc::now()))
            .await
            .unwrap();

        let err = store
            .reprice(draft.id, &|s| plan_repricing(PricingMode::External, s))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::RequestNotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatch_failure_only_flags_pending_lines() {
        let (store, service) = seeded().await;
        let (draft, _) = store.get_or_create_draft(Uuid::new_v4()).await.unwrap();
        store
            .add_line(draft.id, service.id, RequestOperation::AddService)
            .await
            .unwrap();
        store
            .update_usage(
                draft.id,
                &UsagePatch {
                    users: Some(2),
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
        store
            .transition(draft.id, &|r, _| {
                r.plan_complete(&Principal::moderator(Uuid::new_v4()), Utc::now())
            })
            .await
            .unwrap();

        let settle = RequestOperation::SettlePricing;
        assert!(store
            .mark_dispatch_failed(draft.id, service.id, settle)
            .await
            .unwrap());
        assert_eq!(
            store.list_lines(draft.id).await.unwrap()[0].pricing_state,
            PricingState::DispatchFailed
        );

        // A late callback still settles the line; a later failure leaves it be.
        store
            .record_subtotal(draft.id, service.id, 32200.0, settle)
            .await
            .unwrap();
        assert!(!store
            .mark_dispatch_failed(draft.id, service.id, settle)
            .await
            .unwrap());

        let line = store.list_lines(draft.id).await.unwrap()[0].clone();
        assert_eq!(line.pricing_state, PricingState::Priced);
        assert_eq!(line.sub_total, 32200.0);
    }
}
