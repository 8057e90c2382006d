use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::catalog::{LicenseService, NewService, ServiceUpdate};
use crate::domain::pricing::{PricingSnapshot, Repricing};
use crate::domain::request::{
    LicenseRequest, RequestError, RequestLine, RequestOperation, RequestStatus, SupportCoefficient,
    Transition, UsagePatch,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ============================================================================
// License Store - persistence seam for catalog, requests and lines
// ============================================================================
//
// Guarded writes take the operation being performed. Implementations lock
// the request, re-check `LicenseRequest::guard(operation)` against what is
// persisted right now, and only then write. The guard outcome is returned
// as-is so callers see the same errors whichever store is behind the trait.
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for RequestError {
    fn from(err: sqlx::Error) -> Self {
        RequestError::Storage(StoreError::Database(err))
    }
}

/// Decides a status change from the locked request and its lines.
pub type DecideTransition =
    dyn Fn(&LicenseRequest, &[RequestLine]) -> Result<Transition, RequestError> + Send + Sync;

/// Computes new sub-totals and the total from a locked snapshot.
pub type PlanRepricing = dyn Fn(&PricingSnapshot) -> Repricing + Send + Sync;

/// Listing filter. Deleted requests never appear; drafts only when asked for
/// explicitly by status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub formatted_from: Option<NaiveDate>,
    pub formatted_to: Option<NaiveDate>,
    pub creator_id: Option<Uuid>,
}

impl RequestFilter {
    pub fn matches(&self, request: &LicenseRequest) -> bool {
        if request.is_deleted() {
            return false;
        }
        match self.status {
            Some(status) if request.status != status => return false,
            None if request.status == RequestStatus::Draft => return false,
            _ => {}
        }
        if let Some(creator) = self.creator_id {
            if request.creator_id != creator {
                return false;
            }
        }
        if self.formatted_from.is_some() || self.formatted_to.is_some() {
            let Some(formatted) = request.formatted_at.map(|at| at.date_naive()) else {
                return false;
            };
            if self.formatted_from.is_some_and(|from| formatted < from) {
                return false;
            }
            if self.formatted_to.is_some_and(|to| formatted > to) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Connectivity check for /health.
    async fn ping(&self) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    async fn list_services(&self, name_query: Option<&str>) -> StoreResult<Vec<LicenseService>>;

    /// Returns soft-deleted entries too; callers decide what is live.
    async fn get_service(&self, id: i64) -> StoreResult<Option<LicenseService>>;

    async fn create_service(&self, service: NewService) -> StoreResult<LicenseService>;

    /// `None` when the entry is missing or soft-deleted.
    async fn update_service(
        &self,
        id: i64,
        update: &ServiceUpdate,
    ) -> StoreResult<Option<LicenseService>>;

    /// `false` when the entry is missing or already soft-deleted.
    async fn delete_service(&self, id: i64) -> StoreResult<bool>;

    async fn set_service_image(&self, id: i64, image_url: Option<&str>) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Requests (reads)
    // ------------------------------------------------------------------

    /// Soft-deleted requests are returned; the controller hides them.
    async fn get_request(&self, id: i64) -> StoreResult<Option<LicenseRequest>>;

    async fn find_draft(&self, creator_id: Uuid) -> StoreResult<Option<LicenseRequest>>;

    /// Returns the creator's draft, creating it if needed. The flag is true
    /// when a new draft was created. Never creates a second draft.
    async fn get_or_create_draft(&self, creator_id: Uuid) -> StoreResult<(LicenseRequest, bool)>;

    async fn list_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<LicenseRequest>>;

    async fn list_lines(&self, request_id: i64) -> StoreResult<Vec<RequestLine>>;

    // ------------------------------------------------------------------
    // Guarded writes
    // ------------------------------------------------------------------

    /// Inserts the line unless the pair already exists. Returns whether a
    /// line was inserted. The service must exist and be live.
    async fn add_line(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<bool, RequestError>;

    async fn remove_line(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<(), RequestError>;

    async fn set_support_coefficient(
        &self,
        request_id: i64,
        service_id: i64,
        coefficient: SupportCoefficient,
        operation: RequestOperation,
    ) -> Result<(), RequestError>;

    async fn update_usage(
        &self,
        request_id: i64,
        patch: &UsagePatch,
        operation: RequestOperation,
    ) -> Result<LicenseRequest, RequestError>;

    /// Applies the transition decided by `decide`. With `reset_pricing`, every
    /// line goes back to pending with a zero sub-total in the same write.
    async fn transition(
        &self,
        request_id: i64,
        decide: &DecideTransition,
    ) -> Result<LicenseRequest, RequestError>;

    /// Writes a calculated sub-total and marks the line priced.
    async fn record_subtotal(
        &self,
        request_id: i64,
        service_id: i64,
        sub_total: f64,
        operation: RequestOperation,
    ) -> Result<(), RequestError>;

    /// Flags a still-pending line as `dispatch_failed`. A line already
    /// settled by a callback keeps its state; returns whether it was flagged.
    async fn mark_dispatch_failed(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<bool, RequestError>;

    /// Runs `plan` over the locked request and persists its result. Returns
    /// the new total. Deleted requests report `RequestNotFound`.
    async fn reprice(&self, request_id: i64, plan: &PlanRepricing) -> Result<f64, RequestError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn request(status: RequestStatus, formatted_on: Option<(i32, u32, u32)>) -> LicenseRequest {
        let mut request = LicenseRequest::new_draft(1, Uuid::new_v4(), Utc::now());
        request.status = status;
        request.formatted_at = formatted_on
            .map(|(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap());
        request
    }

    #[test]
    fn test_default_filter_hides_drafts_and_deleted() {
        let filter = RequestFilter::default();
        assert!(!filter.matches(&request(RequestStatus::Draft, None)));
        assert!(!filter.matches(&request(RequestStatus::Deleted, None)));
        assert!(filter.matches(&request(RequestStatus::Formed, Some((2024, 3, 1)))));
    }

    #[test]
    fn test_explicit_status_filter() {
        let filter = RequestFilter {
            status: Some(RequestStatus::Completed),
            ..Default::default()
        };
        assert!(filter.matches(&request(RequestStatus::Completed, Some((2024, 3, 1)))));
        assert!(!filter.matches(&request(RequestStatus::Formed, Some((2024, 3, 1)))));
    }

    #[test]
    fn test_formatted_date_range_is_inclusive() {
        let filter = RequestFilter {
            formatted_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            formatted_to: NaiveDate::from_ymd_opt(2024, 3, 31),
            ..Default::default()
        };
        assert!(filter.matches(&request(RequestStatus::Formed, Some((2024, 3, 1)))));
        assert!(filter.matches(&request(RequestStatus::Formed, Some((2024, 3, 31)))));
        assert!(!filter.matches(&request(RequestStatus::Formed, Some((2024, 4, 1)))));
        assert!(!filter.matches(&request(RequestStatus::Formed, None)));
    }
}
