use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use super::{DecideTransition, LicenseStore, PlanRepricing, RequestFilter, StoreError, StoreResult};
use crate::domain::catalog::{LicenseService, LicenseType, NewService, ServiceUpdate};
use crate::domain::pricing::{PricingSnapshot, SnapshotLine};
use crate::domain::request::{
    LicenseRequest, PricingState, RequestError, RequestLine, RequestOperation, RequestStatus,
    SupportCoefficient, UsageParams, UsagePatch,
};

// ============================================================================
// PostgreSQL store
// ============================================================================
//
// Every guarded write opens a transaction, takes `SELECT ... FOR UPDATE` on
// the request row, re-checks the guard and writes. Concurrent writers to the
// same request queue up on the row lock.

const SERVICE_COLUMNS: &str =
    "id, name, description, base_price, license_type, image_url, is_deleted";

const REQUEST_COLUMNS: &str = "id, status, creator_id, moderator_id, created_at, formatted_at, \
     completed_at, users, cores, period, total_cost";

const LINE_COLUMNS: &str =
    "id, request_id, service_id, support_coefficient, sub_total, pricing_state";

#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    id: i64,
    name: String,
    description: String,
    base_price: f64,
    license_type: String,
    image_url: Option<String>,
    is_deleted: bool,
}

impl From<ServiceRow> for LicenseService {
    fn from(row: ServiceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            base_price: row.base_price,
            license_type: LicenseType::from_stored(&row.license_type),
            image_url: row.image_url,
            is_deleted: row.is_deleted,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: i64,
    status: String,
    creator_id: Uuid,
    moderator_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    formatted_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    users: i32,
    cores: i32,
    period: i32,
    total_cost: f64,
}

impl TryFrom<RequestRow> for LicenseRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = RequestStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("request {} has status '{}'", row.id, row.status))
        })?;

        Ok(Self {
            id: row.id,
            status,
            creator_id: row.creator_id,
            moderator_id: row.moderator_id,
            created_at: row.created_at,
            formatted_at: row.formatted_at,
            completed_at: row.completed_at,
            usage: UsageParams {
                users: row.users,
                cores: row.cores,
                period: row.period,
            },
            total_cost: row.total_cost,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    id: i64,
    request_id: i64,
    service_id: i64,
    support_coefficient: f64,
    sub_total: f64,
    pricing_state: String,
}

impl TryFrom<LineRow> for RequestLine {
    type Error = StoreError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let pricing_state = PricingState::parse(&row.pricing_state).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "line {} has pricing state '{}'",
                row.id, row.pricing_state
            ))
        })?;

        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            service_id: row.service_id,
            support_coefficient: row.support_coefficient,
            sub_total: row.sub_total,
            pricing_state,
        })
    }
}

fn requests_from_rows(rows: Vec<RequestRow>) -> StoreResult<Vec<LicenseRequest>> {
    rows.into_iter().map(LicenseRequest::try_from).collect()
}

fn lines_from_rows(rows: Vec<LineRow>) -> StoreResult<Vec<RequestLine>> {
    rows.into_iter().map(RequestLine::try_from).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and brings the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database schema is up to date");
        Ok(())
    }

    async fn lock_request(
        tx: &mut Transaction<'_, Postgres>,
        request_id: i64,
    ) -> Result<LicenseRequest, RequestError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM license_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(request_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(RequestError::RequestNotFound(request_id))?;

        Ok(LicenseRequest::try_from(row)?)
    }

    async fn lock_guarded(
        tx: &mut Transaction<'_, Postgres>,
        request_id: i64,
        operation: RequestOperation,
    ) -> Result<LicenseRequest, RequestError> {
        let request = Self::lock_request(tx, request_id).await?;
        request.guard(operation)?;
        Ok(request)
    }

    async fn lines_in(
        tx: &mut Transaction<'_, Postgres>,
        request_id: i64,
    ) -> Result<Vec<RequestLine>, RequestError> {
        let rows = sqlx::query_as::<_, LineRow>(&format!(
            "SELECT {LINE_COLUMNS} FROM request_lines WHERE request_id = $1 ORDER BY id"
        ))
        .bind(request_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(lines_from_rows(rows)?)
    }
}

#[async_trait]
impl LicenseStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_services(&self, name_query: Option<&str>) -> StoreResult<Vec<LicenseService>> {
        let rows = sqlx::query_as::<_, ServiceRow>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM license_services \
             WHERE NOT is_deleted \
               AND ($1::TEXT IS NULL OR position(lower($1) IN lower(name)) > 0) \
             ORDER BY id"
        ))
        .bind(name_query)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(LicenseService::from).collect())
    }

    async fn get_service(&self, id: i64) -> StoreResult<Option<LicenseService>> {
        let row = sqlx::query_as::<_, ServiceRow>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM license_services WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(LicenseService::from))
    }

    async fn create_service(&self, service: NewService) -> StoreResult<LicenseService> {
        let row = sqlx::query_as::<_, ServiceRow>(&format!(
            "INSERT INTO license_services (name, description, base_price, license_type) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {SERVICE_COLUMNS}"
        ))
        .bind(&service.name)
        .bind(&service.description)
        .bind(service.base_price)
        .bind(service.license_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn update_service(
        &self,
        id: i64,
        update: &ServiceUpdate,
    ) -> StoreResult<Option<LicenseService>> {
        let row = sqlx::query_as::<_, ServiceRow>(&format!(
            "UPDATE license_services SET \
                 name = COALESCE($2, name), \
                 description = COALESCE($3, description), \
                 base_price = COALESCE($4, base_price), \
                 license_type = COALESCE($5, license_type) \
             WHERE id = $1 AND NOT is_deleted \
             RETURNING {SERVICE_COLUMNS}"
        ))
        .bind(id)
        .bind(update.name.as_deref())
        .bind(update.description.as_deref())
        .bind(update.base_price)
        .bind(update.license_type.as_ref().map(|t| t.as_str().to_string()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(LicenseService::from))
    }

    async fn delete_service(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE license_services SET is_deleted = TRUE WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_service_image(&self, id: i64, image_url: Option<&str>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE license_services SET image_url = $2 WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .bind(image_url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_request(&self, id: i64) -> StoreResult<Option<LicenseRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM license_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LicenseRequest::try_from).transpose()
    }

    async fn find_draft(&self, creator_id: Uuid) -> StoreResult<Option<LicenseRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM license_requests \
             WHERE creator_id = $1 AND status = 'draft'"
        ))
        .bind(creator_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LicenseRequest::try_from).transpose()
    }

    async fn get_or_create_draft(&self, creator_id: Uuid) -> StoreResult<(LicenseRequest, bool)> {
        // The partial unique index arbitrates concurrent creators. Losing the
        // race means a draft exists, unless it was formatted in between; then
        // try again.
        loop {
            let inserted = sqlx::query_as::<_, RequestRow>(&format!(
                "INSERT INTO license_requests (status, creator_id, created_at) \
                 VALUES ('draft', $1, $2) \
                 ON CONFLICT (creator_id) WHERE status = 'draft' DO NOTHING \
                 RETURNING {REQUEST_COLUMNS}"
            ))
            .bind(creator_id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = inserted {
                return Ok((LicenseRequest::try_from(row)?, true));
            }
            if let Some(existing) = self.find_draft(creator_id).await? {
                return Ok((existing, false));
            }
        }
    }

    async fn list_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<LicenseRequest>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM license_requests WHERE status <> 'deleted'"
        ));

        match filter.status {
            Some(status) => {
                query.push(" AND status = ").push_bind(status.as_str());
            }
            None => {
                query.push(" AND status <> 'draft'");
            }
        }
        if let Some(creator_id) = filter.creator_id {
            query.push(" AND creator_id = ").push_bind(creator_id);
        }
        if let Some(from) = filter.formatted_from {
            query.push(" AND formatted_at::DATE >= ").push_bind(from);
        }
        if let Some(to) = filter.formatted_to {
            query.push(" AND formatted_at::DATE <= ").push_bind(to);
        }
        query.push(" ORDER BY id");

        let rows = query
            .build_query_as::<RequestRow>()
            .fetch_all(&self.pool)
            .await?;

        requests_from_rows(rows)
    }

    async fn list_lines(&self, request_id: i64) -> StoreResult<Vec<RequestLine>> {
        let rows = sqlx::query_as::<_, LineRow>(&format!(
            "SELECT {LINE_COLUMNS} FROM request_lines WHERE request_id = $1 ORDER BY id"
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        lines_from_rows(rows)
    }

    async fn add_line(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<bool, RequestError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_guarded(&mut tx, request_id, operation).await?;

        let live: Option<bool> = sqlx::query_scalar(
            "SELECT NOT is_deleted FROM license_services WHERE id = $1",
        )
        .bind(service_id)
        .fetch_optional(&mut *tx)
        .await?;
        if live != Some(true) {
            return Err(RequestError::ServiceNotFound(service_id));
        }

        let inserted = sqlx::query(
            "INSERT INTO request_lines (request_id, service_id, support_coefficient) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (request_id, service_id) DO NOTHING",
        )
        .bind(request_id)
        .bind(service_id)
        .bind(SupportCoefficient::DEFAULT)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn remove_line(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<(), RequestError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_guarded(&mut tx, request_id, operation).await?;

        let removed = sqlx::query(
            "DELETE FROM request_lines WHERE request_id = $1 AND service_id = $2",
        )
        .bind(request_id)
        .bind(service_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            return Err(RequestError::LineNotFound {
                request_id,
                service_id,
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_support_coefficient(
        &self,
        request_id: i64,
        service_id: i64,
        coefficient: SupportCoefficient,
        operation: RequestOperation,
    ) -> Result<(), RequestError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_guarded(&mut tx, request_id, operation).await?;

        let updated = sqlx::query(
            "UPDATE request_lines SET support_coefficient = $3 \
             WHERE request_id = $1 AND service_id = $2",
        )
        .bind(request_id)
        .bind(service_id)
        .bind(coefficient.value())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(RequestError::LineNotFound {
                request_id,
                service_id,
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_usage(
        &self,
        request_id: i64,
        patch: &UsagePatch,
        operation: RequestOperation,
    ) -> Result<LicenseRequest, RequestError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_guarded(&mut tx, request_id, operation).await?;

        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "UPDATE license_requests SET \
                 users = COALESCE($2, users), \
                 cores = COALESCE($3, cores), \
                 period = COALESCE($4, period) \
             WHERE id = $1 \
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(request_id)
        .bind(patch.users)
        .bind(patch.cores)
        .bind(patch.period)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LicenseRequest::try_from(row)?)
    }

    async fn transition(
        &self,
        request_id: i64,
        decide: &DecideTransition,
    ) -> Result<LicenseRequest, RequestError> {
        let mut tx = self.pool.begin().await?;
        let mut request = Self::lock_request(&mut tx, request_id).await?;
        let lines = Self::lines_in(&mut tx, request_id).await?;

        let transition = decide(&request, &lines)?;
        request.apply_transition(&transition);

        sqlx::query(
            "UPDATE license_requests SET \
                 status = $2, formatted_at = $3, completed_at = $4, \
                 moderator_id = $5, total_cost = $6 \
             WHERE id = $1",
        )
        .bind(request_id)
        .bind(request.status.as_str())
        .bind(request.formatted_at)
        .bind(request.completed_at)
        .bind(request.moderator_id)
        .bind(request.total_cost)
        .execute(&mut *tx)
        .await?;

        if transition.reset_pricing {
            sqlx::query(
                "UPDATE request_lines SET sub_total = 0, pricing_state = 'pending' \
                 WHERE request_id = $1",
            )
            .bind(request_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(request)
    }

    async fn record_subtotal(
        &self,
        request_id: i64,
        service_id: i64,
        sub_total: f64,
        operation: RequestOperation,
    ) -> Result<(), RequestError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_guarded(&mut tx, request_id, operation).await?;

        let updated = sqlx::query(
            "UPDATE request_lines SET sub_total = $3, pricing_state = 'priced' \
             WHERE request_id = $1 AND service_id = $2",
        )
        .bind(request_id)
        .bind(service_id)
        .bind(sub_total)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(RequestError::LineNotFound {
                request_id,
                service_id,
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_dispatch_failed(
        &self,
        request_id: i64,
        service_id: i64,
        operation: RequestOperation,
    ) -> Result<bool, RequestError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_guarded(&mut tx, request_id, operation).await?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT pricing_state FROM request_lines \
             WHERE request_id = $1 AND service_id = $2",
        )
        .bind(request_id)
        .bind(service_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Err(RequestError::LineNotFound {
                request_id,
                service_id,
            });
        };
        if current != PricingState::Pending.as_str() {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE request_lines SET pricing_state = $3 \
             WHERE request_id = $1 AND service_id = $2 AND pricing_state = $4",
        )
        .bind(request_id)
        .bind(service_id)
        .bind(PricingState::DispatchFailed.as_str())
        .bind(PricingState::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn reprice(&self, request_id: i64, plan: &PlanRepricing) -> Result<f64, RequestError> {
        let mut tx = self.pool.begin().await?;
        let request = Self::lock_request(&mut tx, request_id).await?;
        if request.is_deleted() {
            return Err(RequestError::RequestNotFound(request_id));
        }

        let lines = Self::lines_in(&mut tx, request_id).await?;
        let service_ids: Vec<i64> = lines.iter().map(|line| line.service_id).collect();
        let mut services: HashMap<i64, LicenseService> = sqlx::query_as::<_, ServiceRow>(
            &format!("SELECT {SERVICE_COLUMNS} FROM license_services WHERE id = ANY($1)"),
        )
        .bind(&service_ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| (row.id, LicenseService::from(row)))
        .collect();

        let snapshot = PricingSnapshot {
            request,
            lines: lines
                .into_iter()
                .map(|line| SnapshotLine {
                    service: services.remove(&line.service_id),
                    line,
                })
                .collect(),
        };
        let repricing = plan(&snapshot);

        for update in &repricing.lines {
            sqlx::query("UPDATE request_lines SET sub_total = $2, pricing_state = $3 WHERE id = $1")
                .bind(update.line_id)
                .bind(update.sub_total)
                .bind(update.pricing_state.as_str())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE license_requests SET total_cost = $2 WHERE id = $1")
            .bind(request_id)
            .bind(repricing.total_cost)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(repricing.total_cost)
    }
}
