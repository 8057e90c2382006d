use actix::Recipient;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::aggregate::{LicenseRequest, RequestOperation};
use super::commands::RequestCommand;
use super::errors::RequestError;
use super::value_objects::{PricingState, RequestLine, SupportCoefficient};
use crate::dispatch::{DispatchBatch, TaskFactory};
use crate::domain::catalog::LicenseType;
use crate::domain::identity::Principal;
use crate::domain::pricing::{PricingMode, RecalculationEngine};
use crate::metrics::Metrics;
use crate::store::{LicenseStore, RequestFilter};

// ============================================================================
// Request Command Handler - the lifecycle controller
// ============================================================================
//
// Command → ownership/role check → guarded store write → recalculation
// → (on Complete) dispatch.
//
// Ownership and role are checked against the request as read at the start;
// status guards are re-checked by the store inside its lock.
// ============================================================================

/// Queue handle plus the factory that turns lines into tasks.
pub struct Dispatcher {
    pub queue: Recipient<DispatchBatch>,
    pub tasks: TaskFactory,
}

pub struct RequestCommandHandler {
    store: Arc<dyn LicenseStore>,
    recalculation: Arc<RecalculationEngine>,
    dispatcher: Option<Dispatcher>,
    metrics: Arc<Metrics>,
}

// ----------------------------------------------------------------------------
// Read models
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineView {
    pub service_id: i64,
    pub name: String,
    pub description: String,
    pub license_type: LicenseType,
    pub base_price: f64,
    pub image_url: String,
    pub support_coefficient: f64,
    pub sub_total: f64,
    pub pricing_state: PricingState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDetails {
    #[serde(flatten)]
    pub request: LicenseRequest,
    pub priced_lines: usize,
    pub services: Vec<LineView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSummary {
    #[serde(flatten)]
    pub request: LicenseRequest,
    pub priced_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cart {
    pub request_id: Option<i64>,
    pub services_count: usize,
}

fn priced_lines(lines: &[RequestLine]) -> usize {
    lines.iter().filter(|line| line.is_priced()).count()
}

impl RequestCommandHandler {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        recalculation: Arc<RecalculationEngine>,
        dispatcher: Option<Dispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            recalculation,
            dispatcher,
            metrics,
        }
    }

    /// Handle a command on behalf of `principal`; returns the request as
    /// persisted afterwards.
    pub async fn handle(
        &self,
        principal: &Principal,
        command: RequestCommand,
    ) -> Result<LicenseRequest, RequestError> {
        let name = command.name();
        let request_id = command.request_id();

        let result = self.execute(principal, command).await;

        if let Err(e) = &result {
            self.metrics.record_rejected_operation(name, e.reason());
            debug!(
                command = name,
                request_id = ?request_id,
                user_id = %principal.user_id,
                error = %e,
                "Command refused"
            );
        }
        result
    }

    async fn execute(
        &self,
        principal: &Principal,
        command: RequestCommand,
    ) -> Result<LicenseRequest, RequestError> {
        match command {
            RequestCommand::CreateDraft => {
                let (draft, created) = self.store.get_or_create_draft(principal.user_id).await?;
                if created {
                    info!(request_id = draft.id, user_id = %principal.user_id, "Created draft");
                }
                Ok(draft)
            }

            RequestCommand::AddService { service_id } => {
                match self.store.get_service(service_id).await? {
                    Some(service) if service.is_live() => {}
                    _ => return Err(RequestError::ServiceNotFound(service_id)),
                }

                let (draft, _) = self.store.get_or_create_draft(principal.user_id).await?;
                let inserted = self
                    .store
                    .add_line(draft.id, service_id, RequestOperation::AddService)
                    .await?;
                if inserted {
                    debug!(request_id = draft.id, service_id, "Added service to draft");
                }

                self.recalculation.recalculate(draft.id).await?;
                self.reload(draft.id).await
            }

            RequestCommand::RemoveService {
                request_id,
                service_id,
            } => {
                self.owned(principal, request_id).await?;
                self.store
                    .remove_line(request_id, service_id, RequestOperation::RemoveService)
                    .await?;

                self.recalculation.recalculate(request_id).await?;
                self.reload(request_id).await
            }

            RequestCommand::SetSupportCoefficient {
                request_id,
                service_id,
                coefficient,
            } => {
                let coefficient = SupportCoefficient::clamped(coefficient)?;
                self.owned(principal, request_id).await?;
                self.store
                    .set_support_coefficient(
                        request_id,
                        service_id,
                        coefficient,
                        RequestOperation::SetSupportCoefficient,
                    )
                    .await?;

                self.recalculation.recalculate(request_id).await?;
                self.reload(request_id).await
            }

            RequestCommand::UpdateUsage { request_id, patch } => {
                patch.validate()?;
                self.owned(principal, request_id).await?;
                self.store
                    .update_usage(request_id, &patch, RequestOperation::UpdateUsage)
                    .await?;

                self.recalculation.recalculate(request_id).await?;
                self.reload(request_id).await
            }

            RequestCommand::Format { request_id } => {
                self.owned(principal, request_id).await?;

                let external = self.recalculation.mode() == PricingMode::External;
                let formed = self
                    .store
                    .transition(request_id, &move |request, lines| {
                        request.plan_format(lines, external, Utc::now())
                    })
                    .await?;
                self.record_transition(&formed, principal);

                if !external {
                    self.recalculation.recalculate(request_id).await?;
                }
                self.reload(request_id).await
            }

            RequestCommand::Complete { request_id } => {
                self.moderated(principal, request_id).await?;

                let moderator = *principal;
                let completed = self
                    .store
                    .transition(request_id, &move |request, _| {
                        request.plan_complete(&moderator, Utc::now())
                    })
                    .await?;
                self.record_transition(&completed, principal);

                match &self.dispatcher {
                    Some(dispatcher) => self.dispatch(dispatcher, &completed).await,
                    None => {
                        self.recalculation.recalculate(request_id).await?;
                    }
                }
                self.reload(request_id).await
            }

            RequestCommand::Reject { request_id } => {
                self.moderated(principal, request_id).await?;

                let moderator = *principal;
                let rejected = self
                    .store
                    .transition(request_id, &move |request, _| {
                        request.plan_reject(&moderator, Utc::now())
                    })
                    .await?;
                self.record_transition(&rejected, principal);
                Ok(rejected)
            }

            RequestCommand::Delete { request_id } => {
                self.owned(principal, request_id).await?;

                let deleted = self
                    .store
                    .transition(request_id, &|request, _| request.plan_delete(Utc::now()))
                    .await?;
                self.record_transition(&deleted, principal);
                Ok(deleted)
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn view(
        &self,
        principal: &Principal,
        request_id: i64,
    ) -> Result<RequestDetails, RequestError> {
        let request = self.visible(principal, request_id).await?;
        let lines = self.store.list_lines(request_id).await?;

        let mut services = Vec::with_capacity(lines.len());
        for line in &lines {
            let Some(service) = self
                .store
                .get_service(line.service_id)
                .await?
                .filter(|s| s.is_live())
            else {
                continue;
            };
            services.push(LineView {
                service_id: service.id,
                image_url: service.image_or_default().to_string(),
                name: service.name,
                description: service.description,
                license_type: service.license_type,
                base_price: service.base_price,
                support_coefficient: line.support_coefficient,
                sub_total: line.sub_total,
                pricing_state: line.pricing_state,
            });
        }

        Ok(RequestDetails {
            request,
            priced_lines: priced_lines(&lines),
            services,
        })
    }

    /// Buyers only ever see their own requests.
    pub async fn list(
        &self,
        principal: &Principal,
        mut filter: RequestFilter,
    ) -> Result<Vec<RequestSummary>, RequestError> {
        if !principal.is_moderator() {
            filter.creator_id = Some(principal.user_id);
        }

        let requests = self.store.list_requests(&filter).await?;
        let mut summaries = Vec::with_capacity(requests.len());
        for request in requests {
            let lines = self.store.list_lines(request.id).await?;
            summaries.push(RequestSummary {
                priced_lines: priced_lines(&lines),
                request,
            });
        }
        Ok(summaries)
    }

    pub async fn cart(&self, principal: &Principal) -> Result<Cart, RequestError> {
        match self.store.find_draft(principal.user_id).await? {
            Some(draft) => Ok(Cart {
                request_id: Some(draft.id),
                services_count: self.store.list_lines(draft.id).await?.len(),
            }),
            None => Ok(Cart {
                request_id: None,
                services_count: 0,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn reload(&self, request_id: i64) -> Result<LicenseRequest, RequestError> {
        self.store
            .get_request(request_id)
            .await?
            .filter(|r| !r.is_deleted())
            .ok_or(RequestError::RequestNotFound(request_id))
    }

    async fn visible(
        &self,
        principal: &Principal,
        request_id: i64,
    ) -> Result<LicenseRequest, RequestError> {
        let request = self.reload(request_id).await?;
        if principal.is_moderator() || request.is_owned_by(principal.user_id) {
            Ok(request)
        } else {
            Err(RequestError::Forbidden(format!(
                "license request {} belongs to another user",
                request_id
            )))
        }
    }

    async fn owned(
        &self,
        principal: &Principal,
        request_id: i64,
    ) -> Result<LicenseRequest, RequestError> {
        let request = self.reload(request_id).await?;
        if request.is_owned_by(principal.user_id) {
            Ok(request)
        } else {
            Err(RequestError::Forbidden(format!(
                "only the creator may change license request {}",
                request_id
            )))
        }
    }

    async fn moderated(
        &self,
        principal: &Principal,
        request_id: i64,
    ) -> Result<LicenseRequest, RequestError> {
        if !principal.is_moderator() {
            return Err(RequestError::Forbidden(
                "only managers and admins may complete or reject requests".to_string(),
            ));
        }
        self.reload(request_id).await
    }

    fn record_transition(&self, request: &LicenseRequest, principal: &Principal) {
        self.metrics.record_transition(request.status.as_str());
        info!(
            request_id = request.id,
            status = %request.status,
            user_id = %principal.user_id,
            "License request transitioned"
        );
    }

    /// Enqueues one task per live line. The Complete is already committed, so
    /// failures here are logged rather than returned.
    async fn dispatch(&self, dispatcher: &Dispatcher, request: &LicenseRequest) {
        let lines = match self.store.list_lines(request.id).await {
            Ok(lines) => lines,
            Err(e) => {
                error!(request_id = request.id, error = %e, "Could not load lines for dispatch");
                return;
            }
        };

        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            match self.store.get_service(line.service_id).await {
                Ok(service) => priced.push((line, service)),
                Err(e) => {
                    error!(
                        request_id = request.id,
                        service_id = line.service_id,
                        error = %e,
                        "Could not load catalog entry for dispatch"
                    );
                }
            }
        }

        let tasks = dispatcher.tasks.build(request, &priced);
        if tasks.is_empty() {
            return;
        }

        info!(request_id = request.id, tasks = tasks.len(), "Queued pricing tasks");
        dispatcher.queue.do_send(DispatchBatch {
            request_id: request.id,
            tasks,
        });
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
