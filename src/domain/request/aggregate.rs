use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use super::errors::RequestError;
use super::value_objects::{PricingState, RequestLine, RequestStatus, UsageParams};
use crate::domain::identity::Principal;

// ============================================================================
// Request Operations - which statuses each operation may run in
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOperation {
    AddService,
    RemoveService,
    SetSupportCoefficient,
    UpdateUsage,
    SettlePricing,
    Format,
    Complete,
    Reject,
    Delete,
}

impl RequestOperation {
    /// Statuses an in-place edit may run in. Lifecycle transitions are
    /// checked against `RequestStatus::can_transition_to` instead.
    pub fn allowed_statuses(&self) -> &'static [RequestStatus] {
        match self {
            RequestOperation::AddService
            | RequestOperation::RemoveService
            | RequestOperation::UpdateUsage => &[RequestStatus::Draft],
            RequestOperation::SetSupportCoefficient => {
                &[RequestStatus::Draft, RequestStatus::Formed]
            }
            RequestOperation::SettlePricing => &[RequestStatus::Completed],
            RequestOperation::Format
            | RequestOperation::Complete
            | RequestOperation::Reject
            | RequestOperation::Delete => &[],
        }
    }

    /// Status reached when the operation is a lifecycle transition.
    pub fn target_status(&self) -> Option<RequestStatus> {
        match self {
            RequestOperation::Format => Some(RequestStatus::Formed),
            RequestOperation::Complete => Some(RequestStatus::Completed),
            RequestOperation::Reject => Some(RequestStatus::Rejected),
            RequestOperation::Delete => Some(RequestStatus::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for RequestOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RequestOperation::AddService => "add a service",
            RequestOperation::RemoveService => "remove a service",
            RequestOperation::SetSupportCoefficient => "change a support coefficient",
            RequestOperation::UpdateUsage => "change usage parameters",
            RequestOperation::SettlePricing => "accept a calculated sub-total",
            RequestOperation::Format => "format",
            RequestOperation::Complete => "complete",
            RequestOperation::Reject => "reject",
            RequestOperation::Delete => "delete",
        };
        f.write_str(text)
    }
}

// ============================================================================
// License Request Aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LicenseRequest {
    pub id: i64,
    pub status: RequestStatus,
    pub creator_id: Uuid,
    pub moderator_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub formatted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub usage: UsageParams,

    // Derived; only the recalculation engine and lifecycle resets write it
    pub total_cost: f64,
}

/// A decided status change, produced from persisted state and applied by the
/// store inside the same critical section that read it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub at: DateTime<Utc>,
    pub moderator_id: Option<Uuid>,
    pub reset_pricing: bool,
}

impl LicenseRequest {
    pub fn new_draft(id: i64, creator_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: RequestStatus::Draft,
            creator_id,
            moderator_id: None,
            created_at: now,
            formatted_at: None,
            completed_at: None,
            usage: UsageParams::default(),
            total_cost: 0.0,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.creator_id == user_id
    }

    pub fn is_deleted(&self) -> bool {
        self.status == RequestStatus::Deleted
    }

    /// Status guard shared by every mutation. Deleted requests behave as if
    /// they did not exist.
    pub fn guard(&self, operation: RequestOperation) -> Result<(), RequestError> {
        if self.is_deleted() {
            return Err(RequestError::RequestNotFound(self.id));
        }
        match operation.target_status() {
            Some(to) if self.status.can_transition_to(to) => Ok(()),
            Some(to) => Err(RequestError::InvalidStateTransition {
                from: self.status,
                to,
            }),
            None if operation.allowed_statuses().contains(&self.status) => Ok(()),
            None => Err(RequestError::InvalidState {
                status: self.status,
                operation,
            }),
        }
    }

    pub fn plan_format(
        &self,
        lines: &[RequestLine],
        reset_pricing: bool,
        now: DateTime<Utc>,
    ) -> Result<Transition, RequestError> {
        self.guard(RequestOperation::Format)?;

        if lines.is_empty() {
            return Err(RequestError::PreconditionFailed(
                "license request has no services".to_string(),
            ));
        }
        if !self.usage.has_seats() {
            return Err(RequestError::PreconditionFailed(
                "users or cores must be greater than zero".to_string(),
            ));
        }
        if self.usage.period < 1 {
            return Err(RequestError::PreconditionFailed(
                "period must be at least 1".to_string(),
            ));
        }

        Ok(self.transition_to(RequestStatus::Formed, now, None, reset_pricing))
    }

    pub fn plan_complete(
        &self,
        moderator: &Principal,
        now: DateTime<Utc>,
    ) -> Result<Transition, RequestError> {
        self.guard(RequestOperation::Complete)?;
        Ok(self.transition_to(RequestStatus::Completed, now, Some(moderator.user_id), true))
    }

    pub fn plan_reject(
        &self,
        moderator: &Principal,
        now: DateTime<Utc>,
    ) -> Result<Transition, RequestError> {
        self.guard(RequestOperation::Reject)?;
        Ok(self.transition_to(RequestStatus::Rejected, now, Some(moderator.user_id), false))
    }

    pub fn plan_delete(&self, now: DateTime<Utc>) -> Result<Transition, RequestError> {
        self.guard(RequestOperation::Delete)?;
        Ok(self.transition_to(RequestStatus::Deleted, now, None, false))
    }

    fn transition_to(
        &self,
        to: RequestStatus,
        at: DateTime<Utc>,
        moderator_id: Option<Uuid>,
        reset_pricing: bool,
    ) -> Transition {
        Transition {
            from: self.status,
            to,
            at,
            moderator_id,
            reset_pricing,
        }
    }

    /// Timestamps are written once and never moved.
    pub fn apply_transition(&mut self, transition: &Transition) {
        self.status = transition.to;
        match transition.to {
            RequestStatus::Formed => {
                self.formatted_at.get_or_insert(transition.at);
            }
            RequestStatus::Completed | RequestStatus::Rejected => {
                self.completed_at.get_or_insert(transition.at);
                if self.moderator_id.is_none() {
                    self.moderator_id = transition.moderator_id;
                }
            }
            RequestStatus::Draft | RequestStatus::Deleted => {}
        }
        if transition.reset_pricing {
            self.total_cost = 0.0;
        }
    }
}

/// Lifecycle reset applied to every line together with a pricing reset.
pub fn reset_line(line: &mut RequestLine) {
    line.sub_total = 0.0;
    line.pricing_state = PricingState::Pending;
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> LicenseRequest {
        LicenseRequest::new_draft(7, Uuid::new_v4(), Utc::now())
    }

    fn line(request_id: i64, service_id: i64) -> RequestLine {
        RequestLine {
            id: service_id,
            request_id,
            service_id,
            support_coefficient: 1.0,
            sub_total: 500.0,
            pricing_state: PricingState::Priced,
        }
    }

    #[test]
    fn test_new_draft_defaults() {
        let request = draft();
        assert_eq!(request.status, RequestStatus::Draft);
        assert_eq!(request.usage, UsageParams::default());
        assert_eq!(request.total_cost, 0.0);
        assert!(request.formatted_at.is_none());
    }

    #[test]
    fn test_format_requires_lines() {
        let mut request = draft();
        request.usage.users = 10;

        let err = request.plan_format(&[], false, Utc::now()).unwrap_err();
        assert!(matches!(err, RequestError::PreconditionFailed(_)));
    }

    #[test]
    fn test_format_requires_users_or_cores() {
        let request = draft();
        let err = request
            .plan_format(&[line(7, 1)], false, Utc::now())
            .unwrap_err();
        assert!(matches!(err, RequestError::PreconditionFailed(_)));
    }

    #[test]
    fn test_format_with_cores_only_succeeds() {
        let mut request = draft();
        request.usage.cores = 8;

        let transition = request
            .plan_format(&[line(7, 1)], true, Utc::now())
            .unwrap();
        assert_eq!(transition.from, RequestStatus::Draft);
        assert_eq!(transition.to, RequestStatus::Formed);
        assert!(transition.reset_pricing);
    }

    #[test]
    fn test_complete_from_draft_is_invalid_transition() {
        let request = draft();
        let err = request
            .plan_complete(&Principal::moderator(Uuid::new_v4()), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::InvalidStateTransition {
                from: RequestStatus::Draft,
                to: RequestStatus::Completed
            }
        ));
    }

    #[test]
    fn test_deleted_request_reports_not_found() {
        let mut request = draft();
        let delete = request.plan_delete(Utc::now()).unwrap();
        request.apply_transition(&delete);

        assert!(matches!(
            request.plan_format(&[line(7, 1)], false, Utc::now()),
            Err(RequestError::RequestNotFound(7))
        ));
        assert!(matches!(
            request.plan_complete(&Principal::moderator(Uuid::new_v4()), Utc::now()),
            Err(RequestError::RequestNotFound(7))
        ));
    }

    #[test]
    fn test_non_transition_operation_reports_invalid_state() {
        let mut request = draft();
        request.status = RequestStatus::Formed;

        let err = request.guard(RequestOperation::AddService).unwrap_err();
        assert!(matches!(
            err,
            RequestError::InvalidState {
                status: RequestStatus::Formed,
                operation: RequestOperation::AddService
            }
        ));
        assert!(request.guard(RequestOperation::SetSupportCoefficient).is_ok());
    }

    #[test]
    fn test_transition_guard_follows_lifecycle_graph() {
        let transitions = [
            RequestOperation::Format,
            RequestOperation::Complete,
            RequestOperation::Reject,
            RequestOperation::Delete,
        ];
        let statuses = [
            RequestStatus::Draft,
            RequestStatus::Formed,
            RequestStatus::Completed,
            RequestStatus::Rejected,
        ];

        for status in statuses {
            let mut request = draft();
            request.status = status;
            for operation in transitions {
                let target = operation.target_status().unwrap();
                assert_eq!(
                    request.guard(operation).is_ok(),
                    status.can_transition_to(target),
                    "{} from {}",
                    operation,
                    status
                );
            }
        }
    }

    #[test]
    fn test_complete_stamps_moderator_and_resets_total() {
        let mut request = draft();
        request.status = RequestStatus::Formed;
        request.total_cost = 1_932_000.0;
        let moderator = Principal::moderator(Uuid::new_v4());

        let transition = request.plan_complete(&moderator, Utc::now()).unwrap();
        request.apply_transition(&transition);

        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.moderator_id, Some(moderator.user_id));
        assert!(request.completed_at.is_some());
        assert_eq!(request.total_cost, 0.0);
    }

    #[test]
    fn test_timestamps_are_set_once() {
        let mut request = draft();
        let first = Utc::now();
        request.formatted_at = Some(first);

        request.apply_transition(&Transition {
            from: RequestStatus::Draft,
            to: RequestStatus::Formed,
            at: first + chrono::Duration::seconds(30),
            moderator_id: None,
            reset_pricing: false,
        });

        assert_eq!(request.formatted_at, Some(first));
    }

    #[test]
    fn test_reject_keeps_total() {
        let mut request = draft();
        request.status = RequestStatus::Formed;
        request.total_cost = 250.0;

        let transition = request
            .plan_reject(&Principal::moderator(Uuid::new_v4()), Utc::now())
            .unwrap();
        request.apply_transition(&transition);

        assert_eq!(request.status, RequestStatus::Rejected);
        assert_eq!(request.total_cost, 250.0);
    }
}
