use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::RequestError;

// ============================================================================
// Request Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Formed,
    Completed,
    Rejected,
    Deleted,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Formed => "formed",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(RequestStatus::Draft),
            "formed" => Some(RequestStatus::Formed),
            "completed" => Some(RequestStatus::Completed),
            "rejected" => Some(RequestStatus::Rejected),
            "deleted" => Some(RequestStatus::Deleted),
            _ => None,
        }
    }

    /// The lifecycle graph. Everything not listed here is refused.
    pub fn can_transition_to(&self, target: RequestStatus) -> bool {
        matches!(
            (self, target),
            (RequestStatus::Draft, RequestStatus::Formed)
                | (RequestStatus::Draft, RequestStatus::Deleted)
                | (RequestStatus::Formed, RequestStatus::Completed)
                | (RequestStatus::Formed, RequestStatus::Rejected)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Usage parameters
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageParams {
    pub users: i32,
    pub cores: i32,
    pub period: i32,
}

impl Default for UsageParams {
    /// A fresh draft: nobody licensed yet, one period.
    fn default() -> Self {
        Self {
            users: 0,
            cores: 0,
            period: 1,
        }
    }
}

impl UsageParams {
    pub fn has_seats(&self) -> bool {
        self.users > 0 || self.cores > 0
    }
}

/// Sparse usage update coming from the owner of a draft.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct UsagePatch {
    pub users: Option<i32>,
    pub cores: Option<i32>,
    pub period: Option<i32>,
}

impl UsagePatch {
    pub fn validate(&self) -> Result<(), RequestError> {
        if let Some(users) = self.users {
            if users < 0 {
                return Err(RequestError::ValidationFailed(format!(
                    "users cannot be negative (got {})",
                    users
                )));
            }
        }
        if let Some(cores) = self.cores {
            if cores < 0 {
                return Err(RequestError::ValidationFailed(format!(
                    "cores cannot be negative (got {})",
                    cores
                )));
            }
        }
        if let Some(period) = self.period {
            if period < 1 {
                return Err(RequestError::ValidationFailed(format!(
                    "period must be at least 1 (got {})",
                    period
                )));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, usage: &mut UsageParams) {
        if let Some(users) = self.users {
            usage.users = users;
        }
        if let Some(cores) = self.cores {
            usage.cores = cores;
        }
        if let Some(period) = self.period {
            usage.period = period;
        }
    }
}

// ----------------------------------------------------------------------------
// Support coefficient
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SupportCoefficient(f64);

impl SupportCoefficient {
    pub const MIN: f64 = 0.7;
    pub const MAX: f64 = 3.0;
    pub const DEFAULT: f64 = 1.0;

    /// Out-of-range values are pulled into [MIN, MAX]; only non-numbers fail.
    pub fn clamped(value: f64) -> Result<Self, RequestError> {
        if !value.is_finite() {
            return Err(RequestError::ValidationFailed(
                "support coefficient must be a finite number".to_string(),
            ));
        }
        Ok(Self(value.clamp(Self::MIN, Self::MAX)))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for SupportCoefficient {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

// ----------------------------------------------------------------------------
// Request lines
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingState {
    Pending,
    Priced,
    DispatchFailed,
}

impl PricingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingState::Pending => "pending",
            PricingState::Priced => "priced",
            PricingState::DispatchFailed => "dispatch_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PricingState::Pending),
            "priced" => Some(PricingState::Priced),
            "dispatch_failed" => Some(PricingState::DispatchFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestLine {
    pub id: i64,
    pub request_id: i64,
    pub service_id: i64,
    pub support_coefficient: f64,
    pub sub_total: f64,
    pub pricing_state: PricingState,
}

impl RequestLine {
    pub fn is_priced(&self) -> bool {
        self.sub_total > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_string() {
        for status in [
            RequestStatus::Draft,
            RequestStatus::Formed,
            RequestStatus::Completed,
            RequestStatus::Rejected,
            RequestStatus::Deleted,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::parse("archived"), None);
    }

    #[test]
    fn test_lifecycle_graph() {
        assert!(RequestStatus::Draft.can_transition_to(RequestStatus::Formed));
        assert!(RequestStatus::Draft.can_transition_to(RequestStatus::Deleted));
        assert!(RequestStatus::Formed.can_transition_to(RequestStatus::Completed));
        assert!(RequestStatus::Formed.can_transition_to(RequestStatus::Rejected));

        assert!(!RequestStatus::Draft.can_transition_to(RequestStatus::Completed));
        assert!(!RequestStatus::Formed.can_transition_to(RequestStatus::Deleted));
        assert!(!RequestStatus::Completed.can_transition_to(RequestStatus::Rejected));
        assert!(!RequestStatus::Deleted.can_transition_to(RequestStatus::Formed));
    }

    #[test]
    fn test_coefficient_is_clamped() {
        assert_eq!(SupportCoefficient::clamped(0.1).unwrap().value(), 0.7);
        assert_eq!(SupportCoefficient::clamped(5.0).unwrap().value(), 3.0);
        assert_eq!(SupportCoefficient::clamped(1.3).unwrap().value(), 1.3);
        assert!(SupportCoefficient::clamped(f64::NAN).is_err());
    }

    #[test]
    fn test_usage_patch_applies_only_present_fields() {
        let mut usage = UsageParams::default();
        let patch = UsagePatch {
            users: Some(120),
            ..Default::default()
        };
        patch.validate().unwrap();
        patch.apply_to(&mut usage);

        assert_eq!(usage.users, 120);
        assert_eq!(usage.cores, 0);
        assert_eq!(usage.period, 1);
    }

    #[test]
    fn test_usage_patch_rejects_out_of_range_values() {
        let negative_users = UsagePatch {
            users: Some(-1),
            ..Default::default()
        };
        assert!(negative_users.validate().is_err());

        let zero_period = UsagePatch {
            period: Some(0),
            ..Default::default()
        };
        assert!(zero_period.validate().is_err());
    }
}
