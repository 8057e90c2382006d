use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::{Authenticator, CallbackTarget};
use crate::domain::catalog::LicenseService;
use crate::domain::request::{LicenseRequest, RequestLine};

// ============================================================================
// Pricing Tasks
// ============================================================================

/// Body posted to the external pricer, one per live line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTask {
    pub request_id: i64,
    pub service_id: i64,
    pub license_type: String,
    pub base_price: f64,
    pub support_coefficient: f64,
    pub users: i32,
    pub cores: i32,
    pub period: i32,
    pub callback_url: String,
    pub secret_key: String,
}

pub struct TaskFactory {
    public_base_url: String,
    authenticator: Arc<dyn Authenticator>,
}

impl TaskFactory {
    pub fn new(public_base_url: impl Into<String>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            authenticator,
        }
    }

    pub fn callback_url(&self, target: CallbackTarget) -> String {
        format!(
            "{}/api/async/requests/{}/services/{}/subtotal",
            self.public_base_url, target.request_id, target.service_id
        )
    }

    /// Lines whose catalog entry is missing or soft-deleted get no task.
    pub fn build(
        &self,
        request: &LicenseRequest,
        lines: &[(RequestLine, Option<LicenseService>)],
    ) -> Vec<PricingTask> {
        lines
            .iter()
            .filter_map(|(line, service)| {
                let service = service.as_ref().filter(|s| s.is_live())?;
                let target = CallbackTarget {
                    request_id: request.id,
                    service_id: line.service_id,
                };
                Some(PricingTask {
                    request_id: request.id,
                    service_id: line.service_id,
                    license_type: service.license_type.as_str().to_string(),
                    base_price: service.base_price,
                    support_coefficient: line.support_coefficient,
                    users: request.usage.users,
                    cores: request.usage.cores,
                    period: request.usage.period,
                    callback_url: self.callback_url(target),
                    secret_key: self.authenticator.credential_for(target),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::auth::SharedSecretAuthenticator;
    use crate::domain::catalog::LicenseType;
    use crate::domain::request::PricingState;
    use chrono::Utc;
    use uuid::Uuid;

    fn service(id: i64, is_deleted: bool) -> LicenseService {
        LicenseService {
            id,
            name: format!("service-{}", id),
            description: String::new(),
            base_price: 16100.0,
            license_type: LicenseType::PerUser,
            image_url: None,
            is_deleted,
        }
    }

    fn line(service_id: i64) -> RequestLine {
        RequestLine {
            id: service_id * 10,
            request_id: 4,
            service_id,
            support_coefficient: 1.3,
            sub_total: 0.0,
            pricing_state: PricingState::Pending,
        }
    }

    #[test]
    fn test_one_task_per_live_line() {
        let factory = TaskFactory::new(
            "http://quotes.local/",
            Arc::new(SharedSecretAuthenticator::new("key")),
        );
        let mut request = LicenseRequest::new_draft(4, Uuid::new_v4(), Utc::now());
        request.usage.users = 120;

        let tasks = factory.build(
            &request,
            &[
                (line(1), Some(service(1, false))),
                (line(2), Some(service(2, true))),
                (line(3), None),
            ],
        );

        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.service_id, 1);
        assert_eq!(task.license_type, "per_user");
        assert_eq!(task.users, 120);
        assert_eq!(task.support_coefficient, 1.3);
        assert_eq!(task.secret_key, "key");
        assert_eq!(
            task.callback_url,
            "http://quotes.local/api/async/requests/4/services/1/subtotal"
        );
    }
}
