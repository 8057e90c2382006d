use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::task::PricingTask;
use crate::utils::IsTransient;

// ============================================================================
// External Pricer client
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Pricer did not answer within the timeout: {0}")]
    Timeout(String),

    #[error("Could not reach pricer: {0}")]
    Connection(String),

    #[error("Pricer answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Pricer client setup failed: {0}")]
    Client(String),
}

impl IsTransient for DispatchError {
    fn is_transient(&self) -> bool {
        match self {
            DispatchError::Timeout(_) | DispatchError::Connection(_) => true,
            DispatchError::Status { status, .. } => *status >= 500,
            DispatchError::Client(_) => false,
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            DispatchError::Connection(err.to_string())
        } else {
            DispatchError::Client(err.to_string())
        }
    }
}

/// Accepts a pricing task. Acceptance only means the task was handed over;
/// the result arrives later through the callback endpoint.
#[async_trait]
pub trait Pricer: Send + Sync {
    async fn submit(&self, task: &PricingTask) -> Result<(), DispatchError>;
}

pub struct HttpPricer {
    client: Client,
    endpoint: String,
}

impl HttpPricer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Pricer for HttpPricer {
    async fn submit(&self, task: &PricingTask) -> Result<(), DispatchError> {
        let response = self.client.post(&self.endpoint).json(task).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
