use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::request::{RequestError, RequestStatus};
use crate::store::RequestFilter;

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ServiceQuery {
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageBody {
    pub image_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CoefficientBody {
    pub support_coefficient: f64,
}

#[derive(Debug, Deserialize)]
pub struct SubtotalBody {
    pub subtotal: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl ListQuery {
    pub fn into_filter(self) -> Result<RequestFilter, RequestError> {
        let status = non_empty(self.status)
            .map(|raw| {
                RequestStatus::parse(&raw).ok_or_else(|| {
                    RequestError::ValidationFailed(format!("unknown status '{}'", raw))
                })
            })
            .transpose()?;

        let formatted_from = non_empty(self.date_from)
            .map(|raw| parse_date("date_from", &raw))
            .transpose()?;
        let formatted_to = non_empty(self.date_to)
            .map(|raw| parse_date("date_to", &raw))
            .transpose()?;

        Ok(RequestFilter {
            status,
            formatted_from,
            formatted_to,
            creator_id: None,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, RequestError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        RequestError::ValidationFailed(format!("{} must be YYYY-MM-DD (got '{}')", field, raw))
    })
}

#[derive(Debug, Serialize)]
pub struct AddedToRequest {
    pub request_id: i64,
    pub services_count: usize,
}

#[derive(Debug, Serialize)]
pub struct CallbackAccepted {
    pub status: &'static str,
    pub total_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_into_filter() {
        let query = ListQuery {
            status: Some("formed".to_string()),
            date_from: Some("2024-01-01".to_string()),
            date_to: Some(" ".to_string()),
        };

        let filter = query.into_filter().unwrap();
        assert_eq!(filter.status, Some(RequestStatus::Formed));
        assert_eq!(filter.formatted_from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(filter.formatted_to, None);
        assert_eq!(filter.creator_id, None);
    }

    #[test]
    fn test_list_query_rejects_garbage() {
        let bad_status = ListQuery {
            status: Some("pending".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_status.into_filter(),
            Err(RequestError::ValidationFailed(_))
        ));

        let bad_date = ListQuery {
            date_to: Some("01/02/2024".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_date.into_filter(),
            Err(RequestError::ValidationFailed(_))
        ));
    }
}
