use actix_web::{web, HttpRequest, HttpResponse};

use super::dto::{CallbackAccepted, SubtotalBody};
use super::AppState;
use crate::dispatch::{CallbackTarget, CALLBACK_KEY_HEADER};
use crate::domain::request::RequestError;

/// Sub-total reported by the external pricer for one line.
pub async fn record_subtotal(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(i64, i64)>,
    body: web::Json<SubtotalBody>,
) -> Result<HttpResponse, RequestError> {
    let (request_id, service_id) = path.into_inner();
    let credential = req
        .headers()
        .get(CALLBACK_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    let total_cost = state
        .callbacks
        .ingest(
            CallbackTarget {
                request_id,
                service_id,
            },
            credential,
            body.subtotal,
        )
        .await?;

    Ok(HttpResponse::Ok().json(CallbackAccepted {
        status: "ok",
        total_cost,
    }))
}
