use actix_web::{web, HttpResponse};

use super::dto::{AddedToRequest, CoefficientBody, ListQuery};
use super::AppState;
use crate::domain::identity::Principal;
use crate::domain::request::{RequestCommand, RequestError, UsagePatch};

// ============================================================================
// Request routes - thin wrappers over RequestCommandHandler
// ============================================================================

/// Adds a catalog entry to the caller's draft, creating the draft if needed.
pub async fn add_service(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
) -> Result<HttpResponse, RequestError> {
    let request = state
        .requests
        .handle(
            &principal,
            RequestCommand::AddService {
                service_id: path.into_inner(),
            },
        )
        .await?;
    let cart = state.requests.cart(&principal).await?;

    Ok(HttpResponse::Ok().json(AddedToRequest {
        request_id: request.id,
        services_count: cart.services_count,
    }))
}

pub async fn create_draft(
    state: web::Data<AppState>,
    principal: Principal,
) -> Result<HttpResponse, RequestError> {
    let draft = state
        .requests
        .handle(&principal, RequestCommand::CreateDraft)
        .await?;
    Ok(HttpResponse::Ok().json(draft))
}

pub async fn cart(
    state: web::Data<AppState>,
    principal: Principal,
) -> Result<HttpResponse, RequestError> {
    Ok(HttpResponse::Ok().json(state.requests.cart(&principal).await?))
}

pub async fn list_requests(
    state: web::Data<AppState>,
    principal: Principal,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, RequestError> {
    let filter = query.into_inner().into_filter()?;
    let requests = state.requests.list(&principal, filter).await?;
    Ok(HttpResponse::Ok().json(requests))
}

pub async fn get_request(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
) -> Result<HttpResponse, RequestError> {
    let details = state.requests.view(&principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(details))
}

pub async fn update_usage(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
    body: web::Json<UsagePatch>,
) -> Result<HttpResponse, RequestError> {
    let command = RequestCommand::UpdateUsage {
        request_id: path.into_inner(),
        patch: body.into_inner(),
    };
    run(&state, &principal, command).await
}

pub async fn format_request(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
) -> Result<HttpResponse, RequestError> {
    let command = RequestCommand::Format {
        request_id: path.into_inner(),
    };
    run(&state, &principal, command).await
}

pub async fn complete_request(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
) -> Result<HttpResponse, RequestError> {
    let command = RequestCommand::Complete {
        request_id: path.into_inner(),
    };
    run(&state, &principal, command).await
}

pub async fn reject_request(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
) -> Result<HttpResponse, RequestError> {
    let command = RequestCommand::Reject {
        request_id: path.into_inner(),
    };
    run(&state, &principal, command).await
}

pub async fn delete_request(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
) -> Result<HttpResponse, RequestError> {
    let command = RequestCommand::Delete {
        request_id: path.into_inner(),
    };
    run(&state, &principal, command).await
}

pub async fn set_coefficient(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<(i64, i64)>,
    body: web::Json<CoefficientBody>,
) -> Result<HttpResponse, RequestError> {
    let (request_id, service_id) = path.into_inner();
    let command = RequestCommand::SetSupportCoefficient {
        request_id,
        service_id,
        coefficient: body.support_coefficient,
    };
    run(&state, &principal, command).await
}

pub async fn remove_service(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse, RequestError> {
    let (request_id, service_id) = path.into_inner();
    let command = RequestCommand::RemoveService {
        request_id,
        service_id,
    };
    run(&state, &principal, command).await
}

async fn run(
    state: &AppState,
    principal: &Principal,
    command: RequestCommand,
) -> Result<HttpResponse, RequestError> {
    let request = state.requests.handle(principal, command).await?;
    Ok(HttpResponse::Ok().json(request))
}
