use actix_web::{web, HttpResponse};

use super::dto::{ImageBody, ServiceQuery};
use super::AppState;
use crate::domain::catalog::{CatalogError, CreateService, ServicePatch};
use crate::domain::identity::Principal;

// ============================================================================
// Catalog routes
// ============================================================================

pub async fn list_services(
    state: web::Data<AppState>,
    query: web::Query<ServiceQuery>,
) -> Result<HttpResponse, CatalogError> {
    let services = state.catalog.list(query.query.as_deref()).await?;
    Ok(HttpResponse::Ok().json(services))
}

pub async fn get_service(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let service = state.catalog.get(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(service))
}

pub async fn create_service(
    state: web::Data<AppState>,
    principal: Principal,
    body: web::Json<CreateService>,
) -> Result<HttpResponse, CatalogError> {
    let service = state.catalog.create(&principal, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(service))
}

pub async fn update_service(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
    body: web::Json<ServicePatch>,
) -> Result<HttpResponse, CatalogError> {
    let service = state
        .catalog
        .update(&principal, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(service))
}

pub async fn delete_service(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    state.catalog.delete(&principal, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn set_image(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
    body: web::Json<ImageBody>,
) -> Result<HttpResponse, CatalogError> {
    let service = state
        .catalog
        .set_image(&principal, path.into_inner(), Some(body.into_inner().image_url))
        .await?;
    Ok(HttpResponse::Ok().json(service))
}

pub async fn clear_image(
    state: web::Data<AppState>,
    principal: Principal,
    path: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let service = state
        .catalog
        .set_image(&principal, path.into_inner(), None)
        .await?;
    Ok(HttpResponse::Ok().json(service))
}
