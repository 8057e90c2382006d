// ============================================================================
// HTTP surface - actix-web routes over the catalog, requests and callbacks
// ============================================================================

pub mod callbacks;
pub mod catalog;
pub mod dto;
pub mod error;
pub mod identity;
pub mod requests;

use actix_web::web;
use std::sync::Arc;

use crate::dispatch::{Authenticator, CallbackIngestor};
use crate::domain::catalog::CatalogService;
use crate::domain::pricing::{PricingMode, RecalculationEngine};
use crate::domain::request::{Dispatcher, RequestCommandHandler, RequestError};
use crate::metrics::{health_handler, metrics_handler, ping_handler, Metrics};
use crate::store::LicenseStore;

pub use error::ErrorBody;
pub use identity::{USER_ID_HEADER, USER_ROLE_HEADER};

/// Everything a handler needs, shared across workers.
pub struct AppState {
    pub store: Arc<dyn LicenseStore>,
    pub catalog: CatalogService,
    pub requests: RequestCommandHandler,
    pub callbacks: CallbackIngestor,
    pub metrics: Arc<Metrics>,
    pub pricing_mode: PricingMode,
}

impl AppState {
    /// The pricing mode follows from whether a dispatcher is wired in, so
    /// recalculation and completion can never disagree about it.
    pub fn new(
        store: Arc<dyn LicenseStore>,
        metrics: Arc<Metrics>,
        authenticator: Arc<dyn Authenticator>,
        dispatcher: Option<Dispatcher>,
    ) -> Self {
        let pricing_mode = if dispatcher.is_some() {
            PricingMode::External
        } else {
            PricingMode::Synchronous
        };
        let recalculation = Arc::new(RecalculationEngine::new(
            store.clone(),
            pricing_mode,
            metrics.clone(),
        ));

        Self {
            catalog: CatalogService::new(store.clone()),
            requests: RequestCommandHandler::new(
                store.clone(),
                recalculation.clone(),
                dispatcher,
                metrics.clone(),
            ),
            callbacks: CallbackIngestor::new(
                store.clone(),
                recalculation,
                authenticator,
                metrics.clone(),
            ),
            store,
            metrics,
            pricing_mode,
        }
    }
}

/// Malformed bodies, queries and paths answer with the same `fail` body as
/// domain errors.
fn extractor_configs(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        RequestError::ValidationFailed(err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        RequestError::ValidationFailed(err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        RequestError::ValidationFailed(err.to_string()).into()
    }));
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    extractor_configs(cfg);

    cfg.route("/ping", web::get().to(ping_handler))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .service(
            web::scope("/api")
                // Catalog
                .service(
                    web::resource("/services")
                        .route(web::get().to(catalog::list_services))
                        .route(web::post().to(catalog::create_service)),
                )
                .service(
                    web::resource("/services/{id}")
                        .route(web::get().to(catalog::get_service))
                        .route(web::put().to(catalog::update_service))
                        .route(web::delete().to(catalog::delete_service)),
                )
                .service(
                    web::resource("/services/{id}/image")
                        .route(web::put().to(catalog::set_image))
                        .route(web::delete().to(catalog::clear_image)),
                )
                .service(
                    web::resource("/services/{id}/add-to-request")
                        .route(web::post().to(requests::add_service)),
                )
                // Requests; literal segments before `{id}`
                .service(
                    web::resource("/requests/draft").route(web::post().to(requests::create_draft)),
                )
                .service(web::resource("/requests/cart").route(web::get().to(requests::cart)))
                .service(
                    web::resource("/requests").route(web::get().to(requests::list_requests)),
                )
                .service(
                    web::resource("/requests/{id}")
                        .route(web::get().to(requests::get_request))
                        .route(web::put().to(requests::update_usage))
                        .route(web::delete().to(requests::delete_request)),
                )
                .service(
                    web::resource("/requests/{id}/format")
                        .route(web::put().to(requests::format_request)),
                )
                .service(
                    web::resource("/requests/{id}/complete")
                        .route(web::put().to(requests::complete_request)),
                )
                .service(
                    web::resource("/requests/{id}/reject")
                        .route(web::put().to(requests::reject_request)),
                )
                .service(
                    web::resource("/requests/{id}/services/{service_id}")
                        .route(web::put().to(requests::set_coefficient))
                        .route(web::delete().to(requests::remove_service)),
                )
                // Pricer callbacks
                .service(
                    web::resource("/async/requests/{id}/services/{service_id}/subtotal")
                        .route(web::put().to(callbacks::record_subtotal)),
                ),
        );
}
