use actix::prelude::*;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod dispatch;
mod domain;
mod http;
mod metrics;
mod store;
mod utils;

#[cfg(test)]
mod test_support;

use config::{AppConfig, Cli, LoggingConfig};
use dispatch::{DispatchActor, HttpPricer, SharedSecretAuthenticator, TaskFactory};
use domain::request::Dispatcher;
use http::AppState;
use store::{LicenseStore, MemoryStore, PgStore};

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured filter
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let (plain, json) = if logging.json {
        (None, Some(fmt::layer().json().with_target(true)))
    } else {
        (Some(fmt::layer().with_target(true).with_thread_ids(true)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?.with_overrides(&cli);
    config.validate()?;

    init_tracing(&config.logging);
    tracing::info!("🚀 Starting license quotation service");

    // === 1. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    // === 2. Store ===
    let store: Arc<dyn LicenseStore> = match &config.database.url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let store = PgStore::connect(url, config.database.max_connections).await?;
            tracing::info!("✅ Connected and migrated");
            Arc::new(store)
        }
        None => {
            tracing::warn!(
                "No database configured - using the in-memory store, data is lost on exit"
            );
            Arc::new(MemoryStore::new())
        }
    };

    // === 3. Pricing: external pricer behind a dispatch actor, or local formula ===
    let authenticator = Arc::new(SharedSecretAuthenticator::new(
        config.pricing.secret_key.clone(),
    ));
    let dispatcher = match &config.pricing.service_url {
        Some(url) => {
            let pricer = Arc::new(HttpPricer::new(url.clone(), config.pricing.timeout())?);
            let queue = DispatchActor::new(
                pricer,
                store.clone(),
                config.pricing.retry(),
                metrics.clone(),
            )
            .start();
            tracing::info!(pricer = %url, "💸 External pricing enabled");

            Some(Dispatcher {
                queue: queue.recipient(),
                tasks: TaskFactory::new(
                    config.server.public_base_url.clone(),
                    authenticator.clone(),
                ),
            })
        }
        None => {
            tracing::info!("No pricer configured - computing costs locally");
            None
        }
    };

    let state = web::Data::new(AppState::new(
        store,
        metrics,
        authenticator,
        dispatcher,
    ));

    // === 4. HTTP ===
    let bind = (config.server.host.clone(), config.server.port);
    tracing::info!(
        "🌐 Listening on http://{}:{} (pricing: {})",
        bind.0,
        bind.1,
        state.pricing_mode.as_str()
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(http::configure)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(bind)?.run().await?;

    tracing::info!("👋 Shut down cleanly");
    Ok(())
}
