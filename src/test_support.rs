// Shared fixtures for unit tests.

use actix::prelude::*;
use std::sync::{Arc, Mutex};

use crate::dispatch::DispatchBatch;
use crate::domain::catalog::{LicenseService, LicenseType, NewService};
use crate::store::LicenseStore;

pub async fn seed_service(
    store: &dyn LicenseStore,
    name: &str,
    base_price: f64,
    license_type: LicenseType,
) -> LicenseService {
    store
        .create_service(NewService {
            name: name.to_string(),
            description: format!("{} license", name),
            base_price,
            license_type,
        })
        .await
        .unwrap()
}

/// Stands in for the dispatch actor and records every batch it receives.
#[derive(Default)]
pub struct BatchCollector {
    pub batches: Arc<Mutex<Vec<DispatchBatch>>>,
}

impl Actor for BatchCollector {
    type Context = Context<Self>;
}

impl Handler<DispatchBatch> for BatchCollector {
    type Result = ();

    fn handle(&mut self, msg: DispatchBatch, _ctx: &mut Self::Context) {
        self.batches.lock().unwrap().push(msg);
    }
}
