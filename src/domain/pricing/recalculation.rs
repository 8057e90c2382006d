use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::formula;
use crate::domain::catalog::LicenseService;
use crate::domain::request::{LicenseRequest, PricingState, RequestError, RequestLine};
use crate::metrics::Metrics;
use crate::store::LicenseStore;

// ============================================================================
// Recalculation Engine
// ============================================================================
//
// Total cost is always the sum of sub-totals over lines whose catalog entry
// is still live. The store runs the plan while holding the request, so the
// read of lines and the write of the total cannot interleave with another
// writer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingMode {
    /// No external pricer: sub-totals come from the local formula.
    Synchronous,
    /// Sub-totals arrive through pricing callbacks; only re-sum.
    External,
}

impl PricingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingMode::Synchronous => "synchronous",
            PricingMode::External => "external",
        }
    }
}

/// A line together with its catalog entry, if the entry still exists.
#[derive(Debug, Clone)]
pub struct SnapshotLine {
    pub line: RequestLine,
    pub service: Option<LicenseService>,
}

impl SnapshotLine {
    pub fn live_service(&self) -> Option<&LicenseService> {
        self.service.as_ref().filter(|s| s.is_live())
    }
}

#[derive(Debug, Clone)]
pub struct PricingSnapshot {
    pub request: LicenseRequest,
    pub lines: Vec<SnapshotLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineRepricing {
    pub line_id: i64,
    pub sub_total: f64,
    pub pricing_state: PricingState,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Repricing {
    pub lines: Vec<LineRepricing>,
    pub total_cost: f64,
}

pub fn plan_repricing(mode: PricingMode, snapshot: &PricingSnapshot) -> Repricing {
    let mut plan = Repricing::default();

    for entry in &snapshot.lines {
        let Some(service) = entry.live_service() else {
            continue;
        };

        let sub_total = match mode {
            PricingMode::Synchronous => {
                let sub_total = formula::line_subtotal(
                    service.base_price,
                    &service.license_type,
                    &snapshot.request.usage,
                    entry.line.support_coefficient,
                );
                plan.lines.push(LineRepricing {
                    line_id: entry.line.id,
                    sub_total,
                    pricing_state: PricingState::Priced,
                });
                sub_total
            }
            PricingMode::External => entry.line.sub_total,
        };

        plan.total_cost += sub_total;
    }

    plan.total_cost = formula::round_cents(plan.total_cost);
    plan
}

pub struct RecalculationEngine {
    store: Arc<dyn LicenseStore>,
    mode: PricingMode,
    metrics: Arc<Metrics>,
}

impl RecalculationEngine {
    pub fn new(store: Arc<dyn LicenseStore>, mode: PricingMode, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            mode,
            metrics,
        }
    }

    pub fn mode(&self) -> PricingMode {
        self.mode
    }

    /// Recomputes and persists the request total. Safe to call repeatedly.
    pub async fn recalculate(&self, request_id: i64) -> Result<f64, RequestError> {
        let started = Instant::now();
        let mode = self.mode;

        let total = self
            .store
            .reprice(request_id, &move |snapshot| plan_repricing(mode, snapshot))
            .await?;

        self.metrics
            .observe_recalculation(mode.as_str(), started.elapsed().as_secs_f64());
        debug!(request_id, total, mode = mode.as_str(), "Recalculated request total");

        Ok(total)
    }
}
