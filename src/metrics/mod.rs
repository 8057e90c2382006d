mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

pub use server::{health_handler, metrics_handler, ping_handler};

// ============================================================================
// Metrics Module - Prometheus metrics for the quotation service
// ============================================================================
//
// Covers:
// - lifecycle transitions and refused operations
// - recalculation latency
// - pricing dispatch attempts and outcomes
// - pricing callbacks
//
// Everything is registered on one Registry and scraped via /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Lifecycle
    pub request_transitions: IntCounterVec,
    pub operations_rejected: IntCounterVec,

    // Recalculation
    pub recalculation_duration: HistogramVec,

    // Dispatch
    pub dispatch_attempts: IntCounterVec,
    pub dispatch_outcomes: IntCounterVec,

    // Callbacks
    pub callbacks: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_transitions = IntCounterVec::new(
            Opts::new(
                "license_request_transitions_total",
                "Lifecycle transitions by target status",
            ),
            &["to"],
        )?;
        registry.register(Box::new(request_transitions.clone()))?;

        let operations_rejected = IntCounterVec::new(
            Opts::new(
                "license_request_operations_rejected_total",
                "Request operations refused, by operation and reason",
            ),
            &["operation", "reason"],
        )?;
        registry.register(Box::new(operations_rejected.clone()))?;

        let recalculation_duration = HistogramVec::new(
            HistogramOpts::new(
                "license_recalculation_duration_seconds",
                "Time spent recalculating a request total",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["mode"],
        )?;
        registry.register(Box::new(recalculation_duration.clone()))?;

        let dispatch_attempts = IntCounterVec::new(
            Opts::new(
                "pricing_dispatch_attempts_total",
                "Outbound pricing calls by attempt number",
            ),
            &["attempt"],
        )?;
        registry.register(Box::new(dispatch_attempts.clone()))?;

        let dispatch_outcomes = IntCounterVec::new(
            Opts::new(
                "pricing_dispatch_tasks_total",
                "Pricing tasks by final delivery outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(dispatch_outcomes.clone()))?;

        let callbacks = IntCounterVec::new(
            Opts::new("pricing_callbacks_total", "Pricing callbacks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(callbacks.clone()))?;

        Ok(Self {
            registry,
            request_transitions,
            operations_rejected,
            recalculation_duration,
            dispatch_attempts,
            dispatch_outcomes,
            callbacks,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, to: &str) {
        self.request_transitions.with_label_values(&[to]).inc();
    }

    pub fn record_rejected_operation(&self, operation: &str, reason: &str) {
        self.operations_rejected
            .with_label_values(&[operation, reason])
            .inc();
    }

    pub fn observe_recalculation(&self, mode: &str, duration_secs: f64) {
        self.recalculation_duration
            .with_label_values(&[mode])
            .observe(duration_secs);
    }

    pub fn record_dispatch_attempt(&self, attempt: u32) {
        self.dispatch_attempts
            .with_label_values(&[&attempt.to_string()])
            .inc();
    }

    pub fn record_dispatch_outcome(&self, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        self.dispatch_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_callback(&self, outcome: &str) {
        self.callbacks.with_label_values(&[outcome]).inc();
    }
}
