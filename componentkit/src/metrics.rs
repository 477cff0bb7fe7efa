//! Ambient Prometheus metrics, generalized from the teacher's own
//! reconcile-module counters/gauges/histograms (one family per CRD
//! field of interest, registered once via a lazily-initialized
//! registry) into a single family keyed by `provider`, since
//! componentkit runs one `Controller` per provider against a shared
//! `Component` kind rather than one per kind.

use const_format::concatcp;
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

const METRICS_PREFIX: &str = "componentkit_";

lazy_static! {
    pub static ref RECONCILE_COUNTER: CounterVec = register_counter_vec!(
        concatcp!(METRICS_PREFIX, "reconcile_total"),
        "Number of reconciliations, by provider.",
        &["provider", "namespace"]
    )
    .unwrap();
    pub static ref PHASE_TRANSITION_COUNTER: CounterVec = register_counter_vec!(
        concatcp!(METRICS_PREFIX, "phase_transition_total"),
        "Number of phase transitions, by provider and resulting phase.",
        &["provider", "namespace", "phase"]
    )
    .unwrap();
    pub static ref OPERATION_ERROR_COUNTER: CounterVec = register_counter_vec!(
        concatcp!(METRICS_PREFIX, "operation_error_total"),
        "Number of provider-reported errors, by provider, operation and kind (transient/permanent).",
        &["provider", "operation", "kind"]
    )
    .unwrap();
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        concatcp!(METRICS_PREFIX, "reconcile_duration_seconds"),
        "Time spent inside a single reconcile call, by provider.",
        &["provider"]
    )
    .unwrap();
}

/// Thin, cheaply-cloneable handle bound to one provider's labels, handed
/// to the reconciler the way the teacher threads its `ReconcileContext`
/// through `reconcile`.
#[derive(Clone)]
pub struct ControllerMetrics {
    provider: String,
}

impl ControllerMetrics {
    pub fn new(provider_name: impl Into<String>) -> Self {
        ControllerMetrics {
            provider: provider_name.into(),
        }
    }

    pub fn record_reconcile(&self, namespace: &str) {
        RECONCILE_COUNTER
            .with_label_values(&[&self.provider, namespace])
            .inc();
    }

    pub fn record_phase(&self, namespace: &str, phase: &str) {
        PHASE_TRANSITION_COUNTER
            .with_label_values(&[&self.provider, namespace, phase])
            .inc();
    }

    pub fn record_error(&self, operation: &str, transient: bool) {
        let kind = if transient { "transient" } else { "permanent" };
        OPERATION_ERROR_COUNTER
            .with_label_values(&[&self.provider, operation, kind])
            .inc();
    }

    pub fn time_reconcile(&self) -> prometheus::HistogramTimer {
        RECONCILE_DURATION
            .with_label_values(&[&self.provider])
            .start_timer()
    }
}
