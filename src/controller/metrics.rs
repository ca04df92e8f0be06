//! Prometheus metrics for the load balancer controller
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `ncloud_lb_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `ncloud_lb_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `ncloud_lb_cloud_calls_total` (counter): cloud API calls labeled by operation and result.
//! - `ncloud_lb_managed_load_balancers` (gauge): 1 per Service with an active load balancer.
//! - `ncloud_lb_target_registration_total` (counter): registration passes labeled by outcome.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "service"
    pub controller: String,
}

/// Labels for reconcile error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, see `Error::kind`
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CloudCallLabels {
    /// Provider operation, e.g. "createTargetGroup"
    pub operation: String,
    /// "ok" or "error"
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RegistrationLabels {
    /// "complete", "partial", "no_targets" or "failed"
    pub outcome: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 10ms .. ~11min; provisioning passes poll for minutes
        Histogram::new(exponential_buckets(0.01, 2.0, 17))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CLOUD_CALLS_TOTAL: Lazy<Family<CloudCallLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static MANAGED_LOAD_BALANCERS: Lazy<Family<ServiceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static TARGET_REGISTRATION_TOTAL: Lazy<Family<RegistrationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "ncloud_lb_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        // encoder appends `_total` to counters
        "ncloud_lb_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "ncloud_lb_cloud_calls",
        "Naver Cloud API calls by operation and result",
        CLOUD_CALLS_TOTAL.clone(),
    );
    registry.register(
        "ncloud_lb_managed_load_balancers",
        "Services with an active cloud load balancer",
        MANAGED_LOAD_BALANCERS.clone(),
    );
    registry.register(
        "ncloud_lb_target_registration",
        "Target registration passes by outcome",
        TARGET_REGISTRATION_TOTAL.clone(),
    );
    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_cloud_call(operation: &str, ok: bool) {
    let labels = CloudCallLabels {
        operation: operation.to_string(),
        result: if ok { "ok" } else { "error" }.to_string(),
    };
    CLOUD_CALLS_TOTAL.get_or_create(&labels).inc();
}

pub fn set_managed_load_balancer(namespace: &str, name: &str, active: bool) {
    let labels = ServiceLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    };
    if active {
        MANAGED_LOAD_BALANCERS.get_or_create(&labels).set(1);
    } else {
        MANAGED_LOAD_BALANCERS.remove(&labels);
    }
}

pub fn inc_target_registration(outcome: &str) {
    let labels = RegistrationLabels {
        outcome: outcome.to_string(),
    };
    TARGET_REGISTRATION_TOTAL.get_or_create(&labels).inc();
}
