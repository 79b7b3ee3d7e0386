//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Federation Metrics
    pub static ref ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("apbot_activities_received_total", "Total number of activities received at the inbox"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("apbot_activities_sent_total", "Total number of activities delivered to remote inboxes"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("apbot_deliveries_total", "Total number of delivery attempts by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref DELIVERY_DURATION_SECONDS: prometheus::Histogram = prometheus::Histogram::with_opts(
        HistogramOpts::new(
            "apbot_delivery_duration_seconds",
            "Outbound delivery duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("metric can be created");

    // Application Metrics
    pub static ref FOLLOWERS_TOTAL: IntGauge = IntGauge::new(
        "apbot_followers_total",
        "Current number of followers"
    ).expect("metric can be created");
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("apbot_errors_total", "Total number of error responses"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(ACTIVITIES_RECEIVED.clone()))
        .expect("ACTIVITIES_RECEIVED can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_SENT.clone()))
        .expect("ACTIVITIES_SENT can be registered");
    REGISTRY
        .register(Box::new(DELIVERIES_TOTAL.clone()))
        .expect("DELIVERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DELIVERY_DURATION_SECONDS.clone()))
        .expect("DELIVERY_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(FOLLOWERS_TOTAL.clone()))
        .expect("FOLLOWERS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
