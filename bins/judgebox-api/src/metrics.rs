// Prometheus metrics for the HTTP boundary

use crate::error::ApiError;
use judgebox_engine::admission::AdmissionSnapshot;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    static ref REQUESTS: IntCounterVec = register_int_counter_vec!(
        "judgebox_requests_total",
        "Execution requests by route and outcome",
        &["route", "outcome"]
    )
    .expect("judgebox_requests_total registers once");
    static ref REQUEST_SECONDS: HistogramVec = register_histogram_vec!(
        "judgebox_request_duration_seconds",
        "End-to-end execution request latency",
        &["route"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("judgebox_request_duration_seconds registers once");
    static ref SLOTS_ACTIVE: IntGauge = register_int_gauge!(
        "judgebox_execution_slots_active",
        "Execution slots currently held"
    )
    .expect("judgebox_execution_slots_active registers once");
    static ref QUEUE_WAITING: IntGauge = register_int_gauge!(
        "judgebox_execution_queue_waiting",
        "Requests waiting for an execution slot"
    )
    .expect("judgebox_execution_queue_waiting registers once");
}

pub fn record<T>(route: &str, started: Instant, result: &Result<T, ApiError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    REQUESTS.with_label_values(&[route, outcome]).inc();
    REQUEST_SECONDS
        .with_label_values(&[route])
        .observe(started.elapsed().as_secs_f64());
}

/// Text exposition of every registered metric
pub fn render(admission: AdmissionSnapshot) -> Result<String, prometheus::Error> {
    SLOTS_ACTIVE.set(admission.active as i64);
    QUEUE_WAITING.set(admission.queued as i64);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
