//! Metrics sink for services.
//!
//! # Metrics
//! - `tollgate_services` (gauge): services currently inside `serve`
//! - `tollgate_service_requests_total` (counter): connections handed to a handler, by service and client
//! - `tollgate_service_requests_in_flight` (gauge): connections currently being handled, by service and client
//! - `tollgate_service_request_duration_seconds` (histogram): handler duration, by service
//! - `tollgate_service_handler_errors_total` (counter): handler failures, by service and client
//!
//! The sink is injected into each service. [`NoopMetrics`] is the default so
//! the engine runs without any backend; [`PrometheusMetrics`] forwards to the
//! `metrics` facade, which the binary backs with a Prometheus exporter.

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::Label;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const SERVICES_GAUGE: &str = "tollgate_services";
pub const SERVICE_REQUESTS_COUNTER: &str = "tollgate_service_requests_total";
pub const SERVICE_REQUESTS_IN_FLIGHT_GAUGE: &str = "tollgate_service_requests_in_flight";
pub const SERVICE_REQUEST_DURATION_OBSERVER: &str = "tollgate_service_request_duration_seconds";
pub const SERVICE_HANDLER_ERRORS_COUNTER: &str = "tollgate_service_handler_errors_total";

/// Label pairs attached to a metric update
pub type Labels<'a> = &'a [(&'static str, &'a str)];

/// Best-effort metrics sink
///
/// Implementations must tolerate concurrent updates from every connection
/// task of every service.
pub trait Metrics: Send + Sync {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>);

    fn increment_gauge(&self, name: &'static str, labels: Labels<'_>);

    fn decrement_gauge(&self, name: &'static str, labels: Labels<'_>);

    fn observe(&self, name: &'static str, labels: Labels<'_>, value: f64);

    fn observe_duration(&self, name: &'static str, labels: Labels<'_>, elapsed: Duration) {
        self.observe(name, labels, elapsed.as_secs_f64());
    }
}

/// Sink that drops every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment_counter(&self, _name: &'static str, _labels: Labels<'_>) {}

    fn increment_gauge(&self, _name: &'static str, _labels: Labels<'_>) {}

    fn decrement_gauge(&self, _name: &'static str, _labels: Labels<'_>) {}

    fn observe(&self, _name: &'static str, _labels: Labels<'_>, _value: f64) {}
}

/// Sink backed by the process-wide `metrics` recorder
///
/// Until a recorder is installed (see [`install_prometheus`]) every update is
/// a no-op inside the facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

fn to_labels(labels: Labels<'_>) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.to_string()))
        .collect()
}

impl Metrics for PrometheusMetrics {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        ::metrics::counter!(name, to_labels(labels)).increment(1);
    }

    fn increment_gauge(&self, name: &'static str, labels: Labels<'_>) {
        ::metrics::gauge!(name, to_labels(labels)).increment(1.0);
    }

    fn decrement_gauge(&self, name: &'static str, labels: Labels<'_>) {
        ::metrics::gauge!(name, to_labels(labels)).decrement(1.0);
    }

    fn observe(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        ::metrics::histogram!(name, to_labels(labels)).record(value);
    }
}

/// Installs the global Prometheus recorder with a scrape endpoint on `addr`
///
/// Must be called from within a tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test_utils::InMemoryMetrics;

    #[test]
    fn test_noop_metrics_accepts_updates() {
        let sink = NoopMetrics;
        sink.increment_counter(SERVICE_REQUESTS_COUNTER, &[("service", "a")]);
        sink.observe_duration(SERVICE_REQUEST_DURATION_OBSERVER, &[], Duration::from_secs(1));
    }

    #[test]
    fn test_prometheus_metrics_without_recorder_is_noop() {
        let sink = PrometheusMetrics;
        sink.increment_gauge(SERVICES_GAUGE, &[]);
        sink.decrement_gauge(SERVICES_GAUGE, &[]);
    }

    #[test]
    fn test_in_memory_metrics_tracks_labels_separately() {
        let sink = InMemoryMetrics::default();
        let a = [("service", "svc"), ("client", "10.0.0.1")];
        let b = [("service", "svc"), ("client", "10.0.0.2")];

        sink.increment_counter(SERVICE_REQUESTS_COUNTER, &a);
        sink.increment_counter(SERVICE_REQUESTS_COUNTER, &a);
        sink.increment_counter(SERVICE_REQUESTS_COUNTER, &b);
        sink.increment_gauge(SERVICE_REQUESTS_IN_FLIGHT_GAUGE, &a);
        sink.decrement_gauge(SERVICE_REQUESTS_IN_FLIGHT_GAUGE, &a);

        assert_eq!(sink.value(SERVICE_REQUESTS_COUNTER, &a), 2.0);
        assert_eq!(sink.value(SERVICE_REQUESTS_COUNTER, &b), 1.0);
        assert_eq!(sink.value(SERVICE_REQUESTS_IN_FLIGHT_GAUGE, &a), 0.0);
    }
}
