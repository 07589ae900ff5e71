//! Metrics collection using prometheus-client.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Labels for downstream connection metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ListenerLabels {
    pub listener: String,
}

/// Labels for per-upstream metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamLabels {
    pub upstream: String,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Total downstream connections accepted.
    connections_total: Family<ListenerLabels, Counter>,
    /// Downstream connections currently being handled.
    active_connections: Family<ListenerLabels, Gauge>,
    /// In-flight sessions per upstream host, refreshed on scrape.
    upstream_in_flight: Family<UpstreamLabels, Gauge>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let connections_total = Family::<ListenerLabels, Counter>::default();
        let active_connections = Family::<ListenerLabels, Gauge>::default();
        let upstream_in_flight = Family::<UpstreamLabels, Gauge>::default();

        registry.register(
            "tcplb_connections",
            "Total number of downstream connections accepted",
            connections_total.clone(),
        );
        registry.register(
            "tcplb_active_connections",
            "Number of downstream connections currently being handled",
            active_connections.clone(),
        );
        registry.register(
            "tcplb_upstream_in_flight",
            "Number of in-flight sessions per upstream host",
            upstream_in_flight.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                connections_total,
                active_connections,
                upstream_in_flight,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record an accepted downstream connection.
    pub fn connection_opened(&self, listener: &str) {
        let labels = ListenerLabels {
            listener: listener.to_string(),
        };
        self.inner.connections_total.get_or_create(&labels).inc();
        self.inner.active_connections.get_or_create(&labels).inc();
    }

    /// Record a finished downstream connection.
    pub fn connection_closed(&self, listener: &str) {
        let labels = ListenerLabels {
            listener: listener.to_string(),
        };
        self.inner.active_connections.get_or_create(&labels).dec();
    }

    /// Update the in-flight gauge for one upstream host.
    pub fn set_upstream_in_flight(&self, upstream: &str, count: u64) {
        let labels = UpstreamLabels {
            upstream: upstream.to_string(),
        };
        self.inner
            .upstream_in_flight
            .get_or_create(&labels)
            .set(count as i64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
