//! Prometheus metrics, one registry per service.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, Encoder,
    IntCounter, IntCounterVec, Registry, TextEncoder,
};
use std::sync::Arc;

/// Request/cache/backend counters for one service.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub requests_total: IntCounterVec,
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub backend_failures_total: IntCounter,
    registry: Arc<Registry>,
}

impl ServiceMetrics {
    pub fn new(service: &str) -> Self {
        let registry = Registry::new();

        let requests_total = register_int_counter_vec_with_registry!(
            format!("vesper_{}_requests_total", service),
            "Total requests received, by endpoint",
            &["endpoint"],
            registry
        )
        .unwrap();

        let cache_hits_total = register_int_counter_with_registry!(
            format!("vesper_{}_cache_hits_total", service),
            "Requests answered from the result cache",
            registry
        )
        .unwrap();

        let cache_misses_total = register_int_counter_with_registry!(
            format!("vesper_{}_cache_misses_total", service),
            "Requests that had to reach the backend",
            registry
        )
        .unwrap();

        let backend_failures_total = register_int_counter_with_registry!(
            format!("vesper_{}_backend_failures_total", service),
            "External model/binary calls that failed",
            registry
        )
        .unwrap();

        Self {
            requests_total,
            cache_hits_total,
            cache_misses_total,
            backend_failures_total,
            registry: Arc::new(registry),
        }
    }

    pub fn observe(&self, endpoint: &str) {
        self.requests_total.with_label_values(&[endpoint]).inc();
    }

    /// Text exposition format for the /metrics endpoints.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_rendered_output() {
        let metrics = ServiceMetrics::new("testsvc");
        metrics.observe("/embed");
        metrics.observe("/embed");
        metrics.cache_hits_total.inc();

        let text = metrics.render();
        assert!(text.contains("vesper_testsvc_requests_total"));
        assert!(text.contains("vesper_testsvc_cache_hits_total 1"));
    }
}
