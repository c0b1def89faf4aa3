//! GPU telemetry service: WebSocket stream plus the sampling loop.

pub mod monitor;
pub mod provider;
pub mod ws;

use std::sync::Arc;

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::metrics::ServiceMetrics;
pub use monitor::GpuMonitor;
pub use provider::{
    select_provider, GpuStatsProvider, MockGpuProvider, NvidiaSmiProvider, SystemProvider,
};

pub struct GpuServiceState<P> {
    pub monitor: GpuMonitor<P>,
    pub metrics: Arc<ServiceMetrics>,
}

impl<P> Clone for GpuServiceState<P> {
    fn clone(&self) -> Self {
        Self {
            monitor: self.monitor.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<P: GpuStatsProvider> GpuServiceState<P> {
    pub fn new(monitor: GpuMonitor<P>) -> Self {
        Self {
            monitor,
            metrics: Arc::new(ServiceMetrics::new("gpu")),
        }
    }
}

pub fn router<P: GpuStatsProvider>(state: GpuServiceState<P>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler::<P>))
        .route("/health", get(health::<P>))
        .route("/metrics", get(metrics_text::<P>))
        .with_state(state)
}

async fn health<P: GpuStatsProvider>(
    State(state): State<GpuServiceState<P>>,
) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "vesper-gpu",
        "provider": state.monitor.provider_name(),
        "subscribers": state.monitor.subscriber_count(),
    }))
}

async fn metrics_text<P: GpuStatsProvider>(State(state): State<GpuServiceState<P>>) -> String {
    state.metrics.render()
}
