//! GPU sampling and broadcast loop.
//!
//! One task samples the provider at a fixed interval, appends to the
//! rolling history, derives model buckets and recommendations, and fans
//! the frame out to every subscriber. A failed sample skips the
//! broadcast and backs off; a failed send drops that subscriber after
//! the broadcast pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vesper_common::gpu::{
    classify_processes, derive_recommendations, GpuFrameData, GpuSnapshot, WsFrame,
};
use vesper_common::{RollingHistory, ServiceError};

use crate::config::GpuConfig;
use super::provider::GpuStatsProvider;

/// Multiplier applied to the sampling interval after a failed sample.
const BACKOFF_FACTOR: u32 = 5;

struct MonitorInner<P> {
    provider: P,
    history: Mutex<RollingHistory<GpuSnapshot>>,
    subscribers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    running: AtomicBool,
    interval: Duration,
    frame_history: usize,
    idle_ping: Duration,
}

pub struct GpuMonitor<P> {
    inner: Arc<MonitorInner<P>>,
}

impl<P> Clone for GpuMonitor<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: GpuStatsProvider> GpuMonitor<P> {
    pub fn new(provider: P, config: &GpuConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                provider,
                history: Mutex::new(RollingHistory::new(config.history_capacity)),
                subscribers: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                interval: Duration::from_secs(config.interval_secs),
                frame_history: config.frame_history,
                idle_ping: Duration::from_secs(config.idle_ping_secs),
            }),
        }
    }

    pub fn provider_name(&self) -> String {
        self.inner.provider.name()
    }

    pub fn idle_ping_interval(&self) -> Duration {
        self.inner.idle_ping
    }

    /// Register a subscriber; frames arrive on the returned channel.
    pub fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner.subscribers.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.inner.subscribers.lock().unwrap().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }

    /// Everything currently retained, oldest first.
    pub fn full_history(&self) -> Vec<GpuSnapshot> {
        self.inner.history.lock().unwrap().to_vec()
    }

    /// Build the broadcast frame for one snapshot: current stats, model
    /// buckets, recommendations, and the history tail.
    fn build_frame(&self, stats: GpuSnapshot) -> String {
        let models = classify_processes(&stats.processes);
        let recommendations = derive_recommendations(&stats);
        let history = self
            .inner
            .history
            .lock()
            .unwrap()
            .last_n(self.inner.frame_history);

        let frame = WsFrame::GpuStats {
            data: GpuFrameData {
                current: stats,
                models,
                recommendations,
                history,
            },
        };
        serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string())
    }

    /// Fresh sample formatted like a periodic broadcast, sent to newly
    /// connected subscribers. The sample is not recorded in the history.
    pub fn snapshot_frame(&self) -> Result<String, ServiceError> {
        let stats = self.inner.provider.sample()?;
        Ok(self.build_frame(stats))
    }

    /// One loop iteration: sample, record, broadcast.
    pub fn tick(&self) -> Result<(), ServiceError> {
        let stats = self.inner.provider.sample()?;
        self.inner.history.lock().unwrap().push(stats.clone());
        let frame = self.build_frame(stats);
        self.broadcast(frame);
        Ok(())
    }

    /// Send to every subscriber; failed sends mark the subscriber and
    /// removals apply once the pass is complete.
    fn broadcast(&self, frame: String) {
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        let failed: Vec<Uuid> = subscribers
            .iter()
            .filter(|(_, tx)| tx.send(frame.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        for id in failed {
            debug!("Dropping subscriber {} after failed send", id);
            subscribers.remove(&id);
        }
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawn the sampling loop. Idempotent: a second call while running
    /// is a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.run().await;
        });
    }

    async fn run(&self) {
        info!(
            "GPU monitor loop started ({} provider, {:?} interval)",
            self.provider_name(),
            self.inner.interval
        );
        while self.inner.running.load(Ordering::SeqCst) {
            match self.tick() {
                Ok(()) => tokio::time::sleep(self.inner.interval).await,
                Err(e) => {
                    warn!("GPU sampling failed: {}; backing off", e);
                    tokio::time::sleep(self.inner.interval * BACKOFF_FACTOR).await;
                }
            }
        }
        info!("GPU monitor loop stopped");
    }
}
