//! GPU monitor loop behavior, driven tick by tick with scripted
//! providers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use vesper_common::gpu::{epoch_seconds, GpuProcess, GpuSnapshot};
use vesper_common::ServiceError;
use vesperd::config::GpuConfig;
use vesperd::services::gpu::{GpuMonitor, GpuStatsProvider};

fn snapshot(sequence: u64) -> GpuSnapshot {
    GpuSnapshot {
        timestamp: epoch_seconds() + sequence as f64,
        name: "Scripted GPU".to_string(),
        gpu_id: 0,
        vram_total: 11264,
        vram_used: 2048,
        vram_free: 9216,
        vram_percent: 18.2,
        gpu_utilization: 50,
        memory_utilization: 30,
        temperature: 60,
        power_draw: 120.0,
        power_limit: 250.0,
        graphics_clock: 1600,
        memory_clock: 5000,
        sm_clock: 1600,
        processes: vec![GpuProcess {
            pid: 42,
            name: "ollama".to_string(),
            vram_mb: 1024,
            kind: "compute".to_string(),
        }],
    }
}

/// Emits monotonically numbered snapshots.
struct SequenceProvider {
    counter: AtomicU64,
}

impl SequenceProvider {
    fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl GpuStatsProvider for SequenceProvider {
    fn sample(&self) -> Result<GpuSnapshot, ServiceError> {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(snapshot(seq))
    }

    fn name(&self) -> String {
        "sequence".to_string()
    }
}

/// Fails every sample.
struct BrokenProvider;

impl GpuStatsProvider for BrokenProvider {
    fn sample(&self) -> Result<GpuSnapshot, ServiceError> {
        Err(ServiceError::backend("no device"))
    }

    fn name(&self) -> String {
        "broken".to_string()
    }
}

/// Replays a fixed list of snapshots.
struct ReplayProvider {
    samples: Mutex<Vec<GpuSnapshot>>,
}

impl GpuStatsProvider for ReplayProvider {
    fn sample(&self) -> Result<GpuSnapshot, ServiceError> {
        let mut samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return Err(ServiceError::backend("exhausted"));
        }
        Ok(samples.remove(0))
    }

    fn name(&self) -> String {
        "replay".to_string()
    }
}

fn config(history_capacity: usize, frame_history: usize) -> GpuConfig {
    GpuConfig {
        history_capacity,
        frame_history,
        ..GpuConfig::default()
    }
}

#[test]
fn history_stays_bounded_and_chronological() {
    let monitor = GpuMonitor::new(SequenceProvider::new(), &config(5, 3));

    for _ in 0..12 {
        monitor.tick().unwrap();
    }

    let history = monitor.full_history();
    assert_eq!(history.len(), 5);
    for pair in history.windows(2) {
        assert!(pair[0].timestamp < pair[1].timestamp, "oldest first");
    }
}

#[test]
fn broadcast_frames_carry_the_history_tail() {
    let monitor = GpuMonitor::new(SequenceProvider::new(), &config(10, 3));
    let (_id, mut rx) = monitor.subscribe();

    for _ in 0..5 {
        monitor.tick().unwrap();
    }

    let mut last = None;
    while let Ok(frame) = rx.try_recv() {
        last = Some(frame);
    }
    let frame: Value = serde_json::from_str(&last.unwrap()).unwrap();

    assert_eq!(frame["type"], "gpu_stats");
    let data = &frame["data"];
    assert_eq!(data["history"].as_array().unwrap().len(), 3);
    // The scripted process is an LLM runtime.
    assert_eq!(data["models"]["llm"].as_array().unwrap().len(), 1);
    assert_eq!(
        data["recommendations"][0]["kind"].as_str().unwrap(),
        "normal"
    );
    // The just-sampled snapshot is both `current` and the history tail.
    assert_eq!(
        data["current"]["timestamp"],
        data["history"].as_array().unwrap().last().unwrap()["timestamp"]
    );
}

#[test]
fn threshold_crossings_appear_in_frames() {
    let mut hot = snapshot(0);
    hot.vram_percent = 95.0;
    hot.temperature = 90;
    let monitor = GpuMonitor::new(
        ReplayProvider {
            samples: Mutex::new(vec![hot]),
        },
        &config(10, 5),
    );
    let (_id, mut rx) = monitor.subscribe();

    monitor.tick().unwrap();
    let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    let recommendations = frame["data"]["recommendations"].as_array().unwrap();

    let kinds: Vec<&str> = recommendations
        .iter()
        .map(|r| r["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"memory_pressure"));
    assert!(kinds.contains(&"temperature"));
    let severities: Vec<&str> = recommendations
        .iter()
        .map(|r| r["severity"].as_str().unwrap())
        .collect();
    assert!(severities.iter().all(|s| *s == "critical"));
}

#[test]
fn dead_subscribers_are_dropped_after_the_broadcast_pass() {
    let monitor = GpuMonitor::new(SequenceProvider::new(), &config(10, 3));

    let (_alive_id, mut alive_rx) = monitor.subscribe();
    let (_dead_id, dead_rx) = monitor.subscribe();
    assert_eq!(monitor.subscriber_count(), 2);

    drop(dead_rx);
    monitor.tick().unwrap();

    // The failed send removed the dead subscriber; the live one still
    // received the frame.
    assert_eq!(monitor.subscriber_count(), 1);
    assert!(alive_rx.try_recv().is_ok());
}

#[test]
fn failed_samples_skip_history_and_broadcast() {
    let monitor = GpuMonitor::new(BrokenProvider, &config(10, 3));
    let (_id, mut rx) = monitor.subscribe();

    assert!(monitor.tick().is_err());
    assert!(monitor.full_history().is_empty());
    assert!(rx.try_recv().is_err());
    // The loop keeps the subscriber; only send failures drop it.
    assert_eq!(monitor.subscriber_count(), 1);
}

#[test]
fn snapshot_frame_does_not_touch_history() {
    let monitor = GpuMonitor::new(SequenceProvider::new(), &config(10, 3));

    let frame = monitor.snapshot_frame().unwrap();
    let value: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "gpu_stats");
    assert!(monitor.full_history().is_empty());
}

#[tokio::test]
async fn start_and_stop_toggle_the_running_flag() {
    let monitor = GpuMonitor::new(SequenceProvider::new(), &config(10, 3));
    assert!(!monitor.is_running());

    monitor.start();
    assert!(monitor.is_running());

    monitor.stop();
    assert!(!monitor.is_running());
}
