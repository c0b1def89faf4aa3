//! GPU telemetry domain types and heuristics.
//!
//! The snapshot mirrors what an NVML-style provider reports once per tick.
//! Classification and recommendation derivation are pure functions so the
//! monitor loop stays a thin scheduler around them.

use serde::{Deserialize, Serialize};

/// One process currently holding GPU memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuProcess {
    pub pid: u32,
    pub name: String,
    pub vram_mb: u64,
    /// "compute" or "graphics".
    #[serde(rename = "type")]
    pub kind: String,
}

/// Immutable telemetry sample. Created once per tick, appended to the
/// rolling history, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSnapshot {
    /// Unix timestamp, fractional seconds.
    pub timestamp: f64,
    pub name: String,
    pub gpu_id: u32,
    /// VRAM figures in MB.
    pub vram_total: u64,
    pub vram_used: u64,
    pub vram_free: u64,
    pub vram_percent: f64,
    /// Utilization in percent.
    pub gpu_utilization: u32,
    pub memory_utilization: u32,
    /// Degrees Celsius.
    pub temperature: u32,
    /// Watts.
    pub power_draw: f64,
    pub power_limit: f64,
    /// MHz.
    pub graphics_clock: u32,
    pub memory_clock: u32,
    pub sm_clock: u32,
    pub processes: Vec<GpuProcess>,
}

/// Current Unix time as fractional seconds, the timestamp format carried
/// in snapshots and broadcast frames.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// GPU processes grouped by the kind of model they are running.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelBuckets {
    pub llm: Vec<GpuProcess>,
    pub whisper: Vec<GpuProcess>,
    pub embedding: Vec<GpuProcess>,
    pub other: Vec<GpuProcess>,
}

/// Ordered category -> keyword table. The first category with a matching
/// keyword wins; anything unmatched lands in "other".
const MODEL_PATTERNS: &[(Bucket, &[&str])] = &[
    (Bucket::Llm, &["ollama", "llama", "mistral", "codellama"]),
    (Bucket::Whisper, &["whisper", "stt"]),
    (Bucket::Embedding, &["embedding", "sentence"]),
    (Bucket::Other, &["python.exe", "python3"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Llm,
    Whisper,
    Embedding,
    Other,
}

/// Sort attached processes into model buckets by substring match.
pub fn classify_processes(processes: &[GpuProcess]) -> ModelBuckets {
    let mut buckets = ModelBuckets::default();
    for proc in processes {
        let name = proc.name.to_lowercase();
        let bucket = MODEL_PATTERNS
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| name.contains(p)))
            .map(|(bucket, _)| *bucket)
            .unwrap_or(Bucket::Other);
        match bucket {
            Bucket::Llm => buckets.llm.push(proc.clone()),
            Bucket::Whisper => buckets.whisper.push(proc.clone()),
            Bucket::Embedding => buckets.embedding.push(proc.clone()),
            Bucket::Other => buckets.other.push(proc.clone()),
        }
    }
    buckets
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Advisory,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    MemoryPressure,
    Temperature,
    PowerLimit,
    IdleVram,
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub kind: RecommendationKind,
    pub message: String,
}

impl Recommendation {
    fn new(severity: Severity, kind: RecommendationKind, message: &str) -> Self {
        Self {
            severity,
            kind,
            message: message.to_string(),
        }
    }
}

/// Independent threshold checks over one snapshot. Every applicable
/// warning is returned; when nothing fires the result is exactly one
/// "operating normally" entry.
pub fn derive_recommendations(stats: &GpuSnapshot) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if stats.vram_percent > 90.0 {
        out.push(Recommendation::new(
            Severity::Critical,
            RecommendationKind::MemoryPressure,
            "VRAM critically high; unload unused models",
        ));
    } else if stats.vram_percent > 75.0 {
        out.push(Recommendation::new(
            Severity::Advisory,
            RecommendationKind::MemoryPressure,
            "VRAM usage is high; consider unloading unused models",
        ));
    }

    if stats.temperature > 85 {
        out.push(Recommendation::new(
            Severity::Critical,
            RecommendationKind::Temperature,
            "GPU temperature is very high; check cooling",
        ));
    } else if stats.temperature > 80 {
        out.push(Recommendation::new(
            Severity::Advisory,
            RecommendationKind::Temperature,
            "GPU temperature is elevated; ensure good airflow",
        ));
    }

    if stats.power_draw > stats.power_limit * 0.9 {
        out.push(Recommendation::new(
            Severity::Advisory,
            RecommendationKind::PowerLimit,
            "Power draw near limit; performance may be throttled",
        ));
    }

    if stats.gpu_utilization < 10 && stats.vram_used > 4000 {
        out.push(Recommendation::new(
            Severity::Advisory,
            RecommendationKind::IdleVram,
            "GPU idle but VRAM in use; consider unloading unused models",
        ));
    }

    if out.is_empty() {
        out.push(Recommendation::new(
            Severity::Normal,
            RecommendationKind::Normal,
            "GPU operating normally",
        ));
    }
    out
}

/// Payload of one periodic broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuFrameData {
    pub current: GpuSnapshot,
    pub models: ModelBuckets,
    pub recommendations: Vec<Recommendation>,
    /// Tail of the rolling history, oldest first.
    pub history: Vec<GpuSnapshot>,
}

/// Server-to-client WebSocket frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsFrame {
    #[serde(rename = "gpu_stats")]
    GpuStats { data: GpuFrameData },
    #[serde(rename = "history")]
    History { data: Vec<GpuSnapshot> },
    #[serde(rename = "ping")]
    Ping,
}

/// Client-to-server command message.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCommand {
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(name: &str) -> GpuProcess {
        GpuProcess {
            pid: 1000,
            name: name.to_string(),
            vram_mb: 512,
            kind: "compute".to_string(),
        }
    }

    fn snapshot() -> GpuSnapshot {
        GpuSnapshot {
            timestamp: epoch_seconds(),
            name: "Test GPU".to_string(),
            gpu_id: 0,
            vram_total: 11264,
            vram_used: 2048,
            vram_free: 9216,
            vram_percent: 18.2,
            gpu_utilization: 55,
            memory_utilization: 30,
            temperature: 60,
            power_draw: 120.0,
            power_limit: 250.0,
            graphics_clock: 1600,
            memory_clock: 5000,
            sm_clock: 1600,
            processes: vec![],
        }
    }

    #[test]
    fn classification_first_match_wins() {
        let buckets = classify_processes(&[
            proc("ollama.exe"),
            // "whisper" is checked before "embedding", so a name carrying
            // both keywords goes to the whisper bucket.
            proc("whisper-embedding-worker"),
            proc("sentence-worker"),
            proc("python3"),
            proc("blender"),
        ]);
        assert_eq!(buckets.llm.len(), 1);
        assert_eq!(buckets.whisper.len(), 1);
        assert_eq!(buckets.embedding.len(), 1);
        assert_eq!(buckets.other.len(), 2);
    }

    #[test]
    fn classification_is_case_insensitive() {
        let buckets = classify_processes(&[proc("Ollama-Server")]);
        assert_eq!(buckets.llm.len(), 1);
    }

    #[test]
    fn high_memory_yields_critical_warning() {
        let mut s = snapshot();
        s.vram_percent = 95.0;
        let recs = derive_recommendations(&s);
        assert!(recs
            .iter()
            .any(|r| r.kind == RecommendationKind::MemoryPressure
                && r.severity == Severity::Critical));
    }

    #[test]
    fn elevated_memory_yields_advisory_only() {
        let mut s = snapshot();
        s.vram_percent = 80.0;
        let recs = derive_recommendations(&s);
        let mem: Vec<_> = recs
            .iter()
            .filter(|r| r.kind == RecommendationKind::MemoryPressure)
            .collect();
        assert_eq!(mem.len(), 1);
        assert_eq!(mem[0].severity, Severity::Advisory);
    }

    #[test]
    fn high_temperature_yields_critical_warning() {
        let mut s = snapshot();
        s.temperature = 90;
        let recs = derive_recommendations(&s);
        assert!(recs
            .iter()
            .any(|r| r.kind == RecommendationKind::Temperature
                && r.severity == Severity::Critical));
    }

    #[test]
    fn warnings_accumulate_across_categories() {
        let mut s = snapshot();
        s.vram_percent = 95.0;
        s.temperature = 90;
        let recs = derive_recommendations(&s);
        assert!(recs.iter().any(|r| r.kind == RecommendationKind::MemoryPressure));
        assert!(recs.iter().any(|r| r.kind == RecommendationKind::Temperature));
        assert_eq!(recs.len(), 2);
    }

    #[test]
    fn power_and_idle_checks_fire() {
        let mut s = snapshot();
        s.power_draw = 230.0; // > 0.9 * 250
        s.gpu_utilization = 5;
        s.vram_used = 6000;
        let recs = derive_recommendations(&s);
        assert!(recs.iter().any(|r| r.kind == RecommendationKind::PowerLimit));
        assert!(recs.iter().any(|r| r.kind == RecommendationKind::IdleVram));
    }

    #[test]
    fn quiet_gpu_reports_exactly_one_normal_status() {
        let recs = derive_recommendations(&snapshot());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, RecommendationKind::Normal);
        assert_eq!(recs[0].severity, Severity::Normal);
    }

    #[test]
    fn ws_frames_serialize_with_type_tag() {
        let json = serde_json::to_string(&WsFrame::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }
}
