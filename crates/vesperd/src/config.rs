//! Configuration management for vesperd.
//!
//! Loads settings from /etc/vesper/config.toml or uses defaults. Every
//! service gets its own section so a host can run any subset of the
//! stack.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/vesper/config.toml";

/// Settings shared by every HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Services bind loopback only.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Concurrent backend calls allowed per service. Requests past the
    /// limit wait on the semaphore instead of spawning unboundedly.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_inference: usize,

    /// Hard ceiling for one backend call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_max_concurrent() -> usize {
    2
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_concurrent_inference: default_max_concurrent(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Text-to-speech service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_tts_port")]
    pub port: u16,

    /// External piper binary.
    #[serde(default = "default_piper_bin")]
    pub piper_bin: String,

    /// Voice model passed to piper via --model.
    #[serde(default = "default_voice_path")]
    pub voice_path: String,

    #[serde(default = "default_voice_name")]
    pub voice_name: String,

    #[serde(default = "default_voice_language")]
    pub voice_language: String,

    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    #[serde(default = "default_tts_cache_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "default_tts_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_tts_port() -> u16 {
    5000
}

fn default_piper_bin() -> String {
    "piper".to_string()
}

fn default_voice_path() -> String {
    "/var/lib/vesper/voices/vesper.onnx".to_string()
}

fn default_voice_name() -> String {
    "vesper".to_string()
}

fn default_voice_language() -> String {
    "en_GB".to_string()
}

fn default_max_text_chars() -> usize {
    10_000
}

fn default_tts_cache_entries() -> usize {
    50
}

fn default_tts_cache_ttl() -> u64 {
    300
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_tts_port(),
            piper_bin: default_piper_bin(),
            voice_path: default_voice_path(),
            voice_name: default_voice_name(),
            voice_language: default_voice_language(),
            max_text_chars: default_max_text_chars(),
            cache_max_entries: default_tts_cache_entries(),
            cache_ttl_secs: default_tts_cache_ttl(),
        }
    }
}

/// Speech-to-text service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_stt_port")]
    pub port: u16,

    /// whisper.cpp-style CLI binary.
    #[serde(default = "default_whisper_bin")]
    pub whisper_bin: String,

    #[serde(default = "default_whisper_model")]
    pub model_path: String,

    #[serde(default = "default_language")]
    pub default_language: String,

    /// Upload cap enforced before the handler runs.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_stt_port() -> u16 {
    5001
}

fn default_whisper_bin() -> String {
    "whisper-cli".to_string()
}

fn default_whisper_model() -> String {
    "/var/lib/vesper/models/ggml-small.bin".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_stt_port(),
            whisper_bin: default_whisper_bin(),
            model_path: default_whisper_model(),
            default_language: default_language(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Text embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_embedding_port")]
    pub port: u16,

    /// Local Ollama instance serving the embedding model.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_cache_entries")]
    pub cache_max_entries: usize,

    /// Batch size cap; larger batches are rejected.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Per-text cap; batch members past this are truncated, single
    /// strings are rejected.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

fn default_embedding_port() -> u16 {
    5002
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_cache_entries() -> usize {
    10_000
}

fn default_max_batch() -> usize {
    1000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_embedding_port(),
            ollama_url: default_ollama_url(),
            model: default_embedding_model(),
            cache_max_entries: default_embedding_cache_entries(),
            max_batch: default_max_batch(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

/// Vision service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_vision_port")]
    pub port: u16,

    /// External CLIP encoder binary (JSON over stdin/stdout).
    #[serde(default = "default_clip_bin")]
    pub clip_bin: String,

    /// Longest image edge fed to the encoder; larger inputs are
    /// downscaled first.
    #[serde(default = "default_max_image_dim")]
    pub max_image_dim: u32,

    #[serde(default = "default_vision_cache_entries")]
    pub cache_max_entries: usize,
}

fn default_vision_port() -> u16 {
    5004
}

fn default_clip_bin() -> String {
    "clip-encoder".to_string()
}

fn default_max_image_dim() -> u32 {
    1024
}

fn default_vision_cache_entries() -> usize {
    1000
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_vision_port(),
            clip_bin: default_clip_bin(),
            max_image_dim: default_max_image_dim(),
            cache_max_entries: default_vision_cache_entries(),
        }
    }
}

/// GPU monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_gpu_port")]
    pub port: u16,

    /// "auto", "nvidia-smi" or "mock".
    #[serde(default = "default_gpu_provider")]
    pub provider: String,

    #[serde(default = "default_gpu_interval")]
    pub interval_secs: u64,

    /// 300 samples = 5 minutes at 1 Hz.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// How much history rides along in each broadcast frame.
    #[serde(default = "default_frame_history")]
    pub frame_history: usize,

    /// Inbound silence before a keep-alive ping.
    #[serde(default = "default_idle_ping")]
    pub idle_ping_secs: u64,
}

fn default_gpu_port() -> u16 {
    5003
}

fn default_gpu_provider() -> String {
    "auto".to_string()
}

fn default_gpu_interval() -> u64 {
    1
}

fn default_history_capacity() -> usize {
    300
}

fn default_frame_history() -> usize {
    60
}

fn default_idle_ping() -> u64 {
    30
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_gpu_port(),
            provider: default_gpu_provider(),
            interval_secs: default_gpu_interval(),
            history_capacity: default_history_capacity(),
            frame_history: default_frame_history(),
            idle_ping_secs: default_idle_ping(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub gpu: GpuConfig,
}

impl Config {
    /// Load from the given path, falling back to defaults when the file
    /// is missing or malformed.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.unwrap_or_else(|| Path::new(CONFIG_PATH));

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Invalid config at {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_services() {
        let config = Config::default();
        assert_eq!(config.tts.port, 5000);
        assert_eq!(config.stt.port, 5001);
        assert_eq!(config.embedding.port, 5002);
        assert_eq!(config.gpu.port, 5003);
        assert_eq!(config.vision.port, 5004);
        assert_eq!(config.server.bind_addr, "127.0.0.1");
        assert_eq!(config.gpu.history_capacity, 300);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            model = "all-minilm"
            cache_max_entries = 128

            [gpu]
            provider = "mock"
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding.model, "all-minilm");
        assert_eq!(config.embedding.cache_max_entries, 128);
        assert_eq!(config.embedding.max_batch, 1000);
        assert_eq!(config.gpu.provider, "mock");
        assert_eq!(config.gpu.interval_secs, 1);
        assert!(config.tts.enabled);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/vesper.toml")));
        assert_eq!(config.tts.cache_max_entries, 50);
        assert_eq!(config.tts.cache_ttl_secs, 300);
    }
}
