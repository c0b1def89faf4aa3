//! Wire-level request/response types shared by the daemon and the CLI.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

// ============================================================================
// TTS
// ============================================================================

fn default_length_scale() -> f64 {
    0.75
}

fn default_noise_scale() -> f64 {
    0.667
}

fn default_noise_w() -> f64 {
    0.8
}

/// Synthesis request. `speaker_id` is the canonical field; `speaker` is
/// kept for older clients and loses when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
    #[serde(default = "default_length_scale")]
    pub length_scale: f64,
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f64,
    #[serde(default = "default_noise_w")]
    pub noise_w: f64,
}

impl SynthesizeRequest {
    /// Resolve the speaker with documented precedence:
    /// `speaker_id` > `speaker` > 0.
    pub fn resolved_speaker(&self) -> u32 {
        self.speaker_id.or(self.speaker).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
    pub quality: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsHealth {
    pub status: String,
    pub service: String,
}

// ============================================================================
// Embeddings
// ============================================================================

/// `texts` accepts either one string or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextsInput {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub texts: TextsInput,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub dimension: usize,
    pub count: usize,
    pub time_ms: f64,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedSingleRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedSingleResponse {
    pub embedding: Vec<f32>,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityRequest {
    pub text1: String,
    pub text2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResponse {
    pub similarity: f64,
    pub time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingHealth {
    pub status: String,
    pub model: String,
    pub cache_size: usize,
    pub backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearResponse {
    pub message: String,
    pub previous_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub cache_entries: usize,
    pub cache_size_limit: usize,
    pub model: String,
}

// ============================================================================
// Vision
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEmbedRequest {
    pub image: String,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEmbedResponse {
    pub embedding: Vec<f32>,
    pub cached: bool,
    pub time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextEmbedRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextEmbedResponse {
    pub embedding: Vec<f32>,
    pub time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub embedding: Vec<f32>,
    pub description: String,
    pub tags: Vec<String>,
    pub time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
    pub time_ms: f64,
}

/// Accepts image1+text or image1+image2; anything else is rejected by the
/// handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionSimilarityRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionSimilarityResponse {
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionHealth {
    pub status: String,
    pub backend: String,
    pub cache_size: usize,
    pub avg_request_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    pub message: String,
}

// ============================================================================
// STT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub text: String,
    pub language: String,
    pub device: String,
    pub processing_time: f64,
    #[serde(rename = "isFinal")]
    pub is_final: bool,
    #[serde(rename = "isPartial", skip_serializing_if = "Option::is_none")]
    pub is_partial: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttHealth {
    pub status: String,
    pub model: String,
    pub backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaker_id_wins_over_speaker_alias() {
        let req: SynthesizeRequest =
            serde_json::from_str(r#"{"text":"hi","speaker_id":2,"speaker":7}"#).unwrap();
        assert_eq!(req.resolved_speaker(), 2);

        let req: SynthesizeRequest =
            serde_json::from_str(r#"{"text":"hi","speaker":7}"#).unwrap();
        assert_eq!(req.resolved_speaker(), 7);

        let req: SynthesizeRequest = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(req.resolved_speaker(), 0);
    }

    #[test]
    fn synthesis_defaults_match_the_service() {
        let req: SynthesizeRequest = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(req.length_scale, 0.75);
        assert_eq!(req.noise_scale, 0.667);
        assert_eq!(req.noise_w, 0.8);
    }

    #[test]
    fn texts_input_accepts_string_or_array() {
        let req: EmbedRequest = serde_json::from_str(r#"{"texts":"one"}"#).unwrap();
        assert!(matches!(req.texts, TextsInput::Single(_)));
        assert!(req.use_cache);

        let req: EmbedRequest =
            serde_json::from_str(r#"{"texts":["a","b"],"use_cache":false}"#).unwrap();
        assert!(matches!(req.texts, TextsInput::Batch(ref v) if v.len() == 2));
        assert!(!req.use_cache);
    }

    #[test]
    fn transcribe_response_uses_camel_case_flags() {
        let resp = TranscribeResponse {
            text: "done.".to_string(),
            language: "en".to_string(),
            device: "cli".to_string(),
            processing_time: 0.5,
            is_final: true,
            is_partial: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""isFinal":true"#));
        assert!(!json.contains("isPartial"));
    }
}
