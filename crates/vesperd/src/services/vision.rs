//! Vision service: CLIP-style image/text embeddings, captioning, and
//! zero-shot tagging.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::imageops::FilterType;
use tokio::sync::Semaphore;
use tracing::warn;

use vesper_common::api::{
    AnalyzeRequest, AnalyzeResponse, CaptionResponse, ImageEmbedRequest, ImageEmbedResponse,
    StatusMessage, TextEmbedRequest, TextEmbedResponse, VisionHealth, VisionSimilarityRequest,
    VisionSimilarityResponse,
};
use vesper_common::{fingerprint, vector, RollingHistory, ServiceError, SharedCache};

use crate::backends::VisionEncoder;
use crate::config::{ServerConfig, VisionConfig};
use crate::error::ApiError;
use crate::metrics::ServiceMetrics;
use crate::services::elapsed_ms;

/// Zero-shot tag vocabulary scored against every analyzed image.
const TAG_CANDIDATES: &[&str] = &[
    "photo", "screenshot", "document", "chart", "diagram",
    "person", "people", "face", "selfie", "group",
    "indoor", "outdoor", "nature", "city", "building",
    "animal", "pet", "dog", "cat", "bird",
    "food", "meal", "drink", "restaurant",
    "vehicle", "car", "transportation",
    "technology", "computer", "phone", "screen",
    "art", "drawing", "painting", "sketch",
    "text", "handwriting", "code", "interface",
    "day", "night", "sunset", "landscape",
];

const TAG_THRESHOLD: f32 = 0.25;
const TAG_LIMIT: usize = 5;

pub struct VisionState<V> {
    pub encoder: Arc<V>,
    pub cache: SharedCache<Vec<f32>>,
    /// Embeddings of the tag vocabulary, filled lazily.
    tag_cache: SharedCache<Vec<f32>>,
    request_times: Arc<Mutex<RollingHistory<f64>>>,
    pub config: VisionConfig,
    pub metrics: Arc<ServiceMetrics>,
    pub limiter: Arc<Semaphore>,
    pub timeout: Duration,
    pub ready: bool,
}

impl<V> Clone for VisionState<V> {
    fn clone(&self) -> Self {
        Self {
            encoder: Arc::clone(&self.encoder),
            cache: self.cache.clone(),
            tag_cache: self.tag_cache.clone(),
            request_times: Arc::clone(&self.request_times),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
            limiter: Arc::clone(&self.limiter),
            timeout: self.timeout,
            ready: self.ready,
        }
    }
}

impl<V: VisionEncoder> VisionState<V> {
    pub fn new(encoder: V, config: VisionConfig, server: &ServerConfig, ready: bool) -> Self {
        Self {
            encoder: Arc::new(encoder),
            cache: SharedCache::new(config.cache_max_entries, None),
            tag_cache: SharedCache::new(TAG_CANDIDATES.len().max(1), None),
            request_times: Arc::new(Mutex::new(RollingHistory::new(100))),
            config,
            metrics: Arc::new(ServiceMetrics::new("vision")),
            limiter: Arc::new(Semaphore::new(server.max_concurrent_inference)),
            timeout: Duration::from_secs(server.request_timeout_secs),
            ready,
        }
    }

    fn record_request_time(&self, start: Instant) {
        self.request_times
            .lock()
            .unwrap()
            .push(start.elapsed().as_secs_f64() * 1000.0);
    }

    fn avg_request_time_ms(&self) -> f64 {
        let times = self.request_times.lock().unwrap();
        if times.is_empty() {
            return 0.0;
        }
        let all = times.to_vec();
        all.iter().sum::<f64>() / all.len() as f64
    }
}

pub fn router<V: VisionEncoder>(state: VisionState<V>) -> Router {
    Router::new()
        .route("/health", get(health::<V>))
        .route("/embed/image", post(embed_image::<V>))
        .route("/embed/text", post(embed_text::<V>))
        .route("/analyze", post(analyze::<V>))
        .route("/caption", post(caption::<V>))
        .route("/similarity", post(similarity::<V>))
        .route("/cache/clear", post(cache_clear::<V>))
        .route("/metrics", get(metrics_text::<V>))
        .with_state(state)
}

/// Base64 payload -> PNG bytes no larger than `max_dim` on the longest
/// edge. Data-URL prefixes are tolerated.
fn decode_image(payload: &str, max_dim: u32) -> Result<Vec<u8>, ServiceError> {
    let raw = payload
        .split_once(',')
        .map(|(_, rest)| rest)
        .unwrap_or(payload);

    let bytes = STANDARD
        .decode(raw.trim())
        .map_err(|_| ServiceError::invalid("Invalid base64 image data"))?;

    let img = image::load_from_memory(&bytes)
        .map_err(|_| ServiceError::invalid("Could not decode image"))?;

    let img = if img.width().max(img.height()) > max_dim {
        img.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        img
    };

    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Png)
        .map_err(|e| ServiceError::backend(format!("re-encoding image: {}", e)))?;
    Ok(out)
}

/// Run one encoder call under the concurrency limit and timeout.
macro_rules! backend_call {
    ($state:expr, $fut:expr) => {{
        let _permit = $state
            .limiter
            .acquire()
            .await
            .map_err(|_| ServiceError::backend("service shutting down"))?;
        tokio::time::timeout($state.timeout, $fut)
            .await
            .map_err(|_| {
                $state.metrics.backend_failures_total.inc();
                ServiceError::backend("encoder timed out")
            })?
            .map_err(|e| {
                $state.metrics.backend_failures_total.inc();
                e
            })
    }};
}

async fn embedded_image<V: VisionEncoder>(
    state: &VisionState<V>,
    payload: &str,
) -> Result<Vec<f32>, ServiceError> {
    let png = decode_image(payload, state.config.max_image_dim)?;
    let mut embedding = backend_call!(state, state.encoder.embed_image(&png))?;
    vector::l2_normalize(&mut embedding);
    Ok(embedding)
}

async fn embedded_text<V: VisionEncoder>(
    state: &VisionState<V>,
    text: &str,
) -> Result<Vec<f32>, ServiceError> {
    let mut embedding = backend_call!(state, state.encoder.embed_text(text))?;
    vector::l2_normalize(&mut embedding);
    Ok(embedding)
}

async fn embed_image<V: VisionEncoder>(
    State(state): State<VisionState<V>>,
    Json(req): Json<ImageEmbedRequest>,
) -> Result<Json<ImageEmbedResponse>, ApiError> {
    state.metrics.observe("/embed/image");
    let start = Instant::now();

    if req.image.is_empty() {
        return Err(ApiError::bad_request("No image provided"));
    }
    if !state.ready {
        return Err(ApiError::unavailable("vision encoder not available"));
    }

    let key = fingerprint::digest(&req.image);
    if req.use_cache {
        if let Some(embedding) = state.cache.get(&key) {
            state.metrics.cache_hits_total.inc();
            state.record_request_time(start);
            return Ok(Json(ImageEmbedResponse {
                embedding,
                cached: true,
                time_ms: elapsed_ms(start),
            }));
        }
        state.metrics.cache_misses_total.inc();
    }

    let embedding = embedded_image(&state, &req.image).await?;
    if req.use_cache {
        state.cache.put(&key, embedding.clone());
    }

    state.record_request_time(start);
    Ok(Json(ImageEmbedResponse {
        embedding,
        cached: false,
        time_ms: elapsed_ms(start),
    }))
}

async fn embed_text<V: VisionEncoder>(
    State(state): State<VisionState<V>>,
    Json(req): Json<TextEmbedRequest>,
) -> Result<Json<TextEmbedResponse>, ApiError> {
    state.metrics.observe("/embed/text");
    let start = Instant::now();

    if req.text.is_empty() {
        return Err(ApiError::bad_request("No text provided"));
    }
    if !state.ready {
        return Err(ApiError::unavailable("vision encoder not available"));
    }

    let embedding = embedded_text(&state, &req.text).await?;
    state.record_request_time(start);
    Ok(Json(TextEmbedResponse {
        embedding,
        time_ms: elapsed_ms(start),
    }))
}

async fn analyze<V: VisionEncoder>(
    State(state): State<VisionState<V>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    state.metrics.observe("/analyze");
    let start = Instant::now();

    if req.image.is_empty() {
        return Err(ApiError::bad_request("No image provided"));
    }
    if !state.ready {
        return Err(ApiError::unavailable("vision encoder not available"));
    }

    let png = decode_image(&req.image, state.config.max_image_dim)?;
    let mut embedding = backend_call!(state, state.encoder.embed_image(&png))?;
    vector::l2_normalize(&mut embedding);

    let description = backend_call!(state, state.encoder.caption(&png)).unwrap_or_default();

    let tags = match detect_tags(&state, &embedding).await {
        Ok(tags) => tags,
        Err(e) => {
            warn!("Tag detection failed: {}", e);
            Vec::new()
        }
    };

    state.record_request_time(start);
    Ok(Json(AnalyzeResponse {
        embedding,
        description,
        tags,
        time_ms: elapsed_ms(start),
    }))
}

async fn caption<V: VisionEncoder>(
    State(state): State<VisionState<V>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<CaptionResponse>, ApiError> {
    state.metrics.observe("/caption");
    let start = Instant::now();

    if req.image.is_empty() {
        return Err(ApiError::bad_request("No image provided"));
    }
    if !state.ready {
        return Err(ApiError::unavailable("vision encoder not available"));
    }

    let png = decode_image(&req.image, state.config.max_image_dim)?;
    let caption = backend_call!(state, state.encoder.caption(&png))?;

    state.record_request_time(start);
    Ok(Json(CaptionResponse {
        caption,
        time_ms: elapsed_ms(start),
    }))
}

async fn similarity<V: VisionEncoder>(
    State(state): State<VisionState<V>>,
    Json(req): Json<VisionSimilarityRequest>,
) -> Result<Json<VisionSimilarityResponse>, ApiError> {
    state.metrics.observe("/similarity");

    if !state.ready {
        return Err(ApiError::unavailable("vision encoder not available"));
    }

    // Image-text wins when a request carries all three fields.
    let similarity = if let (Some(image), Some(text)) = (&req.image1, &req.text) {
        let image_emb = embedded_image(&state, image).await?;
        let text_emb = embedded_text(&state, text).await?;
        vector::dot(&image_emb, &text_emb)
    } else if let (Some(first), Some(second)) = (&req.image1, &req.image2) {
        let first_emb = embedded_image(&state, first).await?;
        let second_emb = embedded_image(&state, second).await?;
        vector::dot(&first_emb, &second_emb)
    } else {
        return Err(ApiError::bad_request("Provide image1+text or image1+image2"));
    };

    Ok(Json(VisionSimilarityResponse {
        similarity: vector::round4(similarity),
    }))
}

/// Score the tag vocabulary against an image embedding. Tag embeddings
/// are computed once and kept.
async fn detect_tags<V: VisionEncoder>(
    state: &VisionState<V>,
    image_embedding: &[f32],
) -> Result<Vec<String>, ServiceError> {
    let mut scored: Vec<(&str, f32)> = Vec::new();

    for tag in TAG_CANDIDATES {
        let key = fingerprint::digest(tag);
        let tag_embedding = match state.tag_cache.get(&key) {
            Some(embedding) => embedding,
            None => {
                let prompt = format!("a photo of {}", tag);
                let mut embedding = backend_call!(state, state.encoder.embed_text(&prompt))?;
                vector::l2_normalize(&mut embedding);
                state.tag_cache.put(&key, embedding.clone());
                embedding
            }
        };

        let score = vector::dot(&tag_embedding, image_embedding);
        if score > TAG_THRESHOLD {
            scored.push((tag, score));
        }
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored
        .into_iter()
        .take(TAG_LIMIT)
        .map(|(tag, _)| tag.to_string())
        .collect())
}

async fn cache_clear<V: VisionEncoder>(State(state): State<VisionState<V>>) -> Json<StatusMessage> {
    state.cache.clear();
    Json(StatusMessage {
        status: "ok".to_string(),
        message: "Cache cleared".to_string(),
    })
}

async fn health<V: VisionEncoder>(State(state): State<VisionState<V>>) -> Response {
    let body = VisionHealth {
        status: if state.ready { "ok" } else { "unhealthy" }.to_string(),
        backend: state.encoder.name(),
        cache_size: state.cache.len(),
        avg_request_time_ms: state.avg_request_time_ms(),
    };
    if state.ready {
        Json(body).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

async fn metrics_text<V: VisionEncoder>(State(state): State<VisionState<V>>) -> String {
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_prefix_is_stripped() {
        // A 1x1 PNG.
        let png = image_bytes();
        let b64 = STANDARD.encode(&png);
        let with_prefix = format!("data:image/png;base64,{}", b64);

        assert!(decode_image(&b64, 1024).is_ok());
        assert!(decode_image(&with_prefix, 1024).is_ok());
    }

    #[test]
    fn invalid_base64_is_a_client_error() {
        let err = decode_image("!!!not-base64!!!", 1024).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn undecodable_image_is_a_client_error() {
        let b64 = STANDARD.encode(b"plainly not an image");
        let err = decode_image(&b64, 1024).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn oversized_images_are_downscaled() {
        let img = image::DynamicImage::new_rgb8(64, 32);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
            .unwrap();
        let b64 = STANDARD.encode(&buf);

        let out = decode_image(&b64, 16).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert!(decoded.width() <= 16 && decoded.height() <= 16);
        // Aspect ratio preserved.
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 8);
    }

    fn image_bytes() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(1, 1);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
            .unwrap();
        buf
    }
}
