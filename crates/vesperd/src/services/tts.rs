//! Text-to-speech service: thin wrapper around the synthesizer with a
//! short-lived audio cache for repeated phrases.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Semaphore;
use tracing::info;

use vesper_common::api::{SynthesizeRequest, TtsHealth, VoiceInfo};
use vesper_common::{fingerprint, SharedCache};

use crate::backends::{SynthOptions, Synthesizer};
use crate::config::{ServerConfig, TtsConfig};
use crate::error::ApiError;
use crate::metrics::ServiceMetrics;

pub struct TtsState<S> {
    pub synth: Arc<S>,
    pub cache: SharedCache<Vec<u8>>,
    pub config: TtsConfig,
    pub metrics: Arc<ServiceMetrics>,
    pub limiter: Arc<Semaphore>,
    pub timeout: Duration,
    pub ready: bool,
}

impl<S> Clone for TtsState<S> {
    fn clone(&self) -> Self {
        Self {
            synth: Arc::clone(&self.synth),
            cache: self.cache.clone(),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
            limiter: Arc::clone(&self.limiter),
            timeout: self.timeout,
            ready: self.ready,
        }
    }
}

impl<S: Synthesizer> TtsState<S> {
    pub fn new(synth: S, config: TtsConfig, server: &ServerConfig, ready: bool) -> Self {
        let cache = SharedCache::new(
            config.cache_max_entries,
            Some(Duration::from_secs(config.cache_ttl_secs)),
        );
        Self {
            synth: Arc::new(synth),
            cache,
            config,
            metrics: Arc::new(ServiceMetrics::new("tts")),
            limiter: Arc::new(Semaphore::new(server.max_concurrent_inference)),
            timeout: Duration::from_secs(server.request_timeout_secs),
            ready,
        }
    }
}

pub fn router<S: Synthesizer>(state: TtsState<S>) -> Router {
    Router::new()
        .route("/health", get(health::<S>))
        .route("/voices", get(voices::<S>))
        .route("/tts", post(synthesize::<S>))
        .route("/synthesize", post(synthesize::<S>))
        .route("/metrics", get(metrics_text::<S>))
        .with_state(state)
}

async fn health<S: Synthesizer>(State(state): State<TtsState<S>>) -> Response {
    if state.ready {
        Json(TtsHealth {
            status: "ok".to_string(),
            service: "vesper-tts".to_string(),
        })
        .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(TtsHealth {
                status: "unhealthy".to_string(),
                service: "vesper-tts".to_string(),
            }),
        )
            .into_response()
    }
}

async fn voices<S: Synthesizer>(State(state): State<TtsState<S>>) -> Json<Vec<VoiceInfo>> {
    Json(vec![VoiceInfo {
        name: state.config.voice_name.clone(),
        language: state.config.voice_language.clone(),
        quality: "high".to_string(),
        description: format!("{} voice model", state.config.voice_name),
    }])
}

async fn synthesize<S: Synthesizer>(
    State(state): State<TtsState<S>>,
    Json(req): Json<SynthesizeRequest>,
) -> Result<Response, ApiError> {
    state.metrics.observe("/tts");

    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("Missing 'text' field"));
    }
    if req.text.chars().count() > state.config.max_text_chars {
        return Err(ApiError::bad_request(format!(
            "Text too long (max {} chars)",
            state.config.max_text_chars
        )));
    }
    if !state.ready {
        return Err(ApiError::unavailable("synthesizer not available"));
    }

    let opts = SynthOptions {
        speaker: req.resolved_speaker(),
        length_scale: req.length_scale,
        noise_scale: req.noise_scale,
        noise_w: req.noise_w,
    };
    let key = fingerprint::of_parts(&[
        &req.text,
        &opts.speaker.to_string(),
        &opts.length_scale.to_string(),
        &opts.noise_scale.to_string(),
        &opts.noise_w.to_string(),
    ]);

    if let Some(audio) = state.cache.get(&key) {
        state.metrics.cache_hits_total.inc();
        return Ok(wav_response(audio));
    }
    state.metrics.cache_misses_total.inc();

    let _permit = state
        .limiter
        .acquire()
        .await
        .map_err(|_| ApiError::internal("service shutting down"))?;

    let audio = tokio::time::timeout(state.timeout, state.synth.synthesize(&req.text, &opts))
        .await
        .map_err(|_| {
            state.metrics.backend_failures_total.inc();
            ApiError::internal("synthesis timed out")
        })?
        .map_err(|e| {
            state.metrics.backend_failures_total.inc();
            ApiError::from(e)
        })?;

    info!("Synthesized {} chars -> {} bytes", req.text.len(), audio.len());
    state.cache.put(&key, audio.clone());
    Ok(wav_response(audio))
}

fn wav_response(audio: Vec<u8>) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "audio/wav")
        .body(Body::from(audio))
        .unwrap()
}

async fn metrics_text<S: Synthesizer>(State(state): State<TtsState<S>>) -> String {
    state.metrics.render()
}
