//! Speech-to-text service: multipart upload in, transcript out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Semaphore;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use vesper_common::api::{SttHealth, TranscribeResponse};

use crate::backends::Transcriber;
use crate::config::{ServerConfig, SttConfig};
use crate::error::ApiError;
use crate::metrics::ServiceMetrics;

/// Upload extensions the transcriber understands.
const ALLOWED_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "webm", "m4a", "ogg"];

pub struct SttState<T> {
    pub transcriber: Arc<T>,
    pub config: SttConfig,
    pub metrics: Arc<ServiceMetrics>,
    pub limiter: Arc<Semaphore>,
    pub timeout: Duration,
    pub ready: bool,
}

impl<T> Clone for SttState<T> {
    fn clone(&self) -> Self {
        Self {
            transcriber: Arc::clone(&self.transcriber),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
            limiter: Arc::clone(&self.limiter),
            timeout: self.timeout,
            ready: self.ready,
        }
    }
}

impl<T: Transcriber> SttState<T> {
    pub fn new(transcriber: T, config: SttConfig, server: &ServerConfig, ready: bool) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            config,
            metrics: Arc::new(ServiceMetrics::new("stt")),
            limiter: Arc::new(Semaphore::new(server.max_concurrent_inference)),
            timeout: Duration::from_secs(server.request_timeout_secs),
            ready,
        }
    }
}

pub fn router<T: Transcriber>(state: SttState<T>) -> Router {
    let upload_cap = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(health::<T>))
        .route("/transcribe", post(transcribe::<T>))
        .route("/metrics", get(metrics_text::<T>))
        .layer(DefaultBodyLimit::max(upload_cap))
        .layer(RequestBodyLimitLayer::new(upload_cap))
        .with_state(state)
}

async fn transcribe<T: Transcriber>(
    State(state): State<SttState<T>>,
    mut multipart: Multipart,
) -> Result<Json<TranscribeResponse>, ApiError> {
    state.metrics.observe("/transcribe");
    let start = Instant::now();

    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut language = state.config.default_language.clone();
    let mut partial = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
                upload = Some((filename, bytes.to_vec()));
            }
            "language" => {
                language = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid language field: {}", e)))?;
            }
            "partial" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid partial field: {}", e)))?;
                partial = value.to_lowercase() == "true";
            }
            _ => {}
        }
    }

    let (filename, audio) = upload.ok_or_else(|| ApiError::bad_request("No audio file provided"))?;
    if filename.is_empty() {
        return Err(ApiError::bad_request("No audio file selected"));
    }

    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| ApiError::bad_request(format!("Unsupported file type: {}", filename)))?;

    if audio.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }
    if !state.ready {
        return Err(ApiError::unavailable("transcription model not available"));
    }

    let _permit = state
        .limiter
        .acquire()
        .await
        .map_err(|_| ApiError::internal("service shutting down"))?;

    let text = tokio::time::timeout(
        state.timeout,
        state.transcriber.transcribe(&audio, &extension, &language),
    )
    .await
    .map_err(|_| {
        state.metrics.backend_failures_total.inc();
        ApiError::internal("transcription timed out")
    })?
    .map_err(|e| {
        state.metrics.backend_failures_total.inc();
        ApiError::from(e)
    })?;

    let is_final = looks_final(&text);
    let processing_time = (start.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;
    info!("Transcribed in {:.2}s: {}", processing_time, text);

    Ok(Json(TranscribeResponse {
        text,
        language,
        device: state.transcriber.device(),
        processing_time,
        is_final,
        is_partial: partial.then_some(!is_final),
    }))
}

/// A transcript ending in sentence punctuation reads as a complete
/// utterance.
fn looks_final(text: &str) -> bool {
    text.ends_with(['.', '!', '?'])
}

async fn health<T: Transcriber>(State(state): State<SttState<T>>) -> Response {
    let body = SttHealth {
        status: if state.ready { "ok" } else { "error" }.to_string(),
        model: state.transcriber.model(),
        backend: state.transcriber.device(),
    };
    if state.ready {
        Json(body).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

async fn metrics_text<T: Transcriber>(State(state): State<SttState<T>>) -> String {
    state.metrics.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_terminated_text_is_final() {
        assert!(looks_final("turn on the lights."));
        assert!(looks_final("really?"));
        assert!(looks_final("stop!"));
        assert!(!looks_final("turn on the"));
        assert!(!looks_final(""));
    }

    #[test]
    fn extension_allow_list() {
        for ok in ["clip.wav", "a.b.mp3", "song.FLAC"] {
            let ext = ok
                .rsplit_once('.')
                .map(|(_, e)| e.to_lowercase())
                .filter(|e| ALLOWED_EXTENSIONS.contains(&e.as_str()));
            assert!(ext.is_some(), "{} should be accepted", ok);
        }
        for bad in ["malware.exe", "noext", "archive.tar.gz"] {
            let ext = bad
                .rsplit_once('.')
                .map(|(_, e)| e.to_lowercase())
                .filter(|e| ALLOWED_EXTENSIONS.contains(&e.as_str()));
            assert!(ext.is_none(), "{} should be rejected", bad);
        }
    }
}
