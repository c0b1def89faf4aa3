//! Text embedding service.
//!
//! Batch requests are partitioned against the cache so the backend only
//! sees texts it has not embedded before; results are reassembled in
//! input order. Vectors are L2-normalized before caching, which makes
//! the similarity endpoint a plain dot product.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Semaphore;

use vesper_common::api::{
    CacheClearResponse, CacheStatsResponse, EmbedRequest, EmbedResponse, EmbedSingleRequest,
    EmbedSingleResponse, EmbeddingHealth, SimilarityRequest, SimilarityResponse, TextsInput,
};
use vesper_common::{fingerprint, vector, ServiceError, SharedCache};

use crate::backends::Embedder;
use crate::config::{EmbeddingConfig, ServerConfig};
use crate::error::ApiError;
use crate::metrics::ServiceMetrics;
use crate::services::elapsed_ms;

pub struct EmbeddingState<E> {
    pub embedder: Arc<E>,
    pub cache: SharedCache<Vec<f32>>,
    pub config: EmbeddingConfig,
    pub metrics: Arc<ServiceMetrics>,
    pub limiter: Arc<Semaphore>,
    pub timeout: Duration,
    pub ready: bool,
}

impl<E> Clone for EmbeddingState<E> {
    fn clone(&self) -> Self {
        Self {
            embedder: Arc::clone(&self.embedder),
            cache: self.cache.clone(),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
            limiter: Arc::clone(&self.limiter),
            timeout: self.timeout,
            ready: self.ready,
        }
    }
}

impl<E: Embedder> EmbeddingState<E> {
    pub fn new(embedder: E, config: EmbeddingConfig, server: &ServerConfig, ready: bool) -> Self {
        Self {
            embedder: Arc::new(embedder),
            cache: SharedCache::new(config.cache_max_entries, None),
            config,
            metrics: Arc::new(ServiceMetrics::new("embedding")),
            limiter: Arc::new(Semaphore::new(server.max_concurrent_inference)),
            timeout: Duration::from_secs(server.request_timeout_secs),
            ready,
        }
    }
}

pub fn router<E: Embedder>(state: EmbeddingState<E>) -> Router {
    Router::new()
        .route("/health", get(health::<E>))
        .route("/embed", post(embed::<E>))
        .route("/embed/single", post(embed_single::<E>))
        .route("/similarity", post(similarity::<E>))
        .route("/cache/clear", post(cache_clear::<E>))
        .route("/cache/stats", get(cache_stats::<E>))
        .route("/metrics", get(metrics_text::<E>))
        .with_state(state)
}

/// Embed a batch, consulting the cache first. Returned vectors line up
/// with the input order.
async fn encode_texts<E: Embedder>(
    state: &EmbeddingState<E>,
    texts: &[String],
    use_cache: bool,
) -> Result<Vec<Vec<f32>>, ServiceError> {
    let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
    let mut pending_indices = Vec::new();
    let mut pending_texts = Vec::new();

    for (i, text) in texts.iter().enumerate() {
        if use_cache {
            if let Some(cached) = state.cache.get(&fingerprint::digest(text)) {
                state.metrics.cache_hits_total.inc();
                results[i] = Some(cached);
                continue;
            }
            state.metrics.cache_misses_total.inc();
        }
        pending_indices.push(i);
        pending_texts.push(text.clone());
    }

    if !pending_texts.is_empty() {
        let _permit = state
            .limiter
            .acquire()
            .await
            .map_err(|_| ServiceError::backend("service shutting down"))?;

        let mut fresh = tokio::time::timeout(state.timeout, state.embedder.embed(&pending_texts))
            .await
            .map_err(|_| {
                state.metrics.backend_failures_total.inc();
                ServiceError::backend("embedding timed out")
            })?
            .map_err(|e| {
                state.metrics.backend_failures_total.inc();
                e
            })?;

        if fresh.len() != pending_texts.len() {
            return Err(ServiceError::backend("embedding count mismatch"));
        }

        for (slot, embedding) in pending_indices.into_iter().zip(fresh.drain(..)) {
            let mut embedding = embedding;
            vector::l2_normalize(&mut embedding);
            if use_cache {
                state
                    .cache
                    .put(&fingerprint::digest(&texts[slot]), embedding.clone());
            }
            results[slot] = Some(embedding);
        }
    }

    Ok(results
        .into_iter()
        .map(|slot| slot.expect("every input slot filled"))
        .collect())
}

async fn embed<E: Embedder>(
    State(state): State<EmbeddingState<E>>,
    Json(req): Json<EmbedRequest>,
) -> Result<Json<EmbedResponse>, ApiError> {
    state.metrics.observe("/embed");
    let start = Instant::now();
    let max_chars = state.config.max_text_chars;

    let texts: Vec<String> = match req.texts {
        TextsInput::Single(text) => {
            if text.chars().count() > max_chars {
                return Err(ApiError::bad_request(format!(
                    "Text too long (max {} chars)",
                    max_chars
                )));
            }
            vec![text]
        }
        TextsInput::Batch(batch) => {
            if batch.len() > state.config.max_batch {
                return Err(ApiError::bad_request(format!(
                    "Too many texts (max {})",
                    state.config.max_batch
                )));
            }
            // Batch members are truncated rather than rejected.
            batch
                .into_iter()
                .map(|t| {
                    if t.chars().count() > max_chars {
                        t.chars().take(max_chars).collect()
                    } else {
                        t
                    }
                })
                .collect()
        }
    };

    if !state.ready {
        return Err(ApiError::unavailable("embedding model not available"));
    }

    let embeddings = encode_texts(&state, &texts, req.use_cache).await?;
    let dimension = embeddings.first().map(|v| v.len()).unwrap_or(0);

    Ok(Json(EmbedResponse {
        count: embeddings.len(),
        dimension,
        embeddings,
        time_ms: elapsed_ms(start),
        cached: req.use_cache,
    }))
}

async fn embed_single<E: Embedder>(
    State(state): State<EmbeddingState<E>>,
    Json(req): Json<EmbedSingleRequest>,
) -> Result<Json<EmbedSingleResponse>, ApiError> {
    state.metrics.observe("/embed/single");

    if req.text.is_empty() {
        return Err(ApiError::bad_request("Missing 'text' field"));
    }
    if !state.ready {
        return Err(ApiError::unavailable("embedding model not available"));
    }

    let embeddings = encode_texts(&state, &[req.text], true).await?;
    let embedding = embeddings.into_iter().next().unwrap_or_default();

    Ok(Json(EmbedSingleResponse {
        dimension: embedding.len(),
        embedding,
    }))
}

async fn similarity<E: Embedder>(
    State(state): State<EmbeddingState<E>>,
    Json(req): Json<SimilarityRequest>,
) -> Result<Json<SimilarityResponse>, ApiError> {
    state.metrics.observe("/similarity");
    let start = Instant::now();

    if req.text1.is_empty() || req.text2.is_empty() {
        return Err(ApiError::bad_request("Missing text1 or text2"));
    }
    if !state.ready {
        return Err(ApiError::unavailable("embedding model not available"));
    }

    let texts = [req.text1, req.text2];
    let embeddings = encode_texts(&state, &texts, true).await?;

    Ok(Json(SimilarityResponse {
        similarity: vector::round4(vector::dot(&embeddings[0], &embeddings[1])),
        time_ms: elapsed_ms(start),
    }))
}

async fn cache_clear<E: Embedder>(
    State(state): State<EmbeddingState<E>>,
) -> Json<CacheClearResponse> {
    let previous_size = state.cache.clear();
    Json(CacheClearResponse {
        message: "Cache cleared".to_string(),
        previous_size,
    })
}

async fn cache_stats<E: Embedder>(
    State(state): State<EmbeddingState<E>>,
) -> Json<CacheStatsResponse> {
    let stats = state.cache.stats();
    Json(CacheStatsResponse {
        cache_entries: stats.entries,
        cache_size_limit: stats.capacity,
        model: state.config.model.clone(),
    })
}

async fn health<E: Embedder>(State(state): State<EmbeddingState<E>>) -> Response {
    let body = EmbeddingHealth {
        status: if state.ready { "healthy" } else { "unhealthy" }.to_string(),
        model: state.config.model.clone(),
        cache_size: state.cache.len(),
        backend: state.embedder.name(),
    };
    if state.ready {
        Json(body).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

async fn metrics_text<E: Embedder>(State(state): State<EmbeddingState<E>>) -> String {
    state.metrics.render()
}
