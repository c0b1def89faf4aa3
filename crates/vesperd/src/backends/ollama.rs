//! Text embeddings via a local Ollama instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vesper_common::ServiceError;

use super::Embedder;

#[derive(Serialize)]
struct EmbedCall<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedReply {
    embeddings: Vec<Vec<f32>>,
}

/// Batch embedding client for Ollama's /api/embed endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let call = EmbedCall {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&call)
            .send()
            .await
            .map_err(|e| ServiceError::backend(format!("ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::backend(format!(
                "ollama returned {}",
                response.status()
            )));
        }

        let reply: EmbedReply = response
            .json()
            .await
            .map_err(|e| ServiceError::backend(format!("invalid ollama response: {}", e)))?;

        if reply.embeddings.len() != texts.len() {
            return Err(ServiceError::backend(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                reply.embeddings.len()
            )));
        }
        Ok(reply.embeddings)
    }

    async fn verify(&self) -> Result<(), ServiceError> {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| {
                ServiceError::unavailable(format!("ollama not reachable at {}: {}", self.base_url, e))
            })?
            .error_for_status()
            .map_err(|e| ServiceError::unavailable(format!("ollama unhealthy: {}", e)))?;
        Ok(())
    }

    fn name(&self) -> String {
        format!("ollama/{}", self.model)
    }
}
