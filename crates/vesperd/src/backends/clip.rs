//! Image/text embeddings via an external CLIP encoder binary.
//!
//! Protocol: one JSON request on stdin, one JSON reply on stdout.
//! `{"op":"embed_image","image":"<base64>"}` -> `{"embedding":[...]}`
//! `{"op":"embed_text","text":"..."}`        -> `{"embedding":[...]}`
//! `{"op":"caption","image":"<base64>"}`     -> `{"caption":"..."}`
//! Failures come back as `{"error":"..."}`.

use std::path::PathBuf;
use std::process::Stdio;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;
use vesper_common::ServiceError;

use super::VisionEncoder;

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClipOp<'a> {
    EmbedImage { image: &'a str },
    EmbedText { text: &'a str },
    Caption { image: &'a str },
}

#[derive(Deserialize)]
struct ClipReply {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct ClipCli {
    bin: PathBuf,
}

impl ClipCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    async fn call(&self, op: ClipOp<'_>) -> Result<ClipReply, ServiceError> {
        let mut child = Command::new(&self.bin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ServiceError::unavailable(format!("failed to spawn encoder: {}", e)))?;

        let payload = serde_json::to_vec(&op)
            .map_err(|e| ServiceError::backend(format!("encoding request: {}", e)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServiceError::backend("encoder stdin unavailable"))?;
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| ServiceError::backend(format!("writing to encoder: {}", e)))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ServiceError::backend(format!("waiting for encoder: {}", e)))?;

        if !output.status.success() {
            return Err(ServiceError::backend(format!(
                "encoder exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let reply: ClipReply = serde_json::from_slice(&output.stdout)
            .map_err(|e| ServiceError::backend(format!("invalid encoder reply: {}", e)))?;
        if let Some(message) = reply.error {
            return Err(ServiceError::backend(message));
        }
        Ok(reply)
    }
}

impl VisionEncoder for ClipCli {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>, ServiceError> {
        let encoded = STANDARD.encode(image);
        let reply = self.call(ClipOp::EmbedImage { image: &encoded }).await?;
        reply
            .embedding
            .ok_or_else(|| ServiceError::backend("encoder returned no embedding"))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let reply = self.call(ClipOp::EmbedText { text }).await?;
        reply
            .embedding
            .ok_or_else(|| ServiceError::backend("encoder returned no embedding"))
    }

    async fn caption(&self, image: &[u8]) -> Result<String, ServiceError> {
        let encoded = STANDARD.encode(image);
        match self.call(ClipOp::Caption { image: &encoded }).await {
            Ok(reply) => Ok(reply.caption.unwrap_or_default()),
            Err(e) => {
                // Captioning is optional; image search still works.
                warn!("caption generation failed: {}", e);
                Ok(String::new())
            }
        }
    }

    async fn verify(&self) -> Result<(), ServiceError> {
        Command::new(&self.bin)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                ServiceError::unavailable(format!(
                    "encoder binary {} not runnable: {}",
                    self.bin.display(),
                    e
                ))
            })?;
        Ok(())
    }

    fn name(&self) -> String {
        "clip-cli".to_string()
    }
}
