//! Transcription via an external whisper.cpp-style CLI.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::error;
use vesper_common::ServiceError;

use super::Transcriber;

/// Writes the upload to a scratch file and shells out to the CLI. The
/// model stays resident in the external process cache between calls on
/// recent whisper.cpp builds; this wrapper treats every call as
/// independent either way.
pub struct WhisperCli {
    bin: PathBuf,
    model: PathBuf,
}

impl WhisperCli {
    pub fn new(bin: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
        }
    }
}

impl Transcriber for WhisperCli {
    async fn transcribe(
        &self,
        audio: &[u8],
        extension: &str,
        language: &str,
    ) -> Result<String, ServiceError> {
        let tmp = tempfile::Builder::new()
            .prefix("vesper-stt-")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .map_err(|e| ServiceError::backend(format!("scratch file: {}", e)))?;
        tokio::fs::write(tmp.path(), audio)
            .await
            .map_err(|e| ServiceError::backend(format!("writing upload: {}", e)))?;

        let output = Command::new(&self.bin)
            .arg("--model")
            .arg(&self.model)
            .arg("--file")
            .arg(tmp.path())
            .arg("--language")
            .arg(language)
            .arg("--no-timestamps")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ServiceError::backend(format!("spawning transcriber: {}", e)))?;

        if !output.status.success() {
            error!(
                "transcriber exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(ServiceError::backend("transcription failed"));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn verify(&self) -> Result<(), ServiceError> {
        tokio::fs::metadata(&self.model).await.map_err(|_| {
            ServiceError::unavailable(format!("model not found: {}", self.model.display()))
        })?;

        Command::new(&self.bin)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                ServiceError::unavailable(format!(
                    "transcriber binary {} not runnable: {}",
                    self.bin.display(),
                    e
                ))
            })?;
        Ok(())
    }

    fn model(&self) -> String {
        self.model
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn device(&self) -> String {
        "cli".to_string()
    }
}
