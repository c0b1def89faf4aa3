//! Synthesis via the external piper CLI.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::error;
use vesper_common::ServiceError;

use super::{SynthOptions, Synthesizer};

/// Spawns `piper` per request: text on stdin, WAV into a scratch file.
pub struct PiperCli {
    bin: PathBuf,
    voice: PathBuf,
}

impl PiperCli {
    pub fn new(bin: impl Into<PathBuf>, voice: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            voice: voice.into(),
        }
    }
}

impl Synthesizer for PiperCli {
    async fn synthesize(&self, text: &str, opts: &SynthOptions) -> Result<Vec<u8>, ServiceError> {
        let tmp = tempfile::Builder::new()
            .prefix("vesper-tts-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| ServiceError::backend(format!("scratch file: {}", e)))?;
        let out_path = tmp.path().to_path_buf();

        let mut cmd = Command::new(&self.bin);
        cmd.arg("--model")
            .arg(&self.voice)
            .arg("--output_file")
            .arg(&out_path)
            .arg("--length_scale")
            .arg(opts.length_scale.to_string())
            .arg("--noise_scale")
            .arg(opts.noise_scale.to_string())
            .arg("--noise_w")
            .arg(opts.noise_w.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if opts.speaker != 0 {
            cmd.arg("--speaker").arg(opts.speaker.to_string());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ServiceError::unavailable(format!("failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServiceError::backend("piper stdin unavailable"))?;
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| ServiceError::backend(format!("writing to piper: {}", e)))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ServiceError::backend(format!("waiting for piper: {}", e)))?;

        if !output.status.success() {
            error!(
                "piper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(ServiceError::backend("synthesis failed"));
        }

        let audio = tokio::fs::read(&out_path)
            .await
            .map_err(|e| ServiceError::backend(format!("reading synthesized audio: {}", e)))?;
        if audio.is_empty() {
            return Err(ServiceError::backend("synthesis produced no audio"));
        }
        Ok(audio)
    }

    async fn verify(&self) -> Result<(), ServiceError> {
        tokio::fs::metadata(&self.voice).await.map_err(|_| {
            ServiceError::unavailable(format!("voice model not found: {}", self.voice.display()))
        })?;

        Command::new(&self.bin)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                ServiceError::unavailable(format!(
                    "piper binary {} not runnable: {}",
                    self.bin.display(),
                    e
                ))
            })?;
        Ok(())
    }

    fn name(&self) -> String {
        "piper".to_string()
    }
}
