//! Opaque model capabilities behind trait seams.
//!
//! The services never touch a concrete library or binary; they depend on
//! these traits, which lets the test suites plug in counting mocks at the
//! same seam the production backends occupy. Futures are declared `Send`
//! so generic handlers can run on the multi-threaded runtime.

use std::future::Future;

use vesper_common::ServiceError;

pub mod clip;
pub mod ollama;
pub mod piper;
pub mod whisper;

pub use clip::ClipCli;
pub use ollama::OllamaEmbedder;
pub use piper::PiperCli;
pub use whisper::WhisperCli;

/// Knobs forwarded to the synthesizer, already resolved from the request.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthOptions {
    pub speaker: u32,
    pub length_scale: f64,
    pub noise_scale: f64,
    pub noise_w: f64,
}

/// Text in, finished WAV bytes out.
pub trait Synthesizer: Send + Sync + 'static {
    fn synthesize(
        &self,
        text: &str,
        opts: &SynthOptions,
    ) -> impl Future<Output = Result<Vec<u8>, ServiceError>> + Send;

    /// Startup probe; `Unavailable` means the voice never loaded.
    fn verify(&self) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn name(&self) -> String;
}

/// Audio bytes in, transcript out.
pub trait Transcriber: Send + Sync + 'static {
    fn transcribe(
        &self,
        audio: &[u8],
        extension: &str,
        language: &str,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    fn verify(&self) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Model identifier reported by /health and /transcribe.
    fn model(&self) -> String;

    /// Execution device/backend label ("cli", "cuda", ...).
    fn device(&self) -> String;
}

/// Batch of texts in, one vector per text out. Vectors are not assumed
/// normalized; the service normalizes before caching.
pub trait Embedder: Send + Sync + 'static {
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, ServiceError>> + Send;

    fn verify(&self) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn name(&self) -> String;
}

/// CLIP-style joint image/text encoder with optional captioning.
pub trait VisionEncoder: Send + Sync + 'static {
    /// Embed an already-decoded, already-downscaled image (PNG bytes).
    fn embed_image(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<f32>, ServiceError>> + Send;

    fn embed_text(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Vec<f32>, ServiceError>> + Send;

    /// Best-effort caption. An unavailable caption model yields an empty
    /// string, not an error.
    fn caption(&self, image: &[u8]) -> impl Future<Output = Result<String, ServiceError>> + Send;

    fn verify(&self) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn name(&self) -> String;
}
