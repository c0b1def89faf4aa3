//! Vesper Daemon - local inference services for the assistant front end.
//!
//! Hosts the TTS, STT, embedding, vision, and GPU telemetry services,
//! each on its own local port.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use vesperd::backends::{
    ClipCli, Embedder, OllamaEmbedder, PiperCli, Synthesizer, Transcriber, VisionEncoder,
    WhisperCli,
};
use vesperd::config::Config;
use vesperd::server;
use vesperd::services::{embedding, gpu, stt, tts, vision};

#[derive(Parser)]
#[command(name = "vesperd")]
#[command(about = "Vesper inference services daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Path to config.toml (default: /etc/vesper/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    info!("vesperd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(args.config.as_deref());
    let bind = config.server.bind_addr.clone();

    let mut servers: JoinSet<Result<()>> = JoinSet::new();
    let mut monitor_handle: Option<gpu::GpuMonitor<gpu::SystemProvider>> = None;

    if config.tts.enabled {
        let synth = PiperCli::new(
            config.tts.piper_bin.clone(),
            config.tts.voice_path.clone(),
        );
        let ready = match synth.verify().await {
            Ok(()) => true,
            Err(e) => {
                warn!("TTS backend unavailable, serving degraded: {}", e);
                false
            }
        };
        let state = tts::TtsState::new(synth, config.tts.clone(), &config.server, ready);
        let bind = bind.clone();
        let port = config.tts.port;
        servers.spawn(async move {
            server::serve(tts::router(state), &bind, port, "vesper-tts").await
        });
    }

    if config.stt.enabled {
        let transcriber = WhisperCli::new(
            config.stt.whisper_bin.clone(),
            config.stt.model_path.clone(),
        );
        // A transcription model that fails to load is a startup failure,
        // not a degraded mode.
        if let Err(e) = transcriber.verify().await {
            bail!("STT backend failed verification: {}", e);
        }
        let state = stt::SttState::new(transcriber, config.stt.clone(), &config.server, true);
        let bind = bind.clone();
        let port = config.stt.port;
        servers.spawn(async move {
            server::serve(stt::router(state), &bind, port, "vesper-stt").await
        });
    }

    if config.embedding.enabled {
        let embedder = OllamaEmbedder::new(&config.embedding.ollama_url, &config.embedding.model);
        let ready = match embedder.verify().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Embedding backend unavailable, serving degraded: {}", e);
                false
            }
        };
        let state =
            embedding::EmbeddingState::new(embedder, config.embedding.clone(), &config.server, ready);
        let bind = bind.clone();
        let port = config.embedding.port;
        servers.spawn(async move {
            server::serve(embedding::router(state), &bind, port, "vesper-embedding").await
        });
    }

    if config.vision.enabled {
        let encoder = ClipCli::new(config.vision.clip_bin.clone());
        let ready = match encoder.verify().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Vision backend unavailable, serving degraded: {}", e);
                false
            }
        };
        let state = vision::VisionState::new(encoder, config.vision.clone(), &config.server, ready);
        let bind = bind.clone();
        let port = config.vision.port;
        servers.spawn(async move {
            server::serve(vision::router(state), &bind, port, "vesper-vision").await
        });
    }

    if config.gpu.enabled {
        let provider = gpu::select_provider(&config.gpu.provider);
        let monitor = gpu::GpuMonitor::new(provider, &config.gpu);
        monitor.start();
        monitor_handle = Some(monitor.clone());

        let state = gpu::GpuServiceState::new(monitor);
        let bind = bind.clone();
        let port = config.gpu.port;
        servers.spawn(async move {
            server::serve(gpu::router(state), &bind, port, "vesper-gpu").await
        });
    }

    if servers.is_empty() {
        bail!("No services enabled in config");
    }
    info!("All enabled services launched");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down gracefully");
        }
        Some(result) = servers.join_next() => {
            match result {
                Ok(Ok(())) => warn!("A service exited unexpectedly"),
                Ok(Err(e)) => {
                    error!("Service failed: {}", e);
                    if let Some(monitor) = &monitor_handle {
                        monitor.stop();
                    }
                    return Err(e);
                }
                Err(e) => error!("Service task panicked: {}", e),
            }
        }
    }

    if let Some(monitor) = &monitor_handle {
        monitor.stop();
    }
    Ok(())
}
