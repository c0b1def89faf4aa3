//! Command implementations: thin HTTP calls plus terminal output.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;
use serde_json::json;

use vesper_common::api::{
    EmbedSingleResponse, SimilarityResponse, SynthesizeRequest, TranscribeResponse,
};

const SERVICES: &[(&str, u16)] = &[
    ("tts", 5000),
    ("stt", 5001),
    ("embedding", 5002),
    ("gpu", 5003),
    ("vision", 5004),
];

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client")
}

pub async fn status(host: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    println!("Vesper services on {}", host.bold());
    let mut down = 0;
    for (name, port) in SERVICES {
        let url = format!("http://{}:{}/health", host, port);
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                println!("  {} {:<10} :{}", "●".green(), name, port);
            }
            Ok(response) => {
                println!(
                    "  {} {:<10} :{}  ({})",
                    "●".yellow(),
                    name,
                    port,
                    response.status()
                );
                down += 1;
            }
            Err(_) => {
                println!("  {} {:<10} :{}  (unreachable)", "●".red(), name, port);
                down += 1;
            }
        }
    }

    if down == 0 {
        println!("{}", "All services healthy".green());
    } else {
        println!("{}", format!("{} service(s) degraded", down).yellow());
    }
    Ok(())
}

pub async fn embed(host: &str, text: &str) -> Result<()> {
    let response: EmbedSingleResponse = client()
        .post(format!("http://{}:5002/embed/single", host))
        .json(&json!({ "text": text }))
        .send()
        .await
        .context("embedding service unreachable")?
        .error_for_status()?
        .json()
        .await?;

    let head: Vec<String> = response
        .embedding
        .iter()
        .take(6)
        .map(|x| format!("{:.4}", x))
        .collect();
    println!("dimension: {}", response.dimension.to_string().bold());
    println!("embedding: [{}, ...]", head.join(", "));
    Ok(())
}

pub async fn similarity(host: &str, text1: &str, text2: &str) -> Result<()> {
    let response: SimilarityResponse = client()
        .post(format!("http://{}:5002/similarity", host))
        .json(&json!({ "text1": text1, "text2": text2 }))
        .send()
        .await
        .context("embedding service unreachable")?
        .error_for_status()?
        .json()
        .await?;

    println!(
        "similarity: {}  ({:.1} ms)",
        format!("{:.4}", response.similarity).bold(),
        response.time_ms
    );
    Ok(())
}

pub async fn speak(host: &str, text: &str, output: &str, speaker: Option<u32>) -> Result<()> {
    let request = SynthesizeRequest {
        text: text.to_string(),
        speaker_id: speaker,
        speaker: None,
        length_scale: 0.75,
        noise_scale: 0.667,
        noise_w: 0.8,
    };

    let response = client()
        .post(format!("http://{}:5000/tts", host))
        .json(&request)
        .send()
        .await
        .context("TTS service unreachable")?;

    if !response.status().is_success() {
        bail!("synthesis failed: {}", response.status());
    }

    let audio = response.bytes().await?;
    tokio::fs::write(output, &audio).await?;
    println!(
        "{} {} ({} bytes)",
        "Wrote".green(),
        output.bold(),
        audio.len()
    );
    Ok(())
}

pub async fn transcribe(host: &str, file: &str, language: &str) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file))?;
    let filename = std::path::Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.wav".to_string());

    let form = reqwest::multipart::Form::new()
        .part(
            "audio",
            reqwest::multipart::Part::bytes(bytes).file_name(filename),
        )
        .text("language", language.to_string());

    let response = client()
        .post(format!("http://{}:5001/transcribe", host))
        .multipart(form)
        .send()
        .await
        .context("STT service unreachable")?;

    if !response.status().is_success() {
        bail!("transcription failed: {}", response.status());
    }

    let result: TranscribeResponse = response.json().await?;
    println!("{}", result.text.bold());
    println!(
        "  language={} device={} took={:.2}s final={}",
        result.language, result.device, result.processing_time, result.is_final
    );
    Ok(())
}
