//! Vesper Control - CLI client for the Vesper inference services.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vesperctl")]
#[command(about = "Client for the Vesper inference services", long_about = None)]
#[command(version)]
struct Cli {
    /// Host the services are bound to
    #[arg(long, default_value = "127.0.0.1", global = true)]
    host: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every service's health endpoint
    Status,

    /// Embed a text and print the vector head
    Embed {
        text: String,
    },

    /// Cosine similarity between two texts
    Similarity {
        text1: String,
        text2: String,
    },

    /// Synthesize speech into a WAV file
    Speak {
        text: String,

        /// Output file
        #[arg(short, long, default_value = "speech.wav")]
        output: String,

        /// Speaker id
        #[arg(long)]
        speaker: Option<u32>,
    },

    /// Transcribe an audio file
    Transcribe {
        file: String,

        #[arg(long, default_value = "en")]
        language: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => commands::status(&cli.host).await,
        Commands::Embed { text } => commands::embed(&cli.host, &text).await,
        Commands::Similarity { text1, text2 } => {
            commands::similarity(&cli.host, &text1, &text2).await
        }
        Commands::Speak {
            text,
            output,
            speaker,
        } => commands::speak(&cli.host, &text, &output, speaker).await,
        Commands::Transcribe { file, language } => {
            commands::transcribe(&cli.host, &file, &language).await
        }
    }
}
