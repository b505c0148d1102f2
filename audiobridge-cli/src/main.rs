//! audiobridge-cli - Command-line tools for the audio plugin bridge
//!
//! `probe` speaks the raw wire protocol, `client` drives a real
//! `BridgeClient`, `dump` decodes a captured byte stream.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audiobridge-cli")]
#[command(about = "Command-line tools for the audiobridge plugin bridge")]
#[command(version)]
struct Cli {
    /// Engine address
    #[arg(short, long, default_value = "127.0.0.1:5000", env = "AUDIOBRIDGE_SERVER")]
    server: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a scripted raw session: handshake, port, sample rate, audio, QUIT
    Probe {
        /// Port id to select
        #[arg(short, long, default_value = "15")]
        port: u8,

        /// Sample rate to announce
        #[arg(short = 'r', long, default_value = "44100")]
        sample_rate: u32,

        /// Number of AUDIO_PROCESS frames to send
        #[arg(short, long, default_value = "100")]
        buffers: usize,

        /// Interleaved samples per frame
        #[arg(long, default_value = "512")]
        samples: usize,

        /// Write the stream in pieces of this many bytes
        #[arg(short, long)]
        chunk: Option<usize>,
    },

    /// Run a bridge client feeding a sine wave
    Client {
        /// How long to run, in seconds
        #[arg(short, long, default_value = "5")]
        duration: f64,

        /// Interleaved channels
        #[arg(long, default_value = "2")]
        channels: usize,

        /// Frames per block
        #[arg(short, long, default_value = "256")]
        block: usize,

        /// Sample rate
        #[arg(short = 'r', long, default_value = "44100")]
        sample_rate: u32,

        /// Sine frequency in Hz
        #[arg(short, long, default_value = "440")]
        frequency: f32,

        /// Port id to select (0-15)
        #[arg(short, long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..16))]
        port: u8,
    },

    /// Decode a captured client stream and print its commands
    Dump {
        /// File holding the raw bytes, starting with the handshake
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("audiobridge_cli=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Probe {
            port,
            sample_rate,
            buffers,
            samples,
            chunk,
        } => {
            let options = commands::ProbeOptions {
                port,
                sample_rate,
                buffers,
                samples,
                chunk,
            };
            commands::probe(cli.server, &options).await
        }
        Commands::Client {
            duration,
            channels,
            block,
            sample_rate,
            frequency,
            port,
        } => {
            let options = commands::ClientOptions {
                duration,
                channels,
                block,
                sample_rate,
                frequency,
                port,
            };
            let server = cli.server;
            tokio::task::spawn_blocking(move || commands::run_client(server, &options)).await?
        }
        Commands::Dump { file } => commands::dump(&file),
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
