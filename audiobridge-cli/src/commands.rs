//! Command execution.

use audiobridge_client::{BridgeClient, ClientConfig, SessionState};
use audiobridge_protocol::{dequantize, Command, Decoder, Encoder};
use colored::Colorize;
use std::f32::consts::TAU;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub type CommandResult = Result<String, Box<dyn std::error::Error + Send + Sync>>;

/// Options for `probe`.
pub struct ProbeOptions {
    pub port: u8,
    pub sample_rate: u32,
    pub buffers: usize,
    pub samples: usize,
    pub chunk: Option<usize>,
}

/// Options for `client`.
pub struct ClientOptions {
    pub duration: f64,
    pub channels: usize,
    pub block: usize,
    pub sample_rate: u32,
    pub frequency: f32,
    pub port: u8,
}

/// Speaks the wire protocol directly: handshake, port, sample rate,
/// `buffers` audio frames holding a ramp, then QUIT.
pub async fn probe(server: SocketAddr, options: &ProbeOptions) -> CommandResult {
    let mut stream = TcpStream::connect(server).await?;
    stream.set_nodelay(true)?;

    let started = Instant::now();
    let header = Encoder::encode_all(&[
        Command::Hello,
        Command::PortSet(options.port),
        Command::SampleRateSet(options.sample_rate),
    ]);
    let mut sent = write_chunked(&mut stream, &header, options.chunk).await?;
    tracing::debug!(server = %server, bytes = sent, "handshake sent");

    let frame = ramp(options.samples);
    let audio = Encoder::encode(&Command::audio(&frame));
    for _ in 0..options.buffers {
        sent += write_chunked(&mut stream, &audio, options.chunk).await?;
    }

    tracing::debug!(frames = options.buffers, bytes = sent, "audio sent");

    sent += write_chunked(&mut stream, &Encoder::encode(&Command::Quit), options.chunk).await?;
    stream.shutdown().await?;

    Ok(format!(
        "{} {} bytes to {} ({} frames of {} samples) in {:.2?}",
        "Sent".green(),
        sent,
        server.to_string().cyan(),
        options.buffers,
        options.samples,
        started.elapsed()
    ))
}

async fn write_chunked(
    stream: &mut TcpStream,
    bytes: &[u8],
    chunk: Option<usize>,
) -> std::io::Result<usize> {
    match chunk {
        Some(size) if size > 0 => {
            for piece in bytes.chunks(size) {
                stream.write_all(piece).await?;
                stream.flush().await?;
            }
        }
        _ => stream.write_all(bytes).await?,
    }
    Ok(bytes.len())
}

/// Samples rising linearly from -1.0 towards 1.0.
fn ramp(samples: usize) -> Vec<f32> {
    (0..samples)
        .map(|i| i as f32 / samples as f32 * 2.0 - 1.0)
        .collect()
}

/// Runs a `BridgeClient` for `duration` seconds, feeding it a sine wave one
/// block at a time the way a host audio callback would.
pub fn run_client(server: SocketAddr, options: &ClientOptions) -> CommandResult {
    let channels = options.channels.max(1);
    let sample_rate = options.sample_rate.max(1);
    let config = ClientConfig::new(server).with_channels(channels);
    let session = SessionState {
        port: options.port,
        sample_rate,
        ..SessionState::default()
    };
    let client = BridgeClient::with_session(config, session)?;
    client.set_audio_active(true);

    let block_period = Duration::from_secs_f64(options.block as f64 / f64::from(sample_rate));
    let deadline = Instant::now() + Duration::from_secs_f64(options.duration.max(0.0));
    let step = TAU * options.frequency / sample_rate as f32;

    let mut input = vec![0.0f32; options.block * channels];
    let mut output = vec![0.0f32; options.block * channels];
    let mut phase = 0.0f32;
    let (mut forwarded, mut skipped) = (0u64, 0u64);

    let mut link = client.link_state();
    tracing::info!(server = %server, state = ?link, "link");

    while Instant::now() < deadline {
        for frame in input.chunks_exact_mut(channels) {
            frame.fill(phase.sin() * 0.5);
            phase = (phase + step) % TAU;
        }

        if client.process_audio(&input, &mut output, options.block) {
            forwarded += 1;
        } else {
            skipped += 1;
        }

        let current = client.link_state();
        if current != link {
            tracing::info!(from = ?link, to = ?current, "link changed");
            link = current;
        }

        std::thread::sleep(block_period);
    }

    client.shutdown();
    let stats = client.stats();

    Ok(format!(
        "{} {} blocks, skipped {}\n{} {} sessions, {} connect attempts, {} bytes, {} dropped pushes",
        "Forwarded".green(),
        forwarded,
        skipped,
        "Stats".bold(),
        stats.sessions,
        stats.connect_attempts,
        stats.bytes_sent,
        stats.dropped_pushes
    ))
}

/// Decodes a captured client byte stream and lists its commands.
pub fn dump(path: &Path) -> CommandResult {
    let bytes = std::fs::read(path)?;
    let mut decoder = Decoder::new();
    decoder.extend(&bytes);

    let mut output = String::new();
    let mut count = 0usize;
    loop {
        match decoder.decode_next() {
            Ok(Some(command)) => {
                writeln!(output, "{:>6}  {}", count, describe(&command))?;
                count += 1;
            }
            Ok(None) => break,
            Err(e) => {
                writeln!(output, "{}: {}", "Protocol error".red(), e)?;
                break;
            }
        }
    }

    if decoder.buffered() > 0 {
        writeln!(
            output,
            "{} {} trailing bytes",
            "Incomplete:".yellow(),
            decoder.buffered()
        )?;
    }
    write!(output, "{} commands, {} bytes", count, bytes.len())?;
    Ok(output)
}

fn describe(command: &Command<'_>) -> String {
    match command {
        Command::Hello => "HELLO".cyan().to_string(),
        Command::Quit => "QUIT".cyan().to_string(),
        Command::PortSet(port) => format!("{} {}", "PORT_SET".cyan(), port),
        Command::SampleRateSet(rate) => format!("{} {}", "SAMPLE_RATE_SET".cyan(), rate),
        Command::ParameterSet { index, value } => format!(
            "{} {} = {:.3}",
            "PARAMETER_SET".cyan(),
            index,
            dequantize(*value)
        ),
        Command::AudioActivate => "AUDIO_ACTIVATE".cyan().to_string(),
        Command::AudioDeactivate => "AUDIO_DEACTIVATE".cyan().to_string(),
        Command::AudioProcess(samples) => {
            let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            format!(
                "{} {} samples (peak {:.3})",
                "AUDIO_PROCESS".cyan(),
                samples.len(),
                peak
            )
        }
    }
}
