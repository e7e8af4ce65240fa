use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use treez_live::audio::{AudioBackendConfig, AudioBackendFactory, AudioSource};
use treez_live::client::{AudioCapture, LiveClient, NullOutput, PlaybackOutput, WavOutput};
use treez_live::config::Config;
use treez_live::relay::{self, AppState, RelaySettings};
use treez_live::upstream::{GeminiLiveConnector, LiveSetup, UpstreamConnector};

#[derive(Parser)]
#[command(name = "treez-live", version, about = "Real-time voice relay and client for Treez Live")]
struct Cli {
    /// Configuration file (TOML, extension optional)
    #[arg(long, global = true, default_value = "config/treez-live")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the WebSocket relay
    Relay,

    /// Run a voice session against a relay
    Client {
        /// Relay WebSocket URL (defaults to client.url)
        #[arg(long)]
        url: Option<String>,

        /// mic, silence or a WAV file
        #[arg(long, default_value = "mic")]
        input: AudioSource,

        /// device, null or a WAV file to record playback into
        #[arg(long, default_value = "device")]
        output: String,

        /// Start with the microphone muted
        #[arg(long)]
        muted: bool,

        /// Draw the output level meter on stderr
        #[arg(long)]
        visualize: bool,

        /// Disconnect after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Treez Live v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Relay => run_relay(cfg).await,
        Command::Client {
            url,
            input,
            output,
            muted,
            visualize,
            duration,
        } => {
            let mut cfg = cfg;
            if let Some(url) = url {
                cfg.client.url = url;
            }
            run_client(cfg, input, &output, muted, visualize, duration).await
        }
    }
}

async fn run_relay(cfg: Config) -> Result<()> {
    let connector = GeminiLiveConnector::new(&cfg.upstream, cfg.relay.outbound_queue);
    if !connector.is_configured() {
        warn!("No upstream API key set (API_KEY or GEMINI_API_KEY); Live sessions will fail to open");
    }

    info!("Upstream model: {} (voice {})", cfg.upstream.model, cfg.upstream.voice);

    let state = AppState::new(
        Arc::new(connector),
        LiveSetup::from(&cfg.upstream),
        RelaySettings::from(&cfg.relay),
    );

    relay::serve(&cfg.relay.bind, cfg.relay.port, state).await
}

async fn run_client(
    cfg: Config,
    input: AudioSource,
    output: &str,
    muted: bool,
    visualize: bool,
    duration: Option<u64>,
) -> Result<()> {
    let backend_config = AudioBackendConfig {
        target_sample_rate: cfg.client.input_sample_rate,
        target_channels: 1,
        frame_samples: cfg.client.frame_samples,
    };
    let backend = AudioBackendFactory::create(input, backend_config)?;
    let capture = AudioCapture::new(backend, cfg.client.input_sample_rate, cfg.client.frame_samples);
    let output = open_output(output, cfg.client.output_sample_rate)?;

    info!("Connecting to {} (output: {})", cfg.client.url, output.name());

    let handle = LiveClient::new(cfg.client)
        .muted(muted)
        .visualize(visualize)
        .connect(capture, output);

    if visualize {
        let mut visual = handle.visual();
        tokio::spawn(async move {
            while visual.changed().await.is_ok() {
                let line = visual.borrow_and_update().clone();
                eprint!("\r\x1b[2K{}", line);
                let _ = std::io::stderr().flush();
            }
        });
    }

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let mut status = handle.watch_status();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, disconnecting");
            handle.disconnect();
        }
        _ = deadline => {
            info!("Session duration reached, disconnecting");
            handle.disconnect();
        }
        _ = status.wait_for(|s| s.is_terminal()) => {}
    }

    let stats = handle.stats();
    let result = handle.join().await;
    if visualize {
        eprintln!();
    }

    info!(
        "Session ended: {} frames sent, {} model buffers played, {} interruptions",
        stats.frames_sent, stats.buffers_scheduled, stats.interruptions
    );
    result.context("Live session failed")
}

fn open_output(output: &str, sample_rate: u32) -> Result<Box<dyn PlaybackOutput>> {
    match output {
        "null" => Ok(Box::new(NullOutput::new(sample_rate))),
        "device" => open_device_output(sample_rate),
        path => Ok(Box::new(WavOutput::create(path, sample_rate)?)),
    }
}

#[cfg(feature = "device")]
fn open_device_output(sample_rate: u32) -> Result<Box<dyn PlaybackOutput>> {
    let output = treez_live::audio::DeviceOutput::open(sample_rate)?;
    Ok(Box::new(output))
}

#[cfg(not(feature = "device"))]
fn open_device_output(_sample_rate: u32) -> Result<Box<dyn PlaybackOutput>> {
    anyhow::bail!("Device playback requires building with the `device` feature; use --output null or a .wav path")
}
