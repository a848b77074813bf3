//! framecast - stream a directory of frames to an inference/training backend

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framecast::sources::ReplaySource;
use framecast::{FrameStreamClient, SessionEvent, StreamConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Backend WebSocket URL (overrides the config file).
    #[arg(long, env = "FRAMECAST_URL")]
    url: Option<String>,
    /// YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory of .jpg/.jpeg frames to replay.
    #[arg(long)]
    frames: PathBuf,
    /// Gesture label to collect samples for.
    #[arg(long, default_value = "Hello")]
    label: String,
    /// Samples to collect (defaults to the configured target).
    #[arg(long)]
    target: Option<u32>,
    /// Stream for live recognition instead of collecting samples.
    #[arg(long)]
    inference: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => StreamConfig::from_path(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => StreamConfig::default(),
    };
    if let Some(url) = args.url {
        config.url = Some(url);
    }
    config.validate()?;
    if config.url.is_none() {
        bail!("no backend url: pass --url or set `url` in the config file");
    }

    let source = ReplaySource::open(&args.frames).await?;
    let target = args.target.unwrap_or(config.target_samples);
    let client = FrameStreamClient::websocket(config, source)?;
    let mut events = client.events();

    client.connect()?;
    if args.inference {
        client.session().start_inference()?;
    } else {
        client.session().start(args.label.clone(), target)?;
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let last = client.session().stop();
                info!("Interrupted at {}/{} samples", last.collected_count, last.target_count);
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            SessionEvent::Connected => info!("Connected to {}", client.connection().url().map(|u| u.to_string()).unwrap_or_default()),
            SessionEvent::Disconnected { code, reason } => warn!("Disconnected ({}): {}", code, reason),
            SessionEvent::Reconnecting { attempt, max_attempts, delay } => {
                info!("Reconnecting {}/{} in {:?}", attempt, max_attempts, delay)
            }
            SessionEvent::Inference(result) => {
                let latency = result.network_latency_ms.map(|ms| format!(" ({ms:.1}ms)")).unwrap_or_default();
                println!("{} {:.2}{}", result.label, result.confidence, latency);
            }
            SessionEvent::Progress(session) => {
                println!("{} {}/{}", session.label, session.collected_count, session.target_count)
            }
            SessionEvent::Completed(session) => {
                println!("{} complete: {} samples", session.label, session.collected_count);
                break;
            }
            SessionEvent::Stalled { session, error } => {
                bail!("session '{}' stalled at {}/{}: {}", session.label, session.collected_count, session.target_count, error);
            }
            SessionEvent::CaptureFailed(error) => warn!("Frame skipped: {}", error),
            SessionEvent::Error(error) => warn!("{}", error),
        }
    }

    client.disconnect("done");
    Ok(())
}
