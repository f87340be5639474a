//! agentvox: voice hub service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agentvox::config::Config;
use agentvox::hub::summarizer::OllamaSummarizer;
use agentvox::hub::tts::CommandSpeechEngine;
use agentvox::hub::{api, Hub};

#[derive(Parser, Debug)]
#[command(name = "agentvox", about = "Voice hub for coding agents")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the API port
    #[arg(short, long)]
    port: Option<u16>,

    /// Start passive observation of agent transcripts
    #[arg(long)]
    observe: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("agentvox starting");

    let mut config = Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let summarizer = Arc::new(OllamaSummarizer::new(
        &config.ollama.model,
        &config.ollama.host,
        Duration::from_secs(config.scheduler.summarize_timeout_secs),
    )?);
    let engine = Arc::new(CommandSpeechEngine::new(&config.tts));
    info!(
        "Summarizer: {} at {} | speech command: {}",
        config.ollama.model, config.ollama.host, config.tts.command
    );

    let hub = Hub::new(&config, summarizer, engine);
    let _consumer = hub.start_queue_consumer();

    if config.observer.enabled || args.observe {
        hub.set_observer(true);
    }

    api::start_api(hub.clone(), &config.server.host, config.server.port).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    hub.engine.stop();
    Ok(())
}
