//! parley-server: WebSocket signaling server for voice rooms.
//!
//! Accepts WebSocket connections, tracks who is in which room and who holds
//! a mic slot, and forwards WebRTC negotiation frames between peers.

use std::path::PathBuf;

use clap::Parser;
use parley_common::ConfigError;
use parley_config::{validation, ParleyConfig};
use parley_server::Coordinator;

#[derive(Parser)]
#[command(name = "parley-server", about = "WebRTC signaling and room presence server")]
struct Args {
    /// Config file. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind, overriding the config file.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overriding the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Mic slots per room, overriding the config file.
    #[arg(long)]
    mic_slots: Option<u32>,
}

#[tokio::main]
async fn main() -> parley_common::Result<()> {
    let args = Args::parse();
    let (config, load_error) = match load(&args) {
        Ok(config) => (config, None),
        Err(e) => (ParleyConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("parley_server={}", config.logging.level.as_directive()).into()
            }),
        )
        .init();

    if let Some(e) = load_error {
        // An explicitly named file must load; the default one may be absent.
        if args.config.is_some() {
            return Err(e.into());
        }
        tracing::warn!(error = %e, "Falling back to default config");
    }

    let config = apply_overrides(config, &args);
    validation::validate(&config)?;

    let coordinator = Coordinator::new(config.server.mic_slots as usize);
    let listener = parley_server::bind(&config.server).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        mic_slots = config.server.mic_slots,
        "parley-server listening"
    );
    parley_server::serve(listener, coordinator).await;
    Ok(())
}

fn load(args: &Args) -> Result<ParleyConfig, ConfigError> {
    match &args.config {
        Some(path) => parley_config::load_from_path(path),
        None => parley_config::load_default(),
    }
}

fn apply_overrides(mut config: ParleyConfig, args: &Args) -> ParleyConfig {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(mic_slots) = args.mic_slots {
        config.server.mic_slots = mic_slots;
    }
    config
}
