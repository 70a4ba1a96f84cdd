//! spotnet - UDP broadcast presence discovery
//!
//! Run a host point that advertises channels, or search the local network
//! for running hosts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spotnet::config::{generate_sample_config, Config};
use spotnet::{
    Channel, DatagramSocket, EventKind, PointKind, SearchTarget, Spot, SpotEvent, SpotOptions,
    UdpTransport,
};

/// spotnet - UDP broadcast presence discovery
#[derive(Parser)]
#[command(name = "spotnet")]
#[command(version = "0.1.0")]
#[command(about = "Advertise and discover points on the local network", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as a host point advertising its channels
    Host {
        /// Data port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Name to advertise
        #[arg(short, long)]
        name: Option<String>,

        /// Channel to advertise, as an id:name pair (repeatable)
        #[arg(long = "channel", value_name = "ID:NAME")]
        channels: Vec<String>,
    },

    /// Search for points and print what answers
    Search {
        /// Kind filter: host, controller or *
        #[arg(short, long, default_value = "*")]
        kind: String,

        /// How long to listen for responses (seconds)
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Host { port, name, channels } => run_host(config, port, name, channels).await,
        Commands::Search { kind, timeout } => run_search(config, kind, timeout).await,
        Commands::Config { generate, output } => run_config(config, generate, output),
    }
}

async fn build_spot(config: &Config, options: SpotOptions) -> anyhow::Result<Spot> {
    let sig = UdpTransport::bind(config.network.broadcast_port)
        .await
        .context("binding broadcast socket")?;
    let dat = UdpTransport::bind(options.port)
        .await
        .context("binding data socket")?;
    if let Some(ttl) = config.network.ttl {
        sig.set_ttl(ttl)?;
        dat.set_ttl(ttl)?;
    }
    Ok(Spot::new(Arc::new(sig), Arc::new(dat), options))
}

async fn run_host(
    config: Config,
    port: Option<u16>,
    name: Option<String>,
    channels: Vec<String>,
) -> anyhow::Result<()> {
    let mut options = config.spot_options();
    options.kind = PointKind::Host;
    if let Some(port) = port {
        options.port = port;
    }
    if let Some(name) = name {
        options.name = name;
    }

    let spot = build_spot(&config, options).await?;

    spot.events().on(EventKind::Data, |event| {
        if let SpotEvent::Data(payload) = event {
            tracing::info!(
                "data on channel {} from [{}]: {} bytes",
                payload.channel,
                payload.from.name,
                payload.body.len()
            );
        }
    });

    spot.start().await?;
    for spec in &channels {
        spot.add_channel(parse_channel(spec)?).await?;
    }

    tokio::signal::ctrl_c().await?;
    spot.stop().await;
    Ok(())
}

async fn run_search(config: Config, kind: String, timeout: u64) -> anyhow::Result<()> {
    let mut options = config.spot_options();
    options.kind = PointKind::Controller;
    // Ephemeral data port: responses find us via the advertised port.
    options.port = 0;

    let spot = build_spot(&config, options).await?;

    spot.events().on(EventKind::Found, |event| {
        if let SpotEvent::Found(identity) = event {
            println!(
                "{}  {}:{}  [{}]",
                identity.uuid, identity.host, identity.port, identity.name
            );
        }
    });

    spot.start().await?;
    spot.search(SearchTarget::parse(&kind)).await;

    tokio::time::sleep(Duration::from_secs(timeout)).await;
    spot.stop().await;
    Ok(())
}

fn run_config(config: Config, generate: bool, output: Option<PathBuf>) -> anyhow::Result<()> {
    if generate {
        let sample = generate_sample_config();
        match output {
            Some(path) => {
                std::fs::write(&path, sample)?;
                println!("Wrote sample configuration to {}", path.display());
            }
            None => print!("{}", sample),
        }
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

fn parse_channel(spec: &str) -> anyhow::Result<Channel> {
    let (id, name) = spec
        .split_once(':')
        .with_context(|| format!("invalid channel spec {:?}, expected ID:NAME", spec))?;
    let id: u32 = id
        .parse()
        .with_context(|| format!("invalid channel id in {:?}", spec))?;
    Ok(Channel::new(id, name))
}
