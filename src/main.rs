use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use pipedash::client::RelayClient;
use pipedash::config::Config;
use pipedash::envelope::EnvelopeSubmission;
use pipedash::relay::RelayHub;
use pipedash::{http, logging, metrics, relay, schema};

#[derive(Parser)]
#[command(name = "pipedash")]
#[command(about = "Relay and dashboard feed for pipeline telemetry envelopes")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay and the dashboard feed
    Serve {
        /// Host for the dashboard feed
        #[arg(long)]
        host: Option<String>,
        /// Port for the dashboard feed
        #[arg(long)]
        port: Option<u16>,
        /// TCP port pipeline processes connect to
        #[arg(long)]
        relay_port: Option<u16>,
    },
    /// Check an envelope JSON file against the wire contract
    Validate {
        /// Path to the envelope JSON file to validate
        path: PathBuf,

        /// Optional path to a schema file (defaults to the built-in contract)
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Send an envelope file to a running relay
    Send {
        /// Path to the envelope JSON file to send
        path: PathBuf,

        /// Relay address
        #[arg(long, default_value = "127.0.0.1:9000")]
        addr: String,

        /// Wait for this many pushed envelopes before exiting
        #[arg(long, default_value_t = 0)]
        wait: usize,
    },
}

fn load_json(path: &Path) -> Result<Value> {
    let data =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let json: Value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
    Ok(json)
}

async fn serve(host: Option<String>, port: Option<u16>, relay_port: Option<u16>) -> Result<()> {
    metrics::init_metrics();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(host) = host {
        config.http.host = host;
    }
    if let Some(port) = port {
        config.http.port = port;
    }
    if let Some(port) = relay_port {
        config.relay.port = port;
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.relay.port))
        .await
        .with_context(|| format!("Failed to bind relay port {}", config.relay.port))?;
    let http_addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid dashboard feed address {}:{}",
                config.http.host, config.http.port
            )
        })?;

    println!("🚀 Starting pipedash...");
    println!("🔌 Relay accepting pipelines on 0.0.0.0:{}", config.relay.port);

    let hub = RelayHub::new(config.relay.recent_limit);

    tokio::select! {
        result = relay::serve(listener, hub.clone(), config.relay.max_frame_len) => {
            result.context("Relay server failed")?;
        }
        result = http::start_server(hub.clone(), http_addr) => {
            result.context("Dashboard feed failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            println!("👋 Shutting down");
        }
    }

    Ok(())
}

fn validate(path: &Path, schema_path: Option<&Path>) -> Result<()> {
    let instance = load_json(path)?;

    let violations = match schema_path {
        Some(schema_path) => {
            let schema_json = load_json(schema_path)?;
            // jsonschema 0.17 expects a schema with 'static lifetime; leak
            // the parsed schema for CLI lifetime
            let schema_static: &'static Value = Box::leak(Box::new(schema_json));
            let compiled = jsonschema::JSONSchema::options()
                .compile(schema_static)
                .context("Failed to compile JSON Schema")?;
            schema::check_with(&compiled, &instance)
        }
        None => schema::check(&instance),
    };
    if !violations.is_empty() {
        eprintln!("invalid:");
        for violation in &violations {
            eprintln!("- {}", violation);
        }
        std::process::exit(1);
    }

    // The schema and the in-code checks must agree; run both so a drift
    // between them shows up here first.
    match EnvelopeSubmission::from_value(instance).and_then(EnvelopeSubmission::validate) {
        Ok(envelope) => {
            println!("valid");
            println!(
                "📦 {} envelope '{}' ({})",
                envelope.kind(),
                envelope.name(),
                envelope.uuid()
            );
            Ok(())
        }
        Err(error) => {
            eprintln!("invalid:");
            eprintln!("- {}", error);
            std::process::exit(1)
        }
    }
}

async fn send(path: &Path, addr: &str, wait: usize) -> Result<()> {
    let instance = load_json(path)?;
    let envelope = EnvelopeSubmission::from_value(instance)
        .and_then(EnvelopeSubmission::validate)
        .context("Envelope file failed validation")?;

    let mut client = RelayClient::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to relay at {}", addr))?;
    client
        .send(&envelope)
        .await
        .context("Failed to send envelope")?;
    println!(
        "✅ Sent {} envelope '{}' to {}",
        envelope.kind(),
        envelope.name(),
        addr
    );

    for _ in 0..wait {
        match client
            .recv()
            .await
            .context("Failed while waiting for pushed envelopes")?
        {
            Some(pushed) => {
                println!("📨 {}", serde_json::to_string_pretty(&pushed)?);
            }
            None => {
                println!("👋 Relay closed the connection");
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            relay_port,
        } => serve(host, port, relay_port).await?,
        Commands::Validate { path, schema } => validate(&path, schema.as_deref())?,
        Commands::Send { path, addr, wait } => send(&path, &addr, wait).await?,
    }

    Ok(())
}
