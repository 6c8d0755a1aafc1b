//! Courier CLI - Command-line interface for the courier runtime
//!
//! Provides subcommands for initializing a runtime configuration, serving a
//! runtime over NDJSON/TCP, and dispatching to or inspecting a served runtime.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier::runtime::message::parse_compact;
use courier::service::{NdjsonTransport, Service};
use courier::{Runtime, RuntimeConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Pattern-matched action dispatcher", long_about = None)]
struct Cli {
    /// Root directory for runtime storage
    #[arg(short, long, default_value = ".courier")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new runtime configuration
    Init {
        /// Default action deadline in milliseconds
        #[arg(long, default_value = "22000")]
        timeout_ms: u64,

        /// Maximum nested act/prior depth
        #[arg(long, default_value = "33")]
        max_depth: usize,

        /// Reject ambiguous overlapping registrations
        #[arg(long)]
        strict_add: bool,
    },

    /// Serve the runtime over NDJSON/TCP
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7430")]
        listen: String,
    },

    /// Dispatch a message to a served runtime
    Act {
        /// Address of the service
        #[arg(short, long, default_value = "127.0.0.1:7430")]
        connect: String,

        /// Message in compact form, e.g. `role:courier,cmd:ping`
        message: String,
    },

    /// List the patterns of a served runtime
    List {
        /// Address of the service
        #[arg(short, long, default_value = "127.0.0.1:7430")]
        connect: String,

        /// Partial pattern restricting the listing
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            timeout_ms,
            max_depth,
            strict_add,
        } => {
            let root = cli.root.clone();
            let config = RuntimeConfig {
                root: cli.root,
                timeout_ms,
                max_depth,
                strict_add,
                ..RuntimeConfig::default()
            };

            Runtime::init(config)?;
            println!("Initialized courier runtime at {:?}", root);
        }

        Commands::Serve { listen } => {
            let runtime = Runtime::load_or_default(&cli.root)?;
            Service::new(runtime.root())
                .listen(listen.as_str())
                .await
                .context("service stopped")?;
        }

        Commands::Act { connect, message } => {
            let message = parse_compact(&message)?;
            let client = NdjsonTransport::connect(connect.as_str(), "courier-cli").await?;
            let result = client.act(message).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::List { connect, query } => {
            let client = NdjsonTransport::connect(connect.as_str(), "courier-cli").await?;
            let patterns = client.list(query.as_deref()).await?;
            if patterns.is_empty() {
                println!("No actions registered");
            } else {
                for pattern in patterns {
                    println!("{}", pattern);
                }
            }
        }
    }

    Ok(())
}
