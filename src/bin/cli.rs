//! Lineage CLI - schema lineage graphs from catalog metadata.
//!
//! Usage:
//!   lineage build                        # Nodes, edges, diagnostics
//!   lineage stats                        # Graph statistics
//!   lineage trace dbo.Orders --up 2      # Lineage around a node
//!   lineage path dbo.A dbo.B             # Shortest path
//!   lineage analyze hubs                 # Topology analysis
//!   lineage rules                        # Validated rule set
//!
//! Logs go to stderr (`RUST_LOG` controls the level); results go to stdout
//! as pretty-printed JSON.

use anyhow::{Context, Result};
use clap::Parser;
use lineage::cli::{execute, Cli};

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let output = execute(cli).with_context(|| format!("{:?} failed", cli.command))?;
    let rendered = serde_json::to_string_pretty(&output)?;
    println!("{}", rendered);
    Ok(())
}
