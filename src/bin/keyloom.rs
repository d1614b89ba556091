//! Command-line entry point.

use std::path::PathBuf;

use clap::Parser;
use keyloom::{KeyloomArgs, KeyloomBuilder};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keyloom")]
#[command(about = "Partitioned explore/exploit block scheduler for external search engines")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment variable prefix
    #[arg(long, default_value = "KEYLOOM")]
    env_prefix: String,

    /// Print Prometheus metrics to stdout on exit
    #[arg(long)]
    print_metrics: bool,

    #[command(flatten)]
    keyloom: KeyloomArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut builder = KeyloomBuilder::new();
    if let Some(ref path) = cli.config {
        builder = builder.file(path);
    }
    let registry = Registry::new();
    let supervisor = builder
        .env_prefix(&cli.env_prefix)
        .with_cli_args(&cli.keyloom)
        .prometheus_registry(registry.clone())
        .build()?;

    info!(
        keyspace = %supervisor.keyspace(),
        devices = ?supervisor.config().devices,
        "starting keyloom, press Ctrl-C to stop"
    );
    let summary = supervisor.run_until_ctrl_c().await?;
    for report in &summary.workers {
        info!(
            worker = report.worker,
            device = %report.device,
            probes = report.probes,
            hits = report.hits,
            exhausted = report.exhausted,
            "worker summary"
        );
    }

    if cli.print_metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        print!("{}", String::from_utf8_lossy(&buffer));
    }
    Ok(())
}
