//! lokiload CLI - load generator for Loki-compatible log backends
//!
//! Usage:
//!   lokiload run [OPTIONS]       Run the configured scenarios
//!   lokiload sample [OPTIONS]    Print a generated push batch and queries
//!
//! Examples:
//!   lokiload run --config load.yaml
//!   lokiload run --url http://loki:3100 --vus 20 --duration 5m
//!   lokiload sample --queries 10

use clap::{Args, Parser, Subcommand};
use lokiload::cli::{Config, ConfigError};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lokiload")]
#[command(author, version, about = "Load generator for Loki-compatible log backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command; they override the configuration file
#[derive(Args)]
struct ConfigArgs {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "LOKILOAD_CONFIG")]
    config: Option<String>,

    /// Base URL of the backend, optionally with user:password credentials
    #[arg(long, env = "LOKILOAD_URL")]
    url: Option<String>,

    /// Tenant sent as X-Scope-OrgID
    #[arg(long, env = "LOKILOAD_TENANT")]
    tenant: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Seed for reproducible workloads
    #[arg(long, env = "LOKILOAD_SEED")]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured scenarios against the backend
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Override the VU count of every scenario
        #[arg(long)]
        vus: Option<usize>,

        /// Override the duration of every scenario (e.g. 30s, 5m)
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,

        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,

        /// Print the final statistics as JSON instead of text
        #[arg(long)]
        summary_json: bool,
    },
    /// Print a generated push batch and read queries without sending them
    Sample {
        #[command(flatten)]
        config: ConfigArgs,

        /// Number of read queries to render
        #[arg(long, default_value = "5")]
        queries: usize,

        /// Print the full push body instead of an outline
        #[arg(long)]
        body: bool,
    },
}

fn build_config(args: ConfigArgs) -> Result<Config, ConfigError> {
    let mut config = if let Some(path) = args.config {
        Config::from_file(&path)?
    } else {
        Config::default()
    };

    // Override with CLI arguments
    if let Some(url) = args.url {
        config.target.url = url;
    }
    if let Some(tenant) = args.tenant {
        config.target.tenant = Some(tenant);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.target.timeout_ms = timeout_ms;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("lokiload=info".parse().unwrap());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            vus,
            duration,
            json_logs,
            summary_json,
        } => {
            init_tracing(json_logs);

            let mut config = build_config(config)?;
            for scenario in &mut config.scenarios {
                if let Some(vus) = vus {
                    scenario.vus = vus;
                }
                if duration.is_some() {
                    scenario.duration = duration;
                }
            }

            let snapshot = lokiload::cli::run_load(config).await?;
            if summary_json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", lokiload::cli::format_summary(&snapshot));
            }
        }
        Commands::Sample {
            config,
            queries,
            body,
        } => {
            let config = build_config(config)?;
            print!("{}", lokiload::cli::sample(&config, queries, body)?);
        }
    }

    Ok(())
}
