//! mesh-orchestrator binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use mesh_core::{GenerateRequest, LoggingConfig, OrchestratorConfig};
use mesh_orchestrator::Orchestrator;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mesh-orchestrator")]
#[command(about = "Health-aware request orchestrator for inference nodes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the configured one when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the probe loop until interrupted, logging node stats periodically
    Serve {
        /// Seconds between stats log lines
        #[arg(long, default_value_t = 60)]
        stats_interval: u64,
    },
    /// Send one generate request and print the result as JSON
    Generate {
        /// Model identifier
        #[arg(short, long)]
        model: String,

        /// Prompt text
        #[arg(short, long)]
        prompt: String,

        /// Request a streamed reply
        #[arg(long)]
        stream: bool,

        /// Total attempts, overrides max_retries from the configuration
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Probe every node once and print per-node stats as JSON
    Stats,
    /// Generate default configuration
    Config {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => generate_config(output),
        Commands::Validate => validate_config(cli.config),
        Commands::Serve { stats_interval } => {
            let config = load_config(cli.config.as_ref(), cli.log_level.as_deref())?;
            serve(config, Duration::from_secs(stats_interval.max(1))).await
        }
        Commands::Generate {
            model,
            prompt,
            stream,
            max_retries,
        } => {
            let config = load_config(cli.config.as_ref(), cli.log_level.as_deref())?;
            let mut request = GenerateRequest::new(model, prompt).with_stream(stream);
            if let Some(max_retries) = max_retries {
                request = request.with_max_retries(max_retries);
            }
            generate(config, request).await
        }
        Commands::Stats => {
            let config = load_config(cli.config.as_ref(), cli.log_level.as_deref())?;
            print_stats(config).await
        }
    }
}

fn load_config(path: Option<&PathBuf>, log_level: Option<&str>) -> anyhow::Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::load(path.map(PathBuf::as_path))
        .context("Failed to load configuration")?;

    if let Some(level) = log_level {
        config.logging.level = level.to_string();
    }
    init_logging(&config.logging);

    if let Some(path) = path {
        info!("Loaded configuration from: {}", path.display());
    } else {
        info!("Using default configuration");
    }

    Ok(config)
}

/// Initialize logging and tracing
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }
}

async fn serve(config: OrchestratorConfig, stats_interval: Duration) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    orchestrator.start().await?;

    let mut ticker = tokio::time::interval(stats_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                for (name, stats) in orchestrator.stats() {
                    info!(
                        node = %name,
                        status = %stats.status,
                        active = stats.active_requests,
                        total = stats.total_requests,
                        failures = stats.failures,
                        avg_latency_ms = ?stats.avg_latency_ms,
                        load_score = ?stats.load_score,
                        "Node stats"
                    );
                }
            }
        }
    }

    orchestrator.stop().await;
    Ok(())
}

async fn generate(config: OrchestratorConfig, request: GenerateRequest) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    orchestrator.start().await?;

    let outcome = orchestrator.generate(request).await;
    orchestrator.stop().await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn print_stats(config: OrchestratorConfig) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    orchestrator.probe_now().await;

    println!("{}", serde_json::to_string_pretty(&orchestrator.stats())?);
    Ok(())
}

fn generate_config(output: Option<PathBuf>) -> anyhow::Result<()> {
    let config = OrchestratorConfig::default();

    if let Some(output_path) = output {
        config.to_file(&output_path)?;
        println!("Generated configuration file: {}", output_path.display());
    } else {
        let yaml = serde_yaml::to_string(&config).context("Failed to serialize config")?;
        println!("{}", yaml);
    }

    Ok(())
}

fn validate_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path.context("--config is required for validate")?;
    println!("Validating configuration: {}", path.display());

    match OrchestratorConfig::load(Some(path.as_path())) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  Nodes: {}", config.nodes.len());
            for node in &config.nodes {
                println!(
                    "    {} ({}, priority {}, {})",
                    node.name,
                    node.transport,
                    node.priority,
                    if node.locally_managed {
                        "locally managed"
                    } else {
                        "remote"
                    }
                );
            }
            println!("  Probe interval: {}s", config.probe_interval_seconds);
            println!("  Max attempts: {}", config.max_retries);
            Ok(())
        }
        Err(e) => {
            println!("Configuration is invalid: {}", e);
            std::process::exit(1);
        }
    }
}
