use anyhow::Context;
use clap::{Parser, Subcommand};
use replset_watchdog::config::{Config, ConfigError, SourceConfig};
use replset_watchdog::db::MongoDialer;
use replset_watchdog::pod::create_source;
use replset_watchdog::{metrics, Watchdog};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replset-watchdog")]
#[command(about = "Keeps MongoDB replica set membership in step with orchestrator tasks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watchdog
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/watchdog.toml")]
        config: PathBuf,
        /// MongoDB clusterAdmin username
        #[arg(long, env = "MONGODB_CLUSTER_ADMIN_USER")]
        username: Option<String>,
        /// MongoDB clusterAdmin password
        #[arg(long, env = "MONGODB_CLUSTER_ADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Generate example configuration files
    Config {
        /// Discovery source (dcos or k8s)
        #[arg(short, long)]
        source: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            username,
            password,
        } => {
            run_watchdog(config, username, password).await?;
        }
        Commands::Config { source, output } => {
            generate_config(source, output)?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

async fn run_watchdog(
    config_path: PathBuf,
    username: Option<String>,
    password: Option<String>,
) -> anyhow::Result<()> {
    let mut config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    if let Some(username) = username {
        config.mongodb.username = username;
    }
    if let Some(password) = password {
        config.mongodb.password = password;
    }

    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        framework = %config.discovery.framework_name,
        "Starting replset-watchdog"
    );
    if config.mongodb.credentials().is_none() {
        tracing::warn!("No MongoDB credentials configured, replica set commands may be refused");
    }

    metrics::install(&config.metrics).context("Failed to start metrics exporter")?;

    let source = create_source(&config).context("Failed to create discovery source")?;
    let stop = CancellationToken::new();
    let watchdog = Watchdog::new(
        Arc::new(config),
        source,
        Arc::new(MongoDialer::default()),
        stop.clone(),
    );

    tokio::spawn(shutdown_signal(stop));
    watchdog.run().await.context("Watchdog failed")?;

    info!("Watchdog stopped");
    Ok(())
}

/// Cancel `stop` on SIGINT or SIGTERM
async fn shutdown_signal(stop: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
    stop.cancel();
}

fn generate_config(source: String, output: PathBuf) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", source, output);

    Config::create_example_config(&output, &source).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  replset-watchdog run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Framework: {}", config.discovery.framework_name);
            match &config.discovery.source {
                SourceConfig::Dcos { api_host, .. } => {
                    println!(
                        "  Discovery: DC/OS scheduler {}",
                        api_host.as_deref().unwrap_or("(default)")
                    );
                }
                SourceConfig::Kubernetes {
                    api_url, namespace, ..
                } => {
                    println!("  Discovery: Kubernetes {} namespace {}", api_url, namespace);
                }
            }
            println!(
                "  Voting members: {}..={}",
                config.replset.min_voting_members, config.replset.max_voting_members
            );
            println!("  Max members: {}", config.replset.max_members);
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("replset-watchdog v{}", env!("CARGO_PKG_VERSION"));
    println!("Keeps MongoDB replica set membership in step with orchestrator tasks");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Discovery sources:");
    println!("  • DC/OS SDK scheduler API");
    println!("  • Kubernetes API");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(level = %config.logging.level, format = %config.logging.format, "Logging initialized");
    Ok(())
}
