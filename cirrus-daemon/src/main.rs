//! Cirrus Daemon - instance attestation host
//!
//! Loads roles from the configuration file, keeps replay counters in SQLite
//! and sweeps expired counters in the background.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use cirrus_attest::{AttemptStore, AttestError, Attestor, InstanceId, SystemClock};
use cirrus_daemon::{
    instance_from_provider, spawn_sweeper, sweep_once, Config, SqliteAttemptStore,
};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// Cirrus Daemon - Instance attestation service
#[derive(Parser)]
#[command(name = "cirrus-daemon", version, about)]
struct Cli {
    /// Configuration file (default: <config dir>/cirrus/config.toml)
    #[arg(long, global = true, env = "CIRRUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the attempt sweeper until interrupted (default if no command given)
    Serve,

    /// Attest a provider server record against a role
    Attest {
        /// Role name
        #[arg(long)]
        role: String,

        /// Provider server record (JSON)
        #[arg(long)]
        instance: PathBuf,

        /// Address the login request came from (repeatable)
        #[arg(long = "addr", required = true)]
        addrs: Vec<String>,
    },

    /// Remove expired attempt counters now
    Sweep,

    /// List persisted attempt counters
    Attempts {
        /// Show a single instance
        #[arg(long)]
        instance_id: Option<String>,
    },

    /// Load and validate the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);

    match cli.command {
        Some(Commands::Serve) | None => cmd_serve(&config_path).await,
        Some(Commands::Attest {
            role,
            instance,
            addrs,
        }) => cmd_attest(&config_path, &role, &instance, &addrs).await,
        Some(Commands::Sweep) => cmd_sweep(&config_path).await,
        Some(Commands::Attempts { instance_id }) => {
            cmd_attempts(&config_path, instance_id.as_deref()).await
        }
        Some(Commands::CheckConfig) => cmd_check_config(&config_path),
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

async fn open_store(config: &Config) -> anyhow::Result<SqliteAttemptStore> {
    let db_path = config.attempts_db_path();
    tracing::debug!(path = %db_path.display(), "Opening attempt database");
    SqliteAttemptStore::open(&db_path)
        .await
        .with_context(|| format!("Failed to open attempt database {}", db_path.display()))
}

/// Run the sweeper until SIGINT/SIGTERM.
async fn cmd_serve(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = Arc::new(open_store(&config).await?);

    tracing::info!(
        roles = config.roles.len(),
        db = %config.attempts_db_path().display(),
        "Daemon started"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let sweeper = spawn_sweeper(store, SystemClock, config.sweep_interval, shutdown_rx);

    wait_for_shutdown().await;
    let _ = shutdown_tx.send(());

    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Sweeper task panicked");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

/// Attest one provider record; exits non-zero on denial.
async fn cmd_attest(
    config_path: &Path,
    role_name: &str,
    instance_path: &Path,
    addrs: &[String],
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let role = config
        .role(role_name)
        .with_context(|| format!("Unknown role {:?}", role_name))?;

    let raw = std::fs::read_to_string(instance_path)
        .with_context(|| format!("Failed to read {}", instance_path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", instance_path.display()))?;
    let instance = instance_from_provider(&value)?;

    let attestor = Attestor::new(open_store(&config).await?);

    match attestor.attest(&instance, role, addrs).await {
        Ok(attestation) => {
            tracing::info!(
                instance_id = %attestation.instance_id(),
                role = attestation.role(),
                attempt = attestation.attempt(),
                "Attestation succeeded"
            );
            let output = serde_json::json!({
                "instance_id": attestation.instance_id(),
                "role": attestation.role(),
                "policies": attestation.policies(),
                "ttl_secs": attestation.ttl().as_secs(),
                "max_ttl_secs": attestation.max_ttl().as_secs(),
                "age_secs": attestation.age().as_secs(),
                "attempt": attestation.attempt(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e @ AttestError::Storage(_)) => {
            tracing::error!(
                instance_id = %instance.id,
                role = role_name,
                error = %e,
                "Attestation storage failure"
            );
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!(
                instance_id = %instance.id,
                role = role_name,
                error = %e,
                "Attestation denied"
            );
            Err(e.into())
        }
    }
}

async fn cmd_sweep(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;

    let removed = sweep_once(&store, &SystemClock).await?;
    println!("Removed {} expired auth attempt(s)", removed);
    Ok(())
}

async fn cmd_attempts(config_path: &Path, instance_id: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;

    let attempts = match instance_id {
        Some(id) => {
            let id = InstanceId::new(id);
            let now = chrono::Utc::now();
            match store.get(&id, now).await? {
                Some(attempt) => vec![(id, attempt)],
                None => vec![],
            }
        }
        None => store.list().await?,
    };

    if attempts.is_empty() {
        println!("No auth attempts recorded");
        return Ok(());
    }

    for (id, attempt) in attempts {
        println!(
            "{}  count={}  expires={}",
            id,
            attempt.count,
            attempt.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

fn cmd_check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    println!("Configuration OK: {}", config_path.display());
    println!("  sweep interval: {:?}", config.sweep_interval);
    for role in &config.roles {
        println!(
            "  role {}: auth_limit={} period={:?} prefixes={}",
            role.name,
            role.auth_limit,
            role.period,
            role.trusted_prefixes.len()
        );
    }
    Ok(())
}
