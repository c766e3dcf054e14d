use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use testdeck::config::{AppConfig, LoggingConfig};
use testdeck::runs::RunStore;

#[derive(Parser)]
#[command(
    name = "testdeck",
    about = "Robot Framework test management daemon: testcases, scenarios, runs and live logs",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file (falls back to $TESTDECK_CONFIG, then
    /// /etc/testdeck/testdeck.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + run executor)
    Serve {
        /// Bind address, overriding the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Inspect run history
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recent runs
    List {
        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one run as JSON
    Show {
        /// Run id
        id: i64,
    },

    /// Print the captured log of a run
    Steps {
        /// Run id
        id: i64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolve the config under a temporary stderr subscriber, so load and
/// fallback events are reported before the configured one exists.
fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || AppConfig::resolve(explicit))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = resolve_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting testdeck daemon");
            testdeck::serve(config).await?;
        }
        Commands::Runs { action } => {
            let pool = testdeck::storage::open_pool(&config.database.path)?;
            let store = RunStore::new(pool);

            match action {
                RunsAction::List { limit } => {
                    let runs = store.list(limit).await?;
                    if runs.is_empty() {
                        println!("No runs found.");
                    } else {
                        println!(
                            "{:<6} | {:<9} | {:<9} | {:<6} | Created",
                            "ID", "Status", "Target", "Ref"
                        );
                        println!("{:-<6}-|-{:-<9}-|-{:-<9}-|-{:-<6}-|-{:-<27}", "", "", "", "", "");
                        for run in runs {
                            let target_id = run.testcase_id.or(run.scenario_id).unwrap_or_default();
                            println!(
                                "{:<6} | {:<9} | {:<9} | {:<6} | {}",
                                run.id,
                                run.status,
                                run.target_type.as_str(),
                                target_id,
                                run.created_at
                            );
                        }
                    }
                }
                RunsAction::Show { id } => match store.get(id).await? {
                    Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
                    None => anyhow::bail!("run {id} not found"),
                },
                RunsAction::Steps { id } => {
                    if store.get(id).await?.is_none() {
                        anyhow::bail!("run {id} not found");
                    }
                    for step in store.list_steps(id, None).await? {
                        println!("{} [{}] {}", step.ts, step.stream.as_str(), step.message);
                    }
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}
