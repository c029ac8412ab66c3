//! Polaris - mobile network measurement agent
//!
//! Periodically records the serving cell's radio parameters together with
//! throughput, latency, DNS, web and SMS probe results, stores them locally
//! and uploads them to the collection backend.

mod assembler;
mod completion;
mod config;
mod credentials;
mod jobs;
mod location;
mod network_monitor;
mod output;
mod radio;
mod scheduler;
mod storage;
mod sync;
mod testing;
mod utils;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use credentials::{CredentialProvider, CredentialStore};
use jobs::Agent;
use output::OutputManager;
use radio::RadioReader;
use radio::mmcli::ModemManagerTelephony;
use scheduler::Scheduler;
use storage::Database;
use sync::SyncOutcome;
use testing::sms::ModemManagerSms;

#[derive(Parser, Debug)]
#[command(name = "polaris")]
#[command(version)]
#[command(about = "Mobile network measurement agent", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "polaris.conf")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the measurement and sync schedule until interrupted (default)
    Run,
    /// Take one measurement and print it
    Once,
    /// Upload unsynced measurements now
    Sync,
    /// Show stored measurement counts and the latest rows
    Status {
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },
    /// List active SIMs
    Sims,
    /// Log in and store the access token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored access token
    Logout,
    /// Inspect or change preferences
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Set the sync interval, or the measurement interval with --measurement
    SetInterval {
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        minutes: u64,
        #[arg(long)]
        measurement: bool,
    },
    /// Enable or disable a probe (upload, download, ping, dns, web, sms)
    SetTest { name: String, enabled: bool },
    /// Set a probe target, e.g. `ping_host 1.1.1.1`
    SetTarget { name: String, value: String },
    /// Select the SIM slot to measure
    SetSim { slot: u32 },
    /// Print the effective configuration
    Show,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_or_default(&args.config)?;
    init_tracing(&config.logging.level);

    let command = args.command.unwrap_or(Command::Run);
    match command {
        Command::Config { action } => run_config(&args.config, config, action),
        Command::Login { email, password } => run_login(&config, &email, &password).await,
        Command::Logout => {
            CredentialStore::open(&config.general.credentials_path)?.clear()?;
            println!("Logged out");
            Ok(())
        }
        Command::Sims => {
            let reader = RadioReader::new(Arc::new(ModemManagerTelephony));
            let subscriptions = reader.subscriptions().await?;
            let text = OutputManager::new().render_subscriptions(&subscriptions);
            println!("{}", text.trim_end());
            Ok(())
        }
        Command::Status { limit } => run_status(&config, limit),
        Command::Once => {
            let agent = build_agent(&args.config, &config)?;
            agent.measure(&config).await?;
            Ok(())
        }
        Command::Sync => {
            let agent = build_agent(&args.config, &config)?;
            match agent.sync(&config).await? {
                SyncOutcome::Synced(n) => println!("Uploaded {n} measurements"),
                SyncOutcome::NothingToSync => println!("Nothing to sync"),
                SyncOutcome::Skipped(reason) => println!("Sync skipped: {reason:?}"),
            }
            Ok(())
        }
        Command::Run => run_daemon(&args.config, config).await,
    }
}

fn open_database(config: &Config) -> Result<Arc<Database>> {
    let db = Database::new(&config.general.database_path)?;
    db.initialize()?;
    info!("Database: {:?}", config.general.database_path);
    Ok(Arc::new(db))
}

fn build_agent_with(
    config_path: &Path,
    config: &Config,
    credentials: Arc<CredentialStore>,
) -> Result<Arc<Agent>> {
    Ok(Arc::new(Agent {
        config_path: config_path.to_path_buf(),
        store: open_database(config)?,
        credentials,
        telephony: Arc::new(ModemManagerTelephony),
        sms: Arc::new(ModemManagerSms::new()),
        output: OutputManager::new(),
    }))
}

fn build_agent(config_path: &Path, config: &Config) -> Result<Arc<Agent>> {
    let credentials = Arc::new(CredentialStore::open(&config.general.credentials_path)?);
    build_agent_with(config_path, config, credentials)
}

async fn run_daemon(config_path: &Path, config: Config) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    info!("Polaris v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {:?}", config_path);

    let credentials = Arc::new(CredentialStore::open(&config.general.credentials_path)?);
    if credentials.token().is_none() {
        warn!("Not logged in; measurements will be stored but not uploaded");
    }
    let agent = build_agent_with(config_path, &config, Arc::clone(&credentials))?;

    let scheduler = Scheduler::new(Arc::new(network_monitor::DefaultRouteCheck::new()));
    jobs::register(&scheduler, &agent, &config);

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    info!("Running (Ctrl+C to stop, SIGHUP to reload)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            _ = hangup.recv() => {
                info!("Reloading configuration and credentials");
                if let Err(e) = credentials.reload() {
                    warn!("Failed to reload credentials: {e:#}");
                }
                jobs::register(&scheduler, &agent, &agent.config());
            }
        }
    }

    scheduler.shutdown();
    Ok(())
}

async fn run_login(config: &Config, email: &str, password: &str) -> Result<()> {
    let http = utils::http_client(Duration::from_secs(config.backend.request_timeout_s))?;
    let response = sync::login(&http, &config.backend.base_url, email, password).await?;
    let email = response.email.as_deref().unwrap_or(email);

    CredentialStore::open(&config.general.credentials_path)?.set(&response.token, email)?;
    println!("Logged in as {email}");
    Ok(())
}

fn run_status(config: &Config, limit: usize) -> Result<()> {
    let db = open_database(config)?;
    let credentials = CredentialStore::open(&config.general.credentials_path)?;
    let owner = credentials.email().unwrap_or_default();

    let (total, unsynced) = db.counts(&owner)?;
    let recent = db.recent(&owner, limit)?;
    print!(
        "{}",
        OutputManager::new().render_status(&owner, total, unsynced, &recent)
    );
    Ok(())
}

fn run_config(path: &Path, mut config: Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        ConfigAction::SetInterval {
            minutes,
            measurement,
        } => {
            if measurement {
                config.schedule.measurement_interval_min = minutes;
            } else {
                config.schedule.sync_interval_min = minutes;
            }
        }
        ConfigAction::SetTest { name, enabled } => {
            if !config.tests.set(&name, enabled) {
                bail!("Unknown test: {name}");
            }
        }
        ConfigAction::SetTarget { name, value } => config.targets.set(&name, &value)?,
        ConfigAction::SetSim { slot } => config.sim.slot = slot,
    }

    config.save(path)?;
    println!("Saved {:?}; send SIGHUP to a running daemon to apply", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from(["polaris"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.config, PathBuf::from("polaris.conf"));

        let args = Args::try_parse_from(["polaris", "-c", "x.conf", "config", "set-interval", "30"])
            .unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Config {
                action: ConfigAction::SetInterval {
                    minutes: 30,
                    measurement: false
                }
            })
        ));

        assert!(Args::try_parse_from(["polaris", "config", "set-interval", "0"]).is_err());
        assert!(Args::try_parse_from(["polaris", "login", "--email", "a@b.c"]).is_err());
    }

    #[test]
    fn test_config_actions_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polaris.conf");

        let apply = |action| run_config(&path, Config::load_or_default(&path).unwrap(), action);
        apply(ConfigAction::SetInterval {
            minutes: 45,
            measurement: false,
        })
        .unwrap();
        apply(ConfigAction::SetTest {
            name: "sms".into(),
            enabled: false,
        })
        .unwrap();
        apply(ConfigAction::SetSim { slot: 1 }).unwrap();
        assert!(apply(ConfigAction::SetTest {
            name: "traceroute".into(),
            enabled: true
        })
        .is_err());

        let saved = Config::load(&path).unwrap();
        assert_eq!(saved.schedule.sync_interval_min, 45);
        assert!(!saved.tests.sms);
        assert_eq!(saved.sim.slot, 1);
    }
}
