//! Command-line interface for the kiosk.
//!
//! Without a subcommand the binary runs the scan screen. Subcommands work on
//! the same local database and backend:
//! - `resolve <payload>` - Resolve one card UID or scanned code
//! - `session show|clear` - Inspect or end the stored session
//! - `device show|bind|unbind` - Manage the kiosk's device MAC binding
//! - `records` / `overview` - Fetch patient records with the stored session
//! - `scans` - Show recent scan outcomes
//! - `config check` - Validate configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::{AuthResult, RawCredential};
use crate::config::Config;
use crate::navigation::Navigator;
use crate::records::Resource;
use crate::KioskState;

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "medscreen")]
#[command(author, version, about = "Card and QR authentication for bedside kiosks", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "medscreen.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Hospital API base URL, overriding `backend.base_url`
    #[arg(long, env = "MEDSCREEN_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Subcommand to run (if none, starts the scan screen)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a single credential without the reader
    Resolve {
        /// Scanned code, or card UID with --card
        payload: String,
        /// Treat the payload as an NFC card UID
        #[arg(long)]
        card: bool,
    },

    /// Stored session commands
    #[command(subcommand)]
    Session(SessionCommands),

    /// Device binding commands
    #[command(subcommand)]
    Device(DeviceCommands),

    /// List one kind of record for a patient
    Records {
        #[arg(value_enum)]
        resource: Resource,
        /// Patient ID
        #[arg(short, long)]
        patient: String,
    },

    /// Fetch every readable record kind for a patient
    Overview {
        /// Patient ID
        #[arg(short, long)]
        patient: String,
    },

    /// Show recent scan outcomes
    Scans {
        /// Number of entries to show (default: 20)
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Show the logged-in user
    Show,
    /// Log out, keeping the device binding
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum DeviceCommands {
    /// Show the MAC this kiosk identifies as
    Show,
    /// Store the MAC this kiosk identifies as
    Bind {
        /// MAC address, e.g. AA:BB:CC:DD:EE:FF
        mac: String,
    },
    /// Remove the stored binding
    Unbind,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Load the configuration file and apply command-line overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config)?;
    if let Some(url) = &cli.backend_url {
        config.backend.base_url = url.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

// ============================================================================
// CLI Command Handlers
// ============================================================================

/// Run a CLI command
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Resolve { payload, card }) => cmd_resolve(cli, payload, *card).await,
        Some(Commands::Session(SessionCommands::Show)) => cmd_session_show(cli).await,
        Some(Commands::Session(SessionCommands::Clear)) => cmd_session_clear(cli).await,
        Some(Commands::Device(DeviceCommands::Show)) => cmd_device_show(cli).await,
        Some(Commands::Device(DeviceCommands::Bind { mac })) => cmd_device_bind(cli, mac).await,
        Some(Commands::Device(DeviceCommands::Unbind)) => cmd_device_unbind(cli).await,
        Some(Commands::Records { resource, patient }) => cmd_records(cli, *resource, patient).await,
        Some(Commands::Overview { patient }) => cmd_overview(cli, patient).await,
        Some(Commands::Scans { limit }) => cmd_scans(cli, *limit).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli).await,
        None => {
            // No subcommand means run the scan screen - this is handled in main.rs
            Ok(())
        }
    }
}

async fn open_state(cli: &Cli) -> Result<KioskState> {
    KioskState::init(load_config(cli)?).await
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode output")?
    );
    Ok(())
}

/// Resolve one credential the way the scan screen would
async fn cmd_resolve(cli: &Cli, payload: &str, card: bool) -> Result<()> {
    let state = open_state(cli).await?;
    let navigator = Navigator::new(&state.config.gate);

    let credential = if card {
        RawCredential::card(payload)
    } else {
        RawCredential::code(payload)
    };

    let result = state.resolver.resolve(&credential).await;
    if let AuthResult::Authenticated { token, user } = &result {
        state.sessions.save(token, user).await?;
    }

    let decision = navigator.decide(&result);
    if let Err(e) = state
        .scan_log
        .record(
            credential.kind(),
            result.kind(),
            decision.notice.as_ref().map(|n| n.message.as_str()),
        )
        .await
    {
        tracing::warn!(error = %e, "Failed to record scan outcome");
    }

    println!("Outcome: {}", result.kind());
    print_json(&decision)?;
    Ok(())
}

async fn cmd_session_show(cli: &Cli) -> Result<()> {
    let state = open_state(cli).await?;

    match state.sessions.load().await? {
        Some(session) => {
            println!();
            println!("=== Session ===");
            println!();
            println!("User:        {} ({})", session.user.display_name, session.user.id);
            println!("Role:        {}", session.user.role);
            if let Some(code) = &session.user.staff_code {
                println!("Staff code:  {}", code);
            }
            println!("Issued:      {}", session.issued_at.to_rfc3339());
            println!(
                "Expires:     {}",
                session
                    .expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!();
        }
        None => println!("No active session."),
    }
    Ok(())
}

async fn cmd_session_clear(cli: &Cli) -> Result<()> {
    let state = open_state(cli).await?;
    state.sessions.clear().await?;
    println!("[OK] Session cleared.");
    Ok(())
}

async fn cmd_device_show(cli: &Cli) -> Result<()> {
    let state = open_state(cli).await?;

    match state.sessions.bound_device_mac().await? {
        Some(mac) => println!("Device MAC:  {} (bound)", mac),
        None => match &state.config.device.mac {
            Some(mac) => println!("Device MAC:  {} (from configuration)", mac),
            None => {
                println!("No device MAC configured.");
                println!("Patient assignment codes cannot be used until one is bound.");
            }
        },
    }
    Ok(())
}

async fn cmd_device_bind(cli: &Cli, mac: &str) -> Result<()> {
    let state = open_state(cli).await?;
    state.sessions.bind_device(mac).await?;
    let bound = state.sessions.bound_device_mac().await?.unwrap_or_default();
    println!("[OK] Device bound to {}", bound);
    Ok(())
}

async fn cmd_device_unbind(cli: &Cli) -> Result<()> {
    let state = open_state(cli).await?;
    state.sessions.unbind_device().await?;
    println!("[OK] Device binding removed.");
    Ok(())
}

async fn cmd_records(cli: &Cli, resource: Resource, patient: &str) -> Result<()> {
    let state = open_state(cli).await?;
    let items = state.records().fetch_for_patient(resource, patient).await?;

    if items.is_empty() {
        println!("No {} found for patient {}.", resource.path(), patient);
        return Ok(());
    }
    print_json(&items)
}

async fn cmd_overview(cli: &Cli, patient: &str) -> Result<()> {
    let state = open_state(cli).await?;
    let overview = state.records().overview(patient).await?;
    print_json(&overview)
}

async fn cmd_scans(cli: &Cli, limit: i64) -> Result<()> {
    let state = open_state(cli).await?;
    let entries = state.scan_log.recent(limit).await?;

    if entries.is_empty() {
        println!("No scans recorded.");
        return Ok(());
    }

    println!();
    println!("{:<27} {:<6} {:<22} DETAIL", "TIME", "KIND", "OUTCOME");
    println!("{}", "-".repeat(90));
    for entry in entries {
        println!(
            "{:<27} {:<6} {:<22} {}",
            entry.created_at,
            entry.credential_kind,
            entry.outcome,
            entry.detail.as_deref().unwrap_or("-")
        );
    }
    println!();
    Ok(())
}

/// Validate configuration file
async fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the kiosk.");
        println!("To create a custom configuration, copy medscreen.example.toml to medscreen.toml");
        return Ok(());
    }

    match load_config(cli) {
        Ok(config) => {
            println!("[OK] Configuration file parsed.");
            println!();
            println!("=== Configuration Summary ===");
            println!();
            println!("Backend:");
            println!("  Base URL:     {}", config.backend.base_url);
            println!("  Timeout:      {}s", config.backend.timeout_secs);
            println!();
            println!("Device:");
            println!("  MAC:          {}", config.device.mac.as_deref().unwrap_or("-"));
            println!("  Data Dir:     {}", config.device.data_dir.display());
            println!();
            println!("Reader:");
            println!("  Kind:         {:?}", config.reader.kind);
            println!("  Mode:         {:?}", config.reader.mode);
            if let Some(path) = &config.reader.device_path {
                println!("  Device:       {}", path.display());
            }
            println!();
            println!("Scanning:");
            println!("  Cooldown:     {}ms", config.gate.error_cooldown_ms);
            println!(
                "  Retries:      {} every {}s",
                config.gate.max_network_retries, config.gate.network_retry_secs
            );
            println!(
                "  Metrics:      {}",
                config
                    .metrics
                    .listen
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| "Disabled".to_string())
            );
            println!();

            let problems = config.validate();
            if problems.is_empty() {
                return Ok(());
            }

            println!("Problems:");
            for problem in &problems {
                println!("  [!] {}", problem);
            }
            println!();
            anyhow::bail!("{} configuration problem(s) found", problems.len());
        }
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            println!();
            println!("Please check the configuration file syntax and try again.");
            anyhow::bail!("Invalid configuration file");
        }
    }
}
