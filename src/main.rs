use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medscreen::api::metrics::install_exporter;
use medscreen::cli::{load_config, run_command, Cli};
use medscreen::config::Config;
use medscreen::engine::ScanScreen;
use medscreen::reader::detect_reader;
use medscreen::KioskState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = load_config(&cli)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if cli.command.is_some() {
        return run_command(&cli).await;
    }

    run_kiosk(config).await
}

/// Run the scan screen until a shutdown signal arrives
async fn run_kiosk(config: Config) -> Result<()> {
    tracing::info!("Starting medscreen v{}", env!("CARGO_PKG_VERSION"));

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!(problem = %problem, "Configuration problem");
        }
        anyhow::bail!("Invalid configuration, run `medscreen config check` for details");
    }

    if let Some(listen) = config.metrics.listen {
        install_exporter(listen)?;
    }

    let state = KioskState::init(config).await?;
    match state.sessions.device_mac().await? {
        Some(mac) => tracing::info!(device_mac = %mac, "Device identity"),
        None => tracing::warn!("No device MAC bound. Patient assignment codes will be rejected."),
    }

    let reader = detect_reader(&state.config.reader);
    let (screen, mut events) = ScanScreen::new(
        reader,
        state.resolver.clone(),
        state.sessions.clone(),
        Some(state.scan_log.clone()),
        &state.config,
    );

    // Screen events go to stdout as JSON lines for the display process
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Failed to encode screen event"),
            }
        }
    });

    screen.focus().await;
    tracing::info!(backend = %state.config.backend.base_url, "Scan screen ready");

    shutdown_signal().await;

    screen.blur().await;
    drop(screen);
    printer.abort();

    tracing::info!("Kiosk stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
