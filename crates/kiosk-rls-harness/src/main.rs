//! Kiosk RLS harness entry point
//!
//! Parses flags with clap, loads configuration, and exits with the run's
//! status: 0 when every check passed, 1 on any failure or fatal error.

use anyhow::Result;
use clap::Parser;
use kiosk_rls_harness::{
    Harness, HarnessConfig, HarnessError, RestBackend, StdoutConsole,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kiosk-rls-harness")]
#[command(about = "Verify row-level security policies of the gym kiosk backend", long_about = None)]
struct Cli {
    /// Optional TOML config file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Timezone passed to the check-in procedure
    #[arg(long)]
    timezone: Option<String>,

    /// Write the full run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Run the whole matrix this many times and compare classifications
    #[arg(long, default_value = "1")]
    repeat: usize,

    /// Validate configuration and exit without contacting the backend
    #[arg(long)]
    check_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = load_config(&cli)?;
    if cli.check_config {
        println!(
            "Configuration OK: {} (timezone {})",
            config.backend_url, config.timezone
        );
        return Ok(0);
    }

    let backend = RestBackend::new(&config.backend_url, &config.api_key);
    let console = StdoutConsole;
    let report = Harness::new(&backend, &config, &console)
        .run(cli.repeat, chrono::Utc::now)
        .await?;

    if let Some(path) = &cli.report {
        report.write_json(path)?;
        tracing::info!("Report written to {}", path.display());
    }

    Ok(report.exit_code())
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, HarnessError> {
    let config = HarnessConfig::load(cli.config.as_deref(), cli.timezone.clone())?;
    tracing::debug!("Loaded configuration for {}", config.backend_url);
    Ok(config)
}
