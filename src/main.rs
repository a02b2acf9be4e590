//! CLI entry point for transit_wrangler.
//!
//! Runs the named processing steps against the table store described by the
//! config file.

use anyhow::Result;
use clap::Parser;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_wrangler::config::Config;
use transit_wrangler::pipeline::{parse_steps, run};

#[derive(Parser)]
#[command(name = "transit_wrangler")]
#[command(
    about = "Expands GTFS schedules, joins AVL/APC observations and infers fare-card transfers",
    long_about = None
)]
struct Cli {
    /// JSON config naming the store and the input files
    #[arg(short, long, env = "WRANGLER_CONFIG", default_value = "wrangler.json")]
    config: PathBuf,

    /// Steps to run: expand, join, fares, aggregate
    #[arg(value_name = "STEP", required = true)]
    steps: Vec<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_wrangler.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_wrangler.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    // Reject typos before anything is read or locked
    let steps = parse_steps(&cli.steps)?;
    let config = Config::load(&cli.config)?;
    info!(
        config = %cli.config.display(),
        steps = ?steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "Starting run"
    );

    if let Err(e) = run(&config, &steps) {
        error!(error = %format!("{e:#}"), "Run failed");
        return Err(e);
    }

    Ok(())
}
