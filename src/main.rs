use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use driftwatch::{Config, EventKind, FileWatcher};

#[derive(Parser)]
#[command(name = "driftwatch")]
#[command(about = "Watch directories and print semantic file events", long_about = None)]
#[command(version)]
struct Cli {
    /// Paths to watch (added to any configured in the config file)
    paths: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes
    #[arg(long)]
    hot_reload: bool,

    /// Only watch the given directories, not their subdirectories
    #[arg(long)]
    flat: bool,

    /// Deliver events in priority-ordered batches
    #[arg(short, long)]
    batch: bool,

    /// Extension allow-list (comma-separated, e.g. ".rs,.toml")
    #[arg(short, long)]
    ext: Option<String>,

    /// Exclusion globs (comma-separated)
    #[arg(short = 'x', long)]
    exclude: Option<String>,

    /// Seconds between metrics reports, 0 disables them
    #[arg(long, default_value_t = 30)]
    metrics_interval: u64,

    /// Directory for rolling log files
    #[arg(long, default_value = ".driftwatch/logs")]
    log_dir: PathBuf,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    config.watch_paths.extend(cli.paths.iter().cloned());
    if cli.flat {
        config.recursive = false;
    }
    if cli.batch {
        config.batch_enabled = true;
    }
    if cli.hot_reload {
        config.hot_reload = true;
    }
    if let Some(ext) = &cli.ext {
        config.extensions = split_list(ext)
            .iter()
            .map(|e| driftwatch::config::normalize_extension(e))
            .collect();
    }
    if let Some(exclude) = &cli.exclude {
        config.exclude_patterns.extend(split_list(exclude));
    }
    if config.watch_paths.is_empty() {
        config.watch_paths.push(std::env::current_dir()?);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("driftwatch=info"))
        .context("Failed to build log filter")?;

    fs::create_dir_all(&cli.log_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create logs directory: {}", e);
    });

    // Daily rolling file plus console output
    let file_appender = rolling::daily(&cli.log_dir, "driftwatch.log");
    let (non_blocking_file, _file_guard) = non_blocking(file_appender);
    let (non_blocking_console, _console_guard) = non_blocking(std::io::stderr());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking_console)
                .with_target(false)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_target(true)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    let config = build_config(&cli)?;
    debug!("Effective configuration: {:?}", config);

    let mut watcher = FileWatcher::new(config).context("Failed to create file watcher")?;
    for kind in EventKind::ALL {
        watcher.register_callback(kind, |event| println!("{}", event));
    }

    watcher.start().await.context("Failed to start file watcher")?;
    info!("Watching {} paths, press Ctrl-C to stop", watcher.list_paths().len());

    let mut report = (cli.metrics_interval > 0)
        .then(|| tokio::time::interval(Duration::from_secs(cli.metrics_interval)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = async {
                match report.as_mut() {
                    Some(ticker) => { ticker.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                match serde_json::to_string(&watcher.metrics_snapshot()) {
                    Ok(json) => info!("metrics {}", json),
                    Err(e) => warn!("Failed to serialize metrics: {}", e),
                }
            }
        }
    }

    info!("Shutting down");
    watcher.stop().await.context("Failed to stop file watcher")?;
    Ok(())
}
