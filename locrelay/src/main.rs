//! locrelay - relay location fixes to a tracking endpoint
//!
//! This tool provides commands for:
//! - Checking the configured session defaults
//! - Replaying recorded fixes through a tracking session
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/locrelay/config.toml (~/.config/locrelay/config.toml)
//! - Logs: $XDG_STATE_HOME/locrelay/ (~/.local/state/locrelay/)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use locrelay_core::platform::HeadlessPlatform;
use locrelay_core::source::ReplaySource;
use locrelay_core::{
    Config, ExtraParams, LocationUpdate, RelayStats, SessionConfig, Tracker, LOCATION_UPDATED,
};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser)]
#[command(name = "locrelay")]
#[command(about = "Relay location fixes to an HTTP tracking endpoint")]
#[command(version)]
struct Args {
    /// Verbose output (writes a log file)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show session defaults and relay settings
    Status,

    /// Replay fixes from a file (or stdin) through a tracking session
    Run {
        /// Tracking endpoint (default: from config)
        #[arg(long)]
        url: Option<String>,

        /// Authorization header value (default: from config)
        #[arg(long)]
        header: Option<String>,

        /// Extra payload field as key=value, repeatable
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Fix input, one "lat,lon" or JSON object per line ("-" for stdin)
        #[arg(long, default_value = "-")]
        fixes: PathBuf,

        /// Milliseconds between fixes (default: from config)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Minimum displacement in meters between fixes (default: from config)
        #[arg(long)]
        min_displacement: Option<f64>,

        /// Seconds to wait for in-flight deliveries before stopping
        #[arg(long, default_value_t = 10)]
        drain_secs: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let mut config = Config::load().context("failed to load configuration")?;

    // Keep the guard alive for the whole command
    let _log_guard = if args.verbose {
        let guard = locrelay_core::logging::init(&config.logging)
            .context("failed to initialize logging")?;
        Some(guard)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Run {
            url,
            header,
            params,
            fixes,
            interval_ms,
            min_displacement,
            drain_secs,
        } => {
            if let Some(interval_ms) = interval_ms {
                config.source.interval_ms = interval_ms;
            }
            if let Some(min_displacement) = min_displacement {
                config.source.min_displacement_m = min_displacement;
            }
            let run = RunArgs {
                url,
                header,
                params,
                fixes,
                drain: Duration::from_secs(drain_secs),
            };
            cmd_run(config, run)
        }
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("locrelay Configuration");
    println!("======================");
    println!();

    println!("Config file:     {}", Config::config_path().display());
    println!("Log file:        {}", Config::log_path().display());
    println!();

    let session = &config.session;
    println!(
        "Base URL:        {}",
        session.base_url.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Header:          {}",
        if session.header.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    if session.params.is_empty() {
        println!("Params:          <none>");
    } else {
        println!(
            "Params:          {}",
            serde_json::to_string(&session.params).context("failed to render params")?
        );
    }
    println!();

    println!("Fix interval:    {} ms", config.source.interval_ms);
    println!("Min distance:    {} m", config.source.min_displacement_m);
    println!(
        "Probe interval:  {} s",
        config.connectivity.probe_interval_secs
    );
    println!(
        "Request timeout: {}",
        config
            .delivery
            .timeout_secs
            .map_or_else(|| "<none>".to_string(), |secs| format!("{secs} s"))
    );
    println!(
        "Queue limit:     {}",
        config
            .delivery
            .max_queued
            .map_or_else(|| "<unbounded>".to_string(), |n| n.to_string())
    );
    println!();

    if session.is_ready() {
        println!("Status:          Ready");
    } else {
        println!("Status:          Not ready");
        println!();
        println!("Set defaults in config.toml or pass --url and --header:");
        println!();
        println!("  [session]");
        println!("  base_url = \"https://api.example.com/track\"");
        println!("  header = \"Bearer xxxxxxxx\"");
    }

    Ok(())
}

struct RunArgs {
    url: Option<String>,
    header: Option<String>,
    params: Vec<String>,
    fixes: PathBuf,
    drain: Duration,
}

fn cmd_run(config: Config, args: RunArgs) -> Result<()> {
    let mut params = ExtraParams::new();
    for raw in &args.params {
        let (key, value) = ExtraParams::parse_assignment(raw)
            .with_context(|| format!("invalid --param '{raw}'"))?;
        params.insert(key, value);
    }

    let session_config = config.session.resolve(args.url, args.header, params);
    session_config
        .validate()
        .context("invalid tracking session")?;

    let source = if args.fixes.as_os_str() == "-" {
        ReplaySource::from_reader(io::stdin().lock(), config.source.clone())
    } else {
        let file = File::open(&args.fixes)
            .with_context(|| format!("failed to open {}", args.fixes.display()))?;
        ReplaySource::from_reader(BufReader::new(file), config.source.clone())
    }
    .context("failed to read fixes")?;

    // Fixes are fully read before the runtime starts
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(relay(config, session_config, source, args.drain))
}

async fn relay(
    config: Config,
    session_config: SessionConfig,
    source: ReplaySource,
    drain: Duration,
) -> Result<()> {
    let platform = HeadlessPlatform::new(
        source,
        &session_config.base_url,
        config.connectivity.clone(),
    )?;
    let exhausted = platform.exhausted();

    let mut tracker = Tracker::new(platform).with_delivery(&config.delivery);
    let printer = tokio::spawn(print_updates(tracker.subscribe()));

    tracker
        .start_session(session_config)
        .context("failed to start tracking")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping");
        }
        () = exhausted.cancelled() => {}
    }

    if tokio::time::timeout(drain, tracker.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("Deliveries still in flight after {:?}", drain);
    }

    let stats = tracker.stop_tracking().await.unwrap_or_default();
    // The channel closes once abandoned deliveries release their sender
    drop(tracker);
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        tracing::debug!("Update printer still attached, exiting anyway");
    }

    print_stats(&stats);
    Ok(())
}

async fn print_updates(mut updates: broadcast::Receiver<LocationUpdate>) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                let line = serde_json::json!({
                    "event": LOCATION_UPDATED,
                    "latitude": update.latitude,
                    "longitude": update.longitude,
                });
                let mut stdout = io::stdout().lock();
                if writeln!(stdout, "{line}").is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Update printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_stats(stats: &RelayStats) {
    println!();
    println!("Relay complete:");
    println!("  Fixes received:   {}", stats.fixes_received);
    println!("  Delivered:        {}", stats.delivered);
    println!("  Queued:           {}", stats.enqueued);
    println!("  Retried:          {}", stats.retried);
    println!("  Retry delivered:  {}", stats.retry_delivered);
    println!("  Dropped:          {}", stats.dropped);
    if stats.evicted > 0 {
        println!("  Evicted:          {}", stats.evicted);
    }
}
