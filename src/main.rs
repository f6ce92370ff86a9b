//! Logscope - inspect, tail and search server logs from the terminal
//!
//! Thin front-end over the `logscope` library: the same registry, search
//! engine and service a dashboard uses, driven from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use logscope::config::{Config, LoggingConfig};
use logscope::host::{HostMonitor, HostSnapshot};
use logscope::logs::{spawn_refresh, LogEntry, LogRegistry, SearchDirection};
use logscope::service::{LogService, SearchResponse};

#[derive(Parser)]
#[command(name = "logscope")]
#[command(author = "Logscope Contributors")]
#[command(version)]
#[command(about = "Inspect, tail and search server logs", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log files to make available. Patterns (e.g. /var/log/**/*.log) are
    /// supported. Can be given multiple times
    #[arg(short = 'l', long = "log", value_name = "PATTERN", global = true)]
    logs: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available logs
    List {
        /// Keep listing, re-expanding patterns on the refresh interval
        #[arg(short, long)]
        watch: bool,
    },

    /// Print the end of a log
    Tail {
        path: PathBuf,

        /// Keep printing data as it is appended
        #[arg(short, long)]
        follow: bool,

        /// Poll interval for --follow, in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },

    /// Search a log for text, most recent match first
    Search {
        path: PathBuf,

        text: String,

        /// Number of consecutive matches to show
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// List the offsets of every match
        #[arg(short, long)]
        all: bool,

        /// Search from the start of the file instead of the end
        #[arg(long)]
        forward: bool,
    },

    /// Show a host telemetry snapshot
    Status,
}

fn setup_logging(verbosity: u8, config: &LoggingConfig) -> Result<Vec<WorkerGuard>> {
    let level = match verbosity {
        0 => config.level.parse::<Level>().unwrap_or(Level::WARN),
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let (stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let mut guards = vec![stderr_guard];

    let file_layer = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "logscope.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            guards.push(guard);
            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(stderr))
        .with(file_layer)
        .init();

    Ok(guards)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Config::load(path);
    }
    match Config::default_path() {
        Some(path) if path.exists() => Config::load(&path),
        _ => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // Keep the guards alive for the duration of the program
    let _logging_guards = setup_logging(cli.verbose, &config.logging)?;
    tracing::info!("starting logscope v{}", env!("CARGO_PKG_VERSION"));

    let mut patterns = config.logs.patterns.clone();
    patterns.extend(cli.logs.iter().cloned());

    let registry = Arc::new(
        LogRegistry::with_options(config.logs.chunk_size, config.logs.direction)
            .with_max_handles(config.logs.max_handles),
    );
    let service = LogService::new(Arc::clone(&registry));
    service.refresh(&patterns);

    // One session per invocation, like one viewer in the dashboard
    let session = uuid::Uuid::new_v4().to_string();

    match cli.command {
        Commands::List { watch } => {
            if watch {
                watch_logs(&service, patterns, config.logs.refresh_interval(), cli.json).await?;
            } else {
                print_logs(&service.list_logs(), cli.json)?;
            }
        }
        Commands::Tail {
            path,
            follow,
            interval_ms,
        } => {
            make_available(&registry, &path)?;
            let data = service.read_log(&path, Some(&session), true)?;
            write_raw(&data)?;
            if follow {
                follow_log(&service, &path, &session, Duration::from_millis(interval_ms)).await?;
            }
        }
        Commands::Search {
            path,
            text,
            count,
            all,
            forward,
        } => {
            make_available(&registry, &path)?;
            let direction = forward.then_some(SearchDirection::Forward);
            if all {
                search_all(&registry, &path, &text, &session, direction, cli.json)?;
            } else {
                for _ in 0..count.max(1) {
                    let response = service.search_log_in(&path, &text, Some(&session), direction)?;
                    let found = response.position >= 0;
                    print_search(&response, cli.json)?;
                    if !found {
                        break;
                    }
                }
            }
        }
        Commands::Status => {
            let mut monitor = HostMonitor::new();
            // CPU usage needs two samples some time apart
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            print_status(&monitor.sample(), cli.json)?;
        }
    }

    Ok(())
}

/// A path named explicitly on the command line is trusted like a configured one.
fn make_available(registry: &LogRegistry, path: &Path) -> Result<()> {
    registry
        .add_available(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    Ok(())
}

async fn watch_logs(
    service: &LogService,
    patterns: Vec<String>,
    interval: Duration,
    json: bool,
) -> Result<()> {
    let worker = spawn_refresh(Arc::clone(service.registry()), patterns, interval);
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                print_logs(&service.list_logs(), json)?;
                if !json {
                    println!();
                }
            }
        }
    }

    worker.abort();
    Ok(())
}

async fn follow_log(
    service: &LogService,
    path: &Path,
    session: &str,
    interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => loop {
                let data = service
                    .read_log(path, Some(session), false)
                    .with_context(|| format!("log {} is no longer available", path.display()))?;
                if data.is_empty() {
                    break;
                }
                write_raw(&data)?;
            },
        }
    }

    Ok(())
}

fn search_all(
    registry: &LogRegistry,
    path: &Path,
    text: &str,
    session: &str,
    direction: Option<SearchDirection>,
    json: bool,
) -> Result<()> {
    let handle = registry.get(path, Some(session))?;
    let mut handle = handle.lock();
    if let Some(direction) = direction {
        handle.set_direction(direction)?;
    }
    let positions = handle.find_all(text.as_bytes())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&positions)?);
    } else {
        for pos in &positions {
            println!("{}", pos);
        }
        println!("{} matches", positions.len());
    }
    Ok(())
}

fn write_raw(data: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    // Buffers may end inside a multi-byte character; pass bytes through untouched
    stdout.write_all(data)?;
    stdout.flush()?;
    Ok(())
}

fn print_logs(entries: &[LogEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }

    println!("{:>10}  {:<16}  PATH", "SIZE", "MODIFIED");
    println!("{}", "-".repeat(80));
    for entry in entries {
        let modified = entry
            .mtime
            .map(|t| {
                t.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>10}  {:<16}  {}",
            humansize::format_size(entry.size, humansize::DECIMAL),
            modified,
            entry.path.display()
        );
    }
    Ok(())
}

fn print_search(response: &SearchResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(response)?);
    } else if response.position < 0 {
        println!("no more matches");
    } else {
        println!("{:>12}: {}", response.position, response.line);
    }
    Ok(())
}

fn print_status(snapshot: &HostSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    let size = |bytes: u64| humansize::format_size(bytes, humansize::BINARY);
    println!("{:<10} {}", "host", snapshot.hostname);
    println!("{:<10} {}", "os", snapshot.os);
    println!("{:<10} {}", "uptime", format_uptime(snapshot.uptime_secs));
    println!(
        "{:<10} {:.2} {:.2} {:.2}",
        "load", snapshot.load_avg[0], snapshot.load_avg[1], snapshot.load_avg[2]
    );
    println!("{:<10} {:.1}% of {} cpus", "cpu", snapshot.cpu_percent, snapshot.cpu_count);
    println!(
        "{:<10} {} / {} ({:.1}%)",
        "memory",
        size(snapshot.memory_used),
        size(snapshot.memory_total),
        snapshot.memory_percent()
    );
    println!(
        "{:<10} {} / {} ({:.1}%)",
        "swap",
        size(snapshot.swap_used),
        size(snapshot.swap_total),
        snapshot.swap_percent()
    );
    Ok(())
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}
