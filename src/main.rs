use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::{MakeWriter, SubscriberBuilder};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::ratelimit::{ManualClock, RateLimiter};
use gatekeeper::replay::{spawn_line_reader, ReplaySummary, Replayer};

#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "Fixed-window rate limiting for authentication-sensitive actions")]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective policy table as YAML
    Policies,
    /// Replay a JSON-lines request log on simulated time
    Replay {
        /// Input file (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Check requests from stdin as they arrive, on the wall clock
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GatekeeperConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Policies => {
            print!("{}", config.policies.to_yaml()?);
        }
        Command::Replay { input } => {
            let clock = Arc::new(ManualClock::new(0));
            let limiter = Arc::new(
                RateLimiter::with_clock(clock.clone()).with_policies(config.policies.clone()),
            );
            let mut replayer = Replayer::simulated(limiter, clock, config.sweeper.interval());

            let input: Box<dyn AsyncBufRead + Unpin> = match input {
                Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
                None => Box::new(BufReader::new(tokio::io::stdin())),
            };
            let summary = replayer.run(input, &mut tokio::io::stdout()).await?;
            log_summary(summary);
        }
        Command::Watch => {
            let mut limiter = RateLimiter::new().with_policies(config.policies.clone());
            if config.sweeper.enabled {
                limiter = limiter.with_sweeper(config.sweeper.interval());
            }
            let limiter = Arc::new(limiter);
            info!("Rate limiter initialized, reading requests from stdin");

            let mut replayer = Replayer::live(limiter.clone());
            let lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
            let summary = replayer
                .watch(lines, &mut tokio::io::stdout(), shutdown_signal())
                .await?;
            log_summary(summary);

            drop(replayer);
            if let Ok(limiter) = Arc::try_unwrap(limiter) {
                limiter.shutdown().await;
            }
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => log_builder(filter, std::io::stderr).init(),
        LogFormat::Json => log_builder(filter, std::io::stderr).json().init(),
    }
}

/// Settings shared by every log format.
fn log_builder<W>(
    filter: EnvFilter,
    writer: W,
) -> SubscriberBuilder<DefaultFields, Format, EnvFilter, W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(writer)
}

fn log_summary(summary: ReplaySummary) {
    info!(
        admitted = summary.admitted,
        rejected = summary.rejected,
        skipped = summary.skipped,
        evicted = summary.evicted,
        "Replay finished"
    );
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
