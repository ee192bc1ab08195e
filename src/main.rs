//! C14 CLI entry point. Grounded in `src/bin/optimize.rs`'s
//! `clap::{Parser, Subcommand}` shape: a `#[tokio::main]` async main,
//! `tracing_subscriber` initialized first, subcommands dispatched by a
//! `match` over a derived enum.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signalforge::application::system::{Application, Role};
use signalforge::config::AppConfig;
use signalforge::infrastructure::persistence::{Database, SqliteQueue};
use std::io::Write as _;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "HK/US equity signal engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the generator and/or executor roles until interrupted.
    Run {
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        scan_interval: Option<u64>,
        #[arg(long)]
        account_id: Option<String>,
        #[arg(long, default_value = "both")]
        role: String,
        /// Comma-separated watchlist symbols, e.g. "0700.HK,AAPL.US".
        #[arg(long, default_value = "0700.HK,9988.HK,AAPL.US,MSFT.US")]
        watchlist: String,
    },
    /// Queue inspection and maintenance commands.
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Print pending/processing/failed/succeeded counts.
    Stats,
    /// Move every failed signal back to pending.
    RetryFailed,
    /// Delete every row in one status bucket, after confirmation.
    Clear {
        #[arg(value_parser = ["pending", "processing", "failed"])]
        status: String,
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Run { workers, scan_interval, account_id, role, watchlist } => {
            if let Some(w) = workers {
                config.worker_count = w;
            }
            if let Some(s) = scan_interval {
                config.scan_interval_secs = s;
            }
            if let Some(a) = account_id {
                config.account_id = a;
            }
            let role: Role = role.parse()?;
            let watchlist: Vec<String> = watchlist.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();

            run(config, role, watchlist).await
        }
        Commands::Queue { command } => queue_command(config, command).await,
    }
}

async fn run(config: AppConfig, role: Role, watchlist: Vec<String>) -> Result<()> {
    info!(?role, workers = config.worker_count, "starting signal engine");
    let app = Application::build(config, watchlist.clone()).await?;
    let cancel = CancellationToken::new();

    let handles = app.start(role, watchlist, cancel.clone());

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    cancel.cancel();

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn queue_command(config: AppConfig, command: QueueCommands) -> Result<()> {
    let db = Database::new(&config.db_path).await?;
    let queue = SqliteQueue::new(db.pool, Duration::from_secs(config.visibility_timeout_secs));

    match command {
        QueueCommands::Stats => {
            use signalforge::domain::ports::SignalQueue;
            let stats = queue.stats().await?;
            println!("pending:    {}", stats.pending);
            println!("processing: {}", stats.processing);
            println!("failed:     {}", stats.failed);
            println!("succeeded:  {}", stats.succeeded);
            println!("success rate: {:.1}%", stats.success_rate() * 100.0);
        }
        QueueCommands::RetryFailed => {
            let n = queue.retry_failed().await?;
            println!("requeued {n} failed signal(s)");
        }
        QueueCommands::Clear { status, yes } => {
            if !yes {
                print!("delete all '{status}' signals? [y/N] ");
                std::io::stdout().flush().ok();
                let mut answer = String::new();
                std::io::stdin().read_line(&mut answer).ok();
                if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
                    println!("aborted");
                    return Ok(());
                }
            }
            let n = queue.clear(&status).await?;
            println!("deleted {n} '{status}' signal(s)");
        }
    }
    Ok(())
}
