use clap::Parser;
use log::{error, info};
use std::time::Duration;
use tokio::sync::watch;
use worker::config::WorkerConfig;
use worker::pool::WorkerPool;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Coordinator address to connect to
    #[arg(short = 'c', long, default_value = "127.0.0.1:8000")]
    coordinator: String,

    /// Name used in status reports; defaults to worker-<pid>
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Seconds between pool rescales
    #[arg(short = 'r', long, default_value = "5")]
    rescale_secs: u64,

    /// Milliseconds a fetch waits for work
    #[arg(long, default_value = "1000")]
    poll_wait_ms: u64,

    /// Milliseconds allowed for submitting one result
    #[arg(long, default_value = "10000")]
    task_timeout_ms: u64,

    /// Hard cap on consumers
    #[arg(short = 'm', long)]
    max_consumers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = WorkerConfig {
        coordinator: args.coordinator,
        name: args
            .name
            .unwrap_or_else(|| format!("worker-{}", std::process::id())),
        rescale_interval: Duration::from_secs(args.rescale_secs),
        poll_wait: Duration::from_millis(args.poll_wait_ms),
        task_timeout: Duration::from_millis(args.task_timeout_ms),
        max_consumers: args.max_consumers,
        ..WorkerConfig::default()
    };

    info!("Starting worker {}", config.name);
    info!("Consuming from: {}", config.coordinator);

    let pool = WorkerPool::new(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut pool_handle = tokio::spawn(pool.run(shutdown_rx));

    tokio::select! {
        result = &mut pool_handle => {
            if let Err(e) = result {
                error!("Worker pool panicked: {}", e);
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping consumers...");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = pool_handle.await {
        error!("Worker pool panicked: {}", e);
    }

    Ok(())
}
