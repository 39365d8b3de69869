use clap::Parser;
use coordinator::config::CoordinatorConfig;
use coordinator::network::Server;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Main-method of the coordinator.
/// Parses command-line arguments, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[clap(short, long, default_value = "8000")]
        port: u16,
        /// Width and height of the square board
        #[clap(short, long, default_value = "20")]
        board_size: i32,
        /// Milliseconds between ticks
        #[clap(short, long, default_value = "1000")]
        tick_ms: u64,
        /// Minimum milliseconds between two moves of one session
        #[clap(long, default_value = "1000")]
        throttle_ms: u64,
        /// Deliveries per task before it is dead-lettered
        #[clap(long, default_value = "5")]
        max_attempts: u32,
        /// Journal file for queued tasks; in-memory queue when absent
        #[clap(short, long)]
        journal: Option<PathBuf>,
        /// Sync the journal to disk after every record
        #[clap(long)]
        sync_journal: bool,
        /// Settled tasks between journal rewrites
        #[clap(long, default_value = "1024")]
        compact_after: usize,
        /// Longest a fetch request may wait for work
        #[clap(long, default_value = "5000")]
        max_wait_ms: u64,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = CoordinatorConfig {
        bind: format!("{}:{}", args.host, args.port),
        board_size: args.board_size,
        tick_interval: Duration::from_millis(args.tick_ms),
        move_throttle: Duration::from_millis(args.throttle_ms),
        max_attempts: args.max_attempts,
        journal_path: args.journal,
        sync_journal: args.sync_journal,
        journal_compact_after: args.compact_after,
        max_fetch_wait: Duration::from_millis(args.max_wait_ms),
    };

    info!(
        "Starting coordinator: board {}x{}, tick {}ms",
        config.board_size, config.board_size, args.tick_ms
    );
    if let Some(path) = &config.journal_path {
        info!("Journaling tasks to {}", path.display());
    }

    let server = Server::bind(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_handle = tokio::spawn(server.run(shutdown_rx));

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    let _ = shutdown_tx.send(true);
    match server_handle.await {
        Ok(Err(e)) => error!("Server stopped: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}
