use clap::Parser;
use log::{error, info};
use server::{Server, ServerConfig, ServerError};
use shared::DEFAULT_PORT;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IPv4 address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of runtime worker threads
    #[arg(short = 'w', long = "workers", default_value = "2")]
    workers: usize,

    /// Maximum number of simultaneous connections
    #[arg(long, default_value = "64")]
    max_clients: usize,

    /// Consecutive read errors tolerated before a client is dropped
    #[arg(long, default_value = "10")]
    io_error_ceiling: u32,

    /// Number of trees placed around the spawn area
    #[arg(long = "trees", default_value = "3")]
    trees: usize,

    /// Drop clients that are not ready after this many seconds (0 disables)
    #[arg(long, default_value = "0")]
    handshake_timeout_secs: u64,

    /// Seed for the world layout, random when omitted
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            worker_threads: self.workers.max(1),
            max_clients: self.max_clients,
            io_error_ceiling: self.io_error_ceiling,
            tree_count: self.trees,
            handshake_timeout: (self.handshake_timeout_secs > 0)
                .then(|| Duration::from_secs(self.handshake_timeout_secs)),
            world_seed: self.seed,
            ..ServerConfig::default()
        }
    }
}

fn main() -> Result<(), ServerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    info!(
        "Starting server on {} with {} worker threads",
        config.bind_addr(),
        config.worker_threads
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;

    runtime.block_on(run(config))
}

async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let server = Server::bind(config).await?;
    let handle = server.handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                handle.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await
}
