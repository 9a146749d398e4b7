mod allocation_service;
mod allocator;
mod config;
mod error;
mod http_server;
mod interval_store;
mod persistence;
mod pool_registry;
mod record;

use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::info;

use crate::allocation_service::AllocationService;
use crate::config::Config;
use crate::persistence::JsonFileLog;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration YAML file
    #[arg(short = 'c', long, default_value = "config.yaml", help = "Path to the configuration YAML file")]
    config: String,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("CIDR manager is starting...");

    let config = Config::load(&args.config);
    info!(
        "Configured ranges: {}",
        config.pools.keys().cloned().collect::<Vec<_>>().join(", ")
    );

    let log = Arc::new(JsonFileLog::new(&config.state_file));
    let service = AllocationService::bootstrap(config.registry(), log)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Failed to replay state file '{}': {}", config.state_file, e);
            std::process::exit(1);
        });
    let service = Arc::new(service);

    if let Err(e) = http_server::start_server(service, config.server_port).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
