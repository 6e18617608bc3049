//! sharevault server daemon.
//!
//! Usage: sv-server <index> [config_file]

use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sharevault_dedup::{DedupConfig, DedupCore};
use sharevault_server::{default_worker_count, run, ServerConfig, DEFAULT_CONFIG};
use sharevault_storage::{Backend, BackendConfig};

fn print_usage(prog: &str) {
    eprintln!("Usage: {} <index> [config_file]", prog);
    eprintln!();
    eprintln!("  index        1-based position of this node in the cluster list");
    eprintln!("  config_file  optional, defaults to ./config.json");
    eprintln!();
    eprintln!("config file format:");
    eprintln!("{}", DEFAULT_CONFIG);
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let prog = args.first().map(|s| s.as_str()).unwrap_or("sv-server");

    if args.len() < 2 || args.len() > 3 || args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage(prog);
        std::process::exit(if args.iter().any(|a| a == "-h" || a == "--help") {
            0
        } else {
            1
        });
    }

    let Ok(index) = args[1].parse::<usize>() else {
        print_usage(prog);
        std::process::exit(1);
    };
    let config_path = args.get(2).map(|s| s.as_str()).unwrap_or("./config.json");

    let config = match ServerConfig::load(Path::new(config_path)) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using the default");
            ServerConfig::default()
        }
    };

    if let Err(e) = serve(config, index) {
        tracing::error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

fn serve(config: ServerConfig, index: usize) -> Result<(), sharevault_server::ServerError> {
    let self_index = config.self_index(index)?;
    let addr = config.address(self_index)?;
    config.prepare_directories()?;

    let backend = Backend::open(BackendConfig {
        db_dir: config.database_dir.clone(),
        container_dir: config.container_dir.clone(),
        ..BackendConfig::default()
    })?;
    let core = Arc::new(DedupCore::new(backend, DedupConfig::default()));

    let listener = TcpListener::bind(addr)?;
    tracing::info!(
        %addr,
        node = index,
        cluster = config.cluster.len(),
        "sharevault server starting"
    );
    run(listener, core, default_worker_count())
}
