//! Session layer of the sharevault dedup server.
//!
//! Connections are accepted on the address this node holds in the cluster
//! list and served by a fixed pool of blocking worker threads. Each
//! session reads a `(user_id, indicator)` opener and runs one service:
//! upload, download, or one of the peer operations.

pub mod config;
pub mod error;
pub mod pool;
pub mod session;

use std::net::TcpListener;
use std::sync::Arc;

use tracing::{info, warn};

use sharevault_dedup::DedupCore;

pub use config::{ClusterNode, ServerConfig, DEFAULT_CONFIG};
pub use error::ServerError;
pub use pool::WorkerPool;

/// Number of session workers: hardware concurrency, falling back to 6
/// when it cannot be determined.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(6)
}

/// Accept connections forever, feeding them to the worker pool.
pub fn run(listener: TcpListener, core: Arc<DedupCore>, workers: usize) -> Result<(), ServerError> {
    let pool = WorkerPool::new(workers, core)?;
    info!(addr = %listener.local_addr()?, workers, "server listening");
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if !pool.submit(stream) {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
    pool.shutdown();
    Ok(())
}
