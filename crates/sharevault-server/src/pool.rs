//! Fixed-size session worker pool.
//!
//! The accept loop hands sockets to a bounded channel; a fixed set of
//! worker threads drains it, each running one session at a time to
//! completion. A session error is fatal to that session only.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use tracing::{error, info, warn};

use sharevault_dedup::{DedupCore, DedupError};
use sharevault_storage::StorageError;

use crate::error::ServerError;
use crate::session;

/// Errors no session can recover from: the container name space is used
/// up and every future store would fail the same way.
fn is_fatal(error: &ServerError) -> bool {
    matches!(
        error,
        ServerError::Storage(StorageError::NamesExhausted)
            | ServerError::Dedup(DedupError::Storage(StorageError::NamesExhausted))
    )
}

/// Worker threads consuming accepted connections.
pub struct WorkerPool {
    tx: Sender<TcpStream>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers serving sessions against `core`.
    pub fn new(size: usize, core: Arc<DedupCore>) -> Result<Self, ServerError> {
        let (tx, rx) = bounded::<TcpStream>(size * 4);
        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let core = Arc::clone(&core);
            let handle = std::thread::Builder::new()
                .name(format!("session-{i}"))
                .spawn(move || {
                    for stream in rx.iter() {
                        let peer = stream
                            .peer_addr()
                            .map(|addr| addr.to_string())
                            .unwrap_or_default();
                        match session::serve_connection(stream, &core) {
                            Ok(()) => {}
                            Err(e) if is_fatal(&e) => {
                                error!(peer, error = %e, "unrecoverable storage state");
                                std::process::exit(1);
                            }
                            Err(e) => warn!(peer, error = %e, "session terminated"),
                        }
                    }
                })?;
            handles.push(handle);
        }
        info!(workers = size, "worker pool running");
        Ok(WorkerPool { tx, handles })
    }

    /// Queue an accepted connection. Returns false if the pool has shut
    /// down.
    pub fn submit(&self, stream: TcpStream) -> bool {
        self.tx.send(stream).is_ok()
    }

    /// Drop the channel and join every worker.
    pub fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}
