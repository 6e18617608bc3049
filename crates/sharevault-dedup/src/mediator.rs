//! Peer routing.
//!
//! In a multi-node deployment the fingerprint space is partitioned across
//! the cluster and index updates and restores for foreign shares are
//! forwarded to the owning node. This deployment forces every fingerprint
//! local: routing always answers [`Route::Local`], and the session
//! handlers for the peer indicators run against the local engine.

use sharevault_proto::Fingerprint;

/// Owner of a fingerprint's index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The local node owns the fingerprint.
    Local,
    /// A remote peer owns the fingerprint (by cluster offset from this
    /// node).
    Peer(usize),
}

/// Maps fingerprints to owning nodes.
#[derive(Debug, Clone)]
pub struct PeerMediator {
    force_local: bool,
    cluster_size: usize,
}

impl Default for PeerMediator {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerMediator {
    /// A mediator that keeps every fingerprint local.
    pub fn new() -> Self {
        PeerMediator {
            force_local: true,
            cluster_size: 1,
        }
    }

    /// A mediator aware of the cluster size. Cross-node forwarding is not
    /// wired up, so routing still forces local.
    pub fn with_cluster(cluster_size: usize) -> Self {
        PeerMediator {
            force_local: true,
            cluster_size: cluster_size.max(1),
        }
    }

    /// Decide which node owns `fp`.
    pub fn route(&self, fp: &Fingerprint) -> Route {
        if self.force_local || self.cluster_size <= 1 {
            return Route::Local;
        }
        let slot = fp
            .as_bytes()
            .iter()
            .fold(0usize, |acc, byte| acc.wrapping_add(*byte as usize))
            % self.cluster_size;
        if slot == 0 {
            Route::Local
        } else {
            Route::Peer(slot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_routes_local() {
        let mediator = PeerMediator::new();
        assert_eq!(mediator.route(&Fingerprint([0; 32])), Route::Local);
        assert_eq!(mediator.route(&Fingerprint([0xff; 32])), Route::Local);
    }

    #[test]
    fn cluster_awareness_still_forces_local() {
        let mediator = PeerMediator::with_cluster(4);
        for byte in [0u8, 1, 7, 0xff] {
            assert_eq!(mediator.route(&Fingerprint([byte; 32])), Route::Local);
        }
    }
}
