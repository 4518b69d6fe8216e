use crate::core::{Block, Ledger};
use crate::error::{BlockchainError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Request/response calls to a named peer. Timeouts and retries belong to
/// the implementation.
pub trait PeerTransport: Send + Sync {
    /// Blocks `from..=to` as held by the peer; fewer (or none) when the
    /// peer's chain is shorter
    fn fetch_blocks(&self, peer_id: &str, from: u64, to: u64) -> Result<Vec<Block>>;

    /// The peer's current height, -1 for an empty chain
    fn report_height(&self, peer_id: &str) -> Result<i64>;

    fn ping(&self, peer_id: &str) -> bool;
}

/// In-process transport answering from local ledgers, used for simulation
/// and tests
#[derive(Default)]
pub struct InMemoryTransport {
    ledgers: RwLock<HashMap<String, Arc<Ledger>>>,
    offline: RwLock<HashSet<String>>,
}

impl InMemoryTransport {
    pub fn new() -> InMemoryTransport {
        InMemoryTransport::default()
    }

    pub fn attach(&self, peer_id: &str, ledger: Arc<Ledger>) -> Result<()> {
        self.ledgers.write()?.insert(peer_id.to_string(), ledger);
        Ok(())
    }

    pub fn set_online(&self, peer_id: &str, online: bool) -> Result<()> {
        let mut offline = self.offline.write()?;
        if online {
            offline.remove(peer_id);
        } else {
            offline.insert(peer_id.to_string());
        }
        Ok(())
    }

    fn reachable(&self, peer_id: &str) -> Result<Arc<Ledger>> {
        if self.offline.read()?.contains(peer_id) {
            return Err(BlockchainError::Network(format!("peer {peer_id} is unreachable")));
        }
        self.ledgers
            .read()?
            .get(peer_id)
            .cloned()
            .ok_or_else(|| BlockchainError::Network(format!("no route to peer {peer_id}")))
    }
}

impl PeerTransport for InMemoryTransport {
    fn fetch_blocks(&self, peer_id: &str, from: u64, to: u64) -> Result<Vec<Block>> {
        self.reachable(peer_id)?.get_blocks_range(from, to)
    }

    fn report_height(&self, peer_id: &str) -> Result<i64> {
        Ok(self.reachable(peer_id)?.height())
    }

    fn ping(&self, peer_id: &str) -> bool {
        self.reachable(peer_id).is_ok()
    }
}
