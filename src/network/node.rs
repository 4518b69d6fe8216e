use crate::error::{BlockchainError, Result};
use crate::utils::current_timestamp;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    Inactive,
    Syncing,
    Disconnected,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Active => "ACTIVE",
            NodeStatus::Inactive => "INACTIVE",
            NodeStatus::Syncing => "SYNCING",
            NodeStatus::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

/// A known peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    id: String,
    address: String,
    port: u16,
    status: NodeStatus,
    last_block_height: i64,
    trusted: bool,
    peers: BTreeSet<String>,
    last_seen: i64,
}

impl Node {
    pub fn new(id: &str, address: &str, port: u16) -> Node {
        Node {
            id: id.to_string(),
            address: address.to_string(),
            port,
            status: NodeStatus::Active,
            last_block_height: -1,
            trusted: false,
            peers: BTreeSet::new(),
            last_seen: 0,
        }
    }

    pub fn trusted(mut self) -> Node {
        self.trusted = true;
        self
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    /// `address:port`
    pub fn get_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn get_status(&self) -> NodeStatus {
        self.status
    }

    pub fn get_last_block_height(&self) -> i64 {
        self.last_block_height
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn get_peers(&self) -> &BTreeSet<String> {
        &self.peers
    }

    pub fn get_last_seen(&self) -> i64 {
        self.last_seen
    }
}

/// Registry of peers keyed by node id. Peers are only removed by
/// [`PeerRegistry::sweep_stale`].
#[derive(Default)]
pub struct PeerRegistry {
    inner: RwLock<BTreeMap<String, Node>>,
}

impl PeerRegistry {
    pub fn new() -> PeerRegistry {
        PeerRegistry::default()
    }

    pub fn register(&self, node: Node) -> Result<()> {
        if node.id.trim().is_empty() {
            return Err(BlockchainError::InvalidArgument(
                "Node id must not be empty".to_string(),
            ));
        }
        let mut inner = self.inner.write()?;
        if inner.contains_key(&node.id) {
            return Err(BlockchainError::InvalidState(format!(
                "Node {} is already registered",
                node.id
            )));
        }
        let mut node = node;
        node.last_seen = current_timestamp()?;
        info!("Registered peer {} at {}", node.id, node.get_addr());
        inner.insert(node.id.clone(), node);
        Ok(())
    }

    /// Record adjacency in both directions
    pub fn connect(&self, a: &str, b: &str) -> Result<()> {
        let mut inner = self.inner.write()?;
        for id in [a, b] {
            if !inner.contains_key(id) {
                return Err(BlockchainError::NotFound(format!("node {id}")));
            }
        }
        if let Some(node) = inner.get_mut(a) {
            node.peers.insert(b.to_string());
        }
        if let Some(node) = inner.get_mut(b) {
            node.peers.insert(a.to_string());
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Node> {
        self.inner
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| BlockchainError::NotFound(format!("node {id}")))
    }

    pub fn nodes(&self) -> Result<Vec<Node>> {
        Ok(self.inner.read()?.values().cloned().collect())
    }

    pub fn active_peers(&self) -> Result<Vec<Node>> {
        Ok(self
            .inner
            .read()?
            .values()
            .filter(|node| node.status == NodeStatus::Active)
            .cloned()
            .collect())
    }

    pub fn update_height(&self, id: &str, height: i64) -> Result<()> {
        self.modify(id, |node| node.last_block_height = height)
    }

    pub fn set_status(&self, id: &str, status: NodeStatus) -> Result<()> {
        self.modify(id, |node| {
            if node.status != status {
                info!("Peer {} status: {} -> {status}", node.id, node.status);
            }
            node.status = status;
        })
    }

    pub fn touch(&self, id: &str, now: i64) -> Result<()> {
        self.modify(id, |node| node.last_seen = now)
    }

    fn modify<F>(&self, id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Node),
    {
        let mut inner = self.inner.write()?;
        let node = inner
            .get_mut(id)
            .ok_or_else(|| BlockchainError::NotFound(format!("node {id}")))?;
        change(node);
        Ok(())
    }

    /// Remove DISCONNECTED peers not seen since `now - max_age_ms`; returns
    /// the removed ids
    pub fn sweep_stale(&self, now: i64, max_age_ms: i64) -> Result<Vec<String>> {
        let mut inner = self.inner.write()?;
        let stale: Vec<String> = inner
            .values()
            .filter(|node| {
                node.status == NodeStatus::Disconnected
                    && now.saturating_sub(node.last_seen) > max_age_ms
            })
            .map(|node| node.id.clone())
            .collect();
        for id in &stale {
            inner.remove(id);
            for node in inner.values_mut() {
                node.peers.remove(id);
            }
            info!("Swept stale peer {id}");
        }
        Ok(stale)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_register_is_unique() {
        let registry = PeerRegistry::new();
        registry.register(Node::new("n1", "127.0.0.1", 2001)).unwrap();
        let err = registry
            .register(Node::new("n1", "127.0.0.1", 2002))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("n1").unwrap().get_addr(), "127.0.0.1:2001");
        assert_eq!(registry.get("n9").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_connect_is_symmetric() {
        let registry = PeerRegistry::new();
        registry.register(Node::new("a", "10.0.0.1", 1)).unwrap();
        registry.register(Node::new("b", "10.0.0.2", 1)).unwrap();
        registry.connect("a", "b").unwrap();
        assert!(registry.get("a").unwrap().get_peers().contains("b"));
        assert!(registry.get("b").unwrap().get_peers().contains("a"));
        assert!(registry.connect("a", "zzz").is_err());
    }

    #[test]
    fn test_active_peers_and_sweep() {
        let registry = PeerRegistry::new();
        registry.register(Node::new("a", "10.0.0.1", 1)).unwrap();
        registry.register(Node::new("b", "10.0.0.2", 1).trusted()).unwrap();
        registry.connect("a", "b").unwrap();
        registry.set_status("a", NodeStatus::Disconnected).unwrap();
        registry.touch("a", 1_000).unwrap();
        assert_eq!(registry.active_peers().unwrap().len(), 1);

        assert!(registry.sweep_stale(1_500, 1_000).unwrap().is_empty());
        assert_eq!(registry.sweep_stale(5_000, 1_000).unwrap(), vec!["a"]);
        assert!(registry.get("b").unwrap().get_peers().is_empty());
        assert!(registry.get("b").unwrap().is_trusted());
    }
}
