//! Peer tracking and chain synchronization
//!
//! The peer transport is an injectable contract; the in-process
//! implementation answers from local ledgers so a real network client can
//! be substituted without touching ledger or consensus code.

pub mod node;
pub mod sync;
pub mod transport;

pub use node::{Node, NodeStatus, PeerRegistry};
pub use sync::{SyncConfig, SyncManager, SyncOutcome, SyncReport};
pub use transport::{InMemoryTransport, PeerTransport};
