// Catch-up synchronization against peers. A sync walks the gap in fixed-size
// batches; each batch is range-checked and consensus-checked before it is
// appended as a unit, so a bad response leaves the ledger at its last good
// height.

use crate::core::{Block, ConsensusEngine, Ledger};
use crate::error::Result;
use crate::network::node::{Node, NodeStatus, PeerRegistry};
use crate::network::transport::PeerTransport;
use crate::utils::current_timestamp;
use log::{info, warn};
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: u64 = 50;
pub const DEFAULT_STALE_PEER_AGE_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub batch_size: u64,
    pub stale_peer_age_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            stale_peer_age_ms: DEFAULT_STALE_PEER_AGE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The peer was not ahead
    UpToDate,
    /// Local height reached the peer's reported height
    Completed,
    /// The peer returned an empty batch before the gap was closed
    PeerExhausted,
    /// A response failed validation or the peer was unreachable
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub peer_id: String,
    pub start_height: i64,
    pub end_height: i64,
    pub peer_height: i64,
    pub blocks_applied: u64,
    /// Blocks this sync appended, in order. Blocks other writers appended
    /// meanwhile are not included.
    pub applied: Vec<Block>,
    pub outcome: SyncOutcome,
}

pub struct SyncManager {
    ledger: Arc<Ledger>,
    consensus: Arc<ConsensusEngine>,
    peers: Arc<PeerRegistry>,
    transport: Arc<dyn PeerTransport>,
    config: SyncConfig,
}

impl SyncManager {
    pub fn new(
        ledger: Arc<Ledger>,
        consensus: Arc<ConsensusEngine>,
        peers: Arc<PeerRegistry>,
        transport: Arc<dyn PeerTransport>,
        config: SyncConfig,
    ) -> SyncManager {
        SyncManager {
            ledger,
            consensus,
            peers,
            transport,
            config,
        }
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// Some ACTIVE peer reports a height above ours (an empty ledger is -1)
    pub fn needs_sync(&self) -> Result<bool> {
        let local = self.ledger.height();
        Ok(self
            .peers
            .active_peers()?
            .iter()
            .any(|peer| peer.get_last_block_height() > local))
    }

    pub fn sync_with_peer(&self, peer_id: &str) -> Result<SyncReport> {
        let peer = self.peers.get(peer_id)?;
        let start_height = self.ledger.height();
        let mut report = SyncReport {
            peer_id: peer_id.to_string(),
            start_height,
            end_height: start_height,
            peer_height: peer.get_last_block_height(),
            blocks_applied: 0,
            applied: Vec::new(),
            outcome: SyncOutcome::UpToDate,
        };

        match self.transport.report_height(peer_id) {
            Ok(height) => {
                self.peers.update_height(peer_id, height)?;
                report.peer_height = height;
            }
            Err(e) => {
                return Ok(self.abort(report, format!("height request failed: {e}")));
            }
        }
        if report.peer_height <= start_height {
            return Ok(report);
        }

        info!(
            "Syncing with peer {peer_id}: local height {start_height}, peer height {}",
            report.peer_height
        );
        let previous_status = peer.get_status();
        self.peers.set_status(peer_id, NodeStatus::Syncing)?;
        let mut report = self.catch_up(report);
        self.peers.set_status(peer_id, previous_status)?;
        report.end_height = self.ledger.height();
        Ok(report)
    }

    fn catch_up(&self, mut report: SyncReport) -> SyncReport {
        let batch_size = self.config.batch_size.max(1);
        loop {
            let local = self.ledger.height();
            if local >= report.peer_height {
                report.outcome = SyncOutcome::Completed;
                info!(
                    "Sync with {} complete: {} blocks applied, height {local}",
                    report.peer_id, report.blocks_applied
                );
                return report;
            }

            let from = (local + 1) as u64;
            let to = from
                .saturating_add(batch_size - 1)
                .min(report.peer_height as u64);
            let batch = match self.transport.fetch_blocks(&report.peer_id, from, to) {
                Ok(batch) => batch,
                Err(e) => return self.abort(report, format!("fetch {from}..={to} failed: {e}")),
            };
            if batch.is_empty() {
                info!(
                    "Peer {} has no blocks from {from}, stopping at height {local}",
                    report.peer_id
                );
                report.outcome = SyncOutcome::PeerExhausted;
                return report;
            }

            if !self.ledger.validate_range(&batch) {
                return self.abort(report, format!("batch {from}..={to} failed range validation"));
            }
            if let Some(reasons) = batch.iter().find_map(|block| {
                let check = self.consensus.validate_detailed(block);
                (!check.is_valid()).then(|| check.reasons.join("; "))
            }) {
                return self.abort(report, reasons);
            }
            if let Err(e) = self.ledger.append_batch(&batch) {
                return self.abort(report, format!("append failed: {e}"));
            }
            report.blocks_applied += batch.len() as u64;
            report.applied.extend(batch);
        }
    }

    fn abort(&self, mut report: SyncReport, reason: String) -> SyncReport {
        warn!(
            "Sync with {} aborted at height {}: {reason}",
            report.peer_id,
            self.ledger.height()
        );
        report.end_height = self.ledger.height();
        report.outcome = SyncOutcome::Aborted { reason };
        report
    }

    /// Longest-chain rule: sync against the ACTIVE peer reporting the
    /// greatest height, if it is ahead of us
    pub fn resolve_conflicts(&self) -> Result<Option<SyncReport>> {
        for peer in self.peers.active_peers()? {
            if let Ok(height) = self.transport.report_height(peer.get_id()) {
                self.peers.update_height(peer.get_id(), height)?;
            }
        }
        // ties go to the first peer in id order
        let mut best: Option<Node> = None;
        for peer in self.peers.active_peers()? {
            let higher = best
                .as_ref()
                .map_or(true, |b| peer.get_last_block_height() > b.get_last_block_height());
            if higher {
                best = Some(peer);
            }
        }

        match best {
            Some(peer) if peer.get_last_block_height() > self.ledger.height() => {
                info!(
                    "Resolving conflicts against {} at height {}",
                    peer.get_id(),
                    peer.get_last_block_height()
                );
                self.sync_with_peer(peer.get_id()).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// `floor(max(local, 0) * 100 / max_peer)`, clamped to 0..=100 so a node
    /// ahead of every peer reports 100. Also 100 when no peer height above 0
    /// is known.
    pub fn sync_progress(&self) -> Result<u8> {
        let max_peer = self
            .peers
            .nodes()?
            .iter()
            .map(|peer| peer.get_last_block_height())
            .max();
        Ok(progress(self.ledger.height(), max_peer))
    }

    /// Ping every peer not yet disconnected. Answering peers become ACTIVE;
    /// silent ones step ACTIVE -> INACTIVE -> DISCONNECTED.
    pub fn check_liveness(&self) -> Result<Vec<(String, NodeStatus)>> {
        let now = current_timestamp()?;
        let mut changes = Vec::new();
        for peer in self.peers.nodes()? {
            if peer.get_status() == NodeStatus::Disconnected {
                continue;
            }
            let next = if self.transport.ping(peer.get_id()) {
                self.peers.touch(peer.get_id(), now)?;
                NodeStatus::Active
            } else {
                match peer.get_status() {
                    NodeStatus::Inactive => NodeStatus::Disconnected,
                    _ => NodeStatus::Inactive,
                }
            };
            if next != peer.get_status() {
                self.peers.set_status(peer.get_id(), next)?;
                changes.push((peer.get_id().to_string(), next));
            }
        }
        Ok(changes)
    }

    pub fn sweep_stale_peers(&self) -> Result<Vec<String>> {
        self.peers
            .sweep_stale(current_timestamp()?, self.config.stale_peer_age_ms)
    }
}

fn progress(local_height: i64, max_peer_height: Option<i64>) -> u8 {
    match max_peer_height {
        Some(max) if max > 0 => {
            let percent = (local_height.max(0) as i128 * 100) / max as i128;
            percent.clamp(0, 100) as u8
        }
        _ => 100,
    }
}
