use std::collections::HashMap;
use std::time::Instant;

use crate::identity::NodeId;

/// One known remote node.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub last_seen: Instant,
    pub alive: bool,
    /// Consecutive liveness-probe failures; cleared on any sign of life.
    pub failures: u32,
}

impl PeerRecord {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Flat table of known peers, keyed by node id. No distance bucketing;
/// growth is bounded by the health monitor pruning unreachable entries.
#[derive(Debug)]
pub struct RoutingTable {
    local_id: NodeId,
    peers: HashMap<NodeId, PeerRecord>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            peers: HashMap::new(),
        }
    }

    /// Inserts a peer or refreshes an existing record. A peer reporting our
    /// own id is ignored: the table never contains the local node.
    pub fn upsert_peer(&mut self, id: NodeId, host: &str, port: u16) {
        if id == self.local_id {
            return;
        }
        let now = Instant::now();
        self.peers
            .entry(id)
            .and_modify(|record| {
                record.host = host.to_string();
                record.port = port;
                record.last_seen = now;
                record.alive = true;
                record.failures = 0;
            })
            .or_insert_with(|| PeerRecord {
                id,
                host: host.to_string(),
                port,
                last_seen: now,
                alive: true,
                failures: 0,
            });
    }

    pub fn remove_peer(&mut self, id: &NodeId) -> Option<PeerRecord> {
        self.peers.remove(id)
    }

    /// Snapshot of all known peers; order is not meaningful.
    pub fn list_peers(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub fn mark_alive(&mut self, id: &NodeId) {
        if let Some(record) = self.peers.get_mut(id) {
            record.last_seen = Instant::now();
            record.alive = true;
            record.failures = 0;
        }
    }

    /// Records a failed probe and returns the updated consecutive-failure
    /// count (0 when the peer is unknown).
    pub fn record_failure(&mut self, id: &NodeId) -> u32 {
        match self.peers.get_mut(id) {
            Some(record) => {
                record.alive = false;
                record.failures += 1;
                record.failures
            }
            None => 0,
        }
    }

    /// Drops every peer whose consecutive failures reached `threshold`.
    /// Returns the removed records so the caller can log them.
    pub fn mark_dead_if_stale(&mut self, threshold: u32) -> Vec<PeerRecord> {
        let dead: Vec<NodeId> = self
            .peers
            .values()
            .filter(|record| record.failures >= threshold)
            .map(|record| record.id)
            .collect();
        dead.iter()
            .filter_map(|id| self.peers.remove(id))
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.peers.values().filter(|record| record.alive).count()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> NodeId {
        hex::encode([byte; 32]).parse().unwrap()
    }

    #[test]
    fn never_records_self() {
        let mut table = RoutingTable::new(id(0));
        table.upsert_peer(id(0), "127.0.0.1", 5001);
        assert!(table.is_empty());
    }

    #[test]
    fn upsert_is_idempotent_per_id() {
        let mut table = RoutingTable::new(id(0));
        table.upsert_peer(id(1), "127.0.0.1", 5001);
        table.upsert_peer(id(1), "127.0.0.1", 5002);
        assert_eq!(table.len(), 1);
        assert_eq!(table.list_peers()[0].port, 5002);
    }

    #[test]
    fn failures_accumulate_until_pruned() {
        let mut table = RoutingTable::new(id(0));
        table.upsert_peer(id(1), "127.0.0.1", 5001);

        assert_eq!(table.record_failure(&id(1)), 1);
        assert_eq!(table.record_failure(&id(1)), 2);
        assert_eq!(table.alive_count(), 0);

        let removed = table.mark_dead_if_stale(3);
        assert!(removed.is_empty(), "threshold not reached yet");

        table.record_failure(&id(1));
        let removed = table.mark_dead_if_stale(3);
        assert_eq!(removed.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn mark_alive_clears_failures() {
        let mut table = RoutingTable::new(id(0));
        table.upsert_peer(id(1), "127.0.0.1", 5001);
        table.record_failure(&id(1));
        table.mark_alive(&id(1));
        assert_eq!(table.list_peers()[0].failures, 0);
        assert_eq!(table.alive_count(), 1);
    }

}
