//! Cluster Coordinator (C10): heartbeat-based membership, lexicographic
//! leader election, and hash-mod-alive-count sharding.
//!
//! The heartbeat decay loop uses the same `tokio::time::interval` +
//! stop-channel pattern as the Log Buffer flusher; leader election and
//! sharding are pure functions over the alive-node list so they're trivial
//! to unit test without any networking.

use crate::model::{ClusterNode, ClusterState};
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{info, instrument, warn};

/// Local record of a peer's last known heartbeat.
#[derive(Debug, Clone)]
struct PeerState {
    url: String,
    last_heartbeat_ms: i64,
}

pub struct Coordinator {
    node_id: String,
    self_url: String,
    heartbeat_timeout_ms: i64,
    horizontal_scaling_enabled: bool,
    peers: DashMap<String, PeerState>,
    is_leader: AtomicBool,
}

impl Coordinator {
    pub fn new(node_id: String, self_url: String, heartbeat_timeout_ms: u64, horizontal_scaling_enabled: bool) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            node_id: node_id.clone(),
            self_url,
            heartbeat_timeout_ms: heartbeat_timeout_ms as i64,
            horizontal_scaling_enabled,
            peers: DashMap::new(),
            is_leader: AtomicBool::new(false),
        });
        coordinator.recompute_leader();
        coordinator
    }

    /// Registers a statically-configured peer so it participates in
    /// membership before its first heartbeat arrives.
    pub fn add_static_peer(&self, node_id: String, url: String) {
        self.peers.insert(
            node_id,
            PeerState {
                url,
                last_heartbeat_ms: chrono::Utc::now().timestamp_millis(),
            },
        );
        self.recompute_leader();
    }

    /// `onHeartbeat(peer)`.
    pub fn on_heartbeat(&self, node_id: &str, url: &str, timestamp_ms: i64) {
        self.peers.insert(
            node_id.to_string(),
            PeerState {
                url: url.to_string(),
                last_heartbeat_ms: timestamp_ms,
            },
        );
        self.recompute_leader();
    }

    /// `onNodeLeaving(id)`.
    pub fn on_node_leaving(&self, node_id: &str) {
        self.peers.remove(node_id);
        self.recompute_leader();
    }

    fn alive_peer_ids(&self) -> Vec<String> {
        let now = chrono::Utc::now().timestamp_millis();
        self.peers
            .iter()
            .filter(|e| now - e.value().last_heartbeat_ms < self.heartbeat_timeout_ms)
            .map(|e| e.key().clone())
            .collect()
    }

    /// All alive node ids including this node, sorted ascending.
    fn alive_node_ids(&self) -> Vec<String> {
        let mut ids = self.alive_peer_ids();
        ids.push(self.node_id.clone());
        ids.sort();
        ids.dedup();
        ids
    }

    fn recompute_leader(&self) {
        let alive = self.alive_node_ids();
        let leader = alive.first().cloned();
        let is_leader = leader.as_deref() == Some(self.node_id.as_str());
        let was_leader = self.is_leader.swap(is_leader, Ordering::SeqCst);
        if was_leader != is_leader {
            info!(node_id = %self.node_id, is_leader, "leader status changed");
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// `shouldProcessSource(sourceId)`: true when horizontal scaling is
    /// disabled, or when `hash(sourceId) mod aliveNodeCount ==
    /// localNodeIndex` in the ordered alive-node list.
    pub fn should_process_source(&self, source_id: &str) -> bool {
        if !self.horizontal_scaling_enabled {
            return true;
        }
        let alive = self.alive_node_ids();
        if alive.is_empty() {
            return true;
        }
        let Some(local_index) = alive.iter().position(|id| id == &self.node_id) else {
            return false;
        };
        let hash = hash_source_id(source_id);
        (hash as usize) % alive.len() == local_index
    }

    pub fn state(&self) -> ClusterState {
        let now = chrono::Utc::now().timestamp_millis();
        let leader = self.alive_node_ids().first().cloned();
        let mut nodes: Vec<ClusterNode> = self
            .peers
            .iter()
            .map(|e| ClusterNode {
                node_id: e.key().clone(),
                url: e.value().url.clone(),
                last_heartbeat_ms: e.value().last_heartbeat_ms,
                is_leader: leader.as_deref() == Some(e.key().as_str()),
            })
            .collect();
        nodes.push(ClusterNode {
            node_id: self.node_id.clone(),
            url: self.self_url.clone(),
            last_heartbeat_ms: now,
            is_leader: leader.as_deref() == Some(self.node_id.as_str()),
        });
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        ClusterState { leader_id: leader, nodes }
    }
}

fn hash_source_id(source_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source_id.hash(&mut hasher);
    hasher.finish()
}

/// Spawns this node's heartbeat loop. Pinging every peer's `/heartbeat`
/// endpoint isn't modeled here (no network transport is wired up for it);
/// instead this loop drives the local alive-set decay so stale peers age
/// out on schedule.
pub fn spawn_heartbeat_loop(coordinator: Arc<Coordinator>, heartbeat_interval_ms: u64) -> tokio::sync::mpsc::Sender<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(heartbeat_interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    coordinator.recompute_leader();
                }
                _ = rx.recv() => {
                    warn!(node_id = %coordinator.node_id(), "heartbeat loop received stop signal");
                    break;
                }
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_is_always_leader() {
        let coordinator = Coordinator::new("n1".into(), "http://n1".into(), 15_000, false);
        assert!(coordinator.is_leader());
    }

    #[test]
    fn lexicographically_smallest_alive_node_wins() {
        let coordinator = Coordinator::new("n2".into(), "http://n2".into(), 15_000, false);
        coordinator.add_static_peer("n1".into(), "http://n1".into());
        assert!(!coordinator.is_leader());
        coordinator.on_node_leaving("n1");
        assert!(coordinator.is_leader());
    }

    #[test]
    fn disabled_scaling_always_processes() {
        let coordinator = Coordinator::new("n1".into(), "http://n1".into(), 15_000, false);
        assert!(coordinator.should_process_source("any-source"));
    }

    #[test]
    fn sharding_partitions_sources_across_two_nodes_without_overlap() {
        let n1 = Coordinator::new("n1".into(), "http://n1".into(), 15_000, true);
        n1.add_static_peer("n2".into(), "http://n2".into());
        let n2 = Coordinator::new("n2".into(), "http://n2".into(), 15_000, true);
        n2.add_static_peer("n1".into(), "http://n1".into());

        let ids: Vec<String> = (0..10).map(|i| format!("source-{i}")).collect();
        let mut owned_by_n1 = 0;
        let mut owned_by_n2 = 0;
        for id in &ids {
            let a = n1.should_process_source(id);
            let b = n2.should_process_source(id);
            assert_ne!(a, b, "source {id} must be owned by exactly one node");
            if a {
                owned_by_n1 += 1;
            } else {
                owned_by_n2 += 1;
            }
        }
        assert_eq!(owned_by_n1 + owned_by_n2, 10);
    }

    #[test]
    fn heartbeat_timeout_drops_peer_from_alive_set() {
        let coordinator = Coordinator::new("n2".into(), "http://n2".into(), 100, false);
        coordinator.on_heartbeat("n1", "http://n1", chrono::Utc::now().timestamp_millis() - 5_000);
        // n1's heartbeat is older than the timeout, so n2 (higher id) should be leader regardless.
        assert!(!coordinator.alive_node_ids().contains(&"n1".to_string()));
    }
}
