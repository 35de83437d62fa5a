//! In-memory graph backend with lagging read replicas.
//!
//! Writes land on the primary immediately but only become visible to reads
//! `replica_lag` later, which is the behavior the consistency gate exists
//! to paper over.

use nodegate_admission::AdmissionError;
use nodegate_kernel::EntityKey;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

impl GraphError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Admission(err) => err.kind(),
        }
    }
}

/// What a replica read returned, alongside what the primary holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaRead {
    pub visible_revision: u64,
    pub primary_revision: u64,
}

impl ReplicaRead {
    pub fn is_stale(&self) -> bool {
        self.visible_revision < self.primary_revision
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeRevisions {
    primary: u64,
    visible: u64,
    visible_at: Instant,
}

#[derive(Debug)]
pub struct InMemoryGraph {
    latency: Duration,
    replica_lag: Duration,
    nodes: Mutex<BTreeMap<EntityKey, NodeRevisions>>,
}

impl InMemoryGraph {
    pub fn new(latency: Duration, replica_lag: Duration) -> Self {
        Self {
            latency,
            replica_lag,
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<EntityKey, NodeRevisions>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bump the node's revision on the primary. Returns the new revision.
    pub async fn write(&self, key: &EntityKey) -> Result<u64, GraphError> {
        tokio::time::sleep(self.latency).await;
        let now = Instant::now();
        let mut nodes = self.nodes();
        let node = nodes.entry(key.clone()).or_insert(NodeRevisions {
            primary: 0,
            visible: 0,
            visible_at: now,
        });
        settle(node, now);
        node.primary += 1;
        node.visible_at = now + self.replica_lag;
        Ok(node.primary)
    }

    pub async fn read(&self, key: &EntityKey) -> Result<ReplicaRead, GraphError> {
        tokio::time::sleep(self.latency).await;
        let now = Instant::now();
        let mut nodes = self.nodes();
        let Some(node) = nodes.get_mut(key) else {
            return Ok(ReplicaRead {
                visible_revision: 0,
                primary_revision: 0,
            });
        };
        settle(node, now);
        Ok(ReplicaRead {
            visible_revision: node.visible,
            primary_revision: node.primary,
        })
    }
}

// Replicas catch up to the primary once the lag has passed.
fn settle(node: &mut NodeRevisions, now: Instant) {
    if now >= node.visible_at {
        node.visible = node.primary;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn replica_lags_behind_primary() {
        let graph = InMemoryGraph::new(Duration::ZERO, Duration::from_millis(100));
        let key = EntityKey::new("node-1");

        assert_eq!(graph.write(&key).await.expect("write"), 1);
        let early = graph.read(&key).await.expect("read");
        assert!(early.is_stale());
        assert_eq!(early.visible_revision, 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let late = graph.read(&key).await.expect("read");
        assert!(!late.is_stale());
        assert_eq!(late.visible_revision, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_writes_hold_back_the_replica() {
        let graph = InMemoryGraph::new(Duration::ZERO, Duration::from_millis(100));
        let key = EntityKey::new("node-1");

        graph.write(&key).await.expect("write");
        tokio::time::sleep(Duration::from_millis(150)).await;
        graph.write(&key).await.expect("write");

        let read = graph.read(&key).await.expect("read");
        assert_eq!(read.visible_revision, 1);
        assert_eq!(read.primary_revision, 2);
    }

    #[tokio::test]
    async fn unknown_node_reads_as_empty() {
        let graph = InMemoryGraph::new(Duration::ZERO, Duration::ZERO);
        let read = graph.read(&EntityKey::new("nobody")).await.expect("read");
        assert!(!read.is_stale());
    }
}
