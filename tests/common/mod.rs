// In-process cluster harness shared by the integration tests. Each node gets
// a throwaway store directory and an ephemeral router port; membership is
// wired directly through join events (full mesh, self included).
#![allow(dead_code)]

use std::time::Duration;

use tempfile::TempDir;

use mec_db::config::ReplicationConfig;
use mec_db::coordinator::Coordinator;
use mec_db::peers::{PeerEndpoint, PeerFabric};
use mec_db::store::LocalStore;

pub struct Node {
    pub name: String,
    pub fabric: PeerFabric,
    pub coordinator: Coordinator,
    pub store: LocalStore,
    _dir: TempDir,
}

pub fn replication(n: usize, r: usize, w: usize, strict_write: bool) -> ReplicationConfig {
    ReplicationConfig {
        n,
        r,
        w,
        strict_write,
    }
}

pub async fn node(name: &str, replication: ReplicationConfig) -> Node {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let fabric = PeerFabric::bind(name, 0).await.unwrap();
    let coordinator = Coordinator::new(store.clone(), fabric.clone(), replication);
    coordinator.listen().await;
    Node {
        name: name.to_string(),
        fabric,
        coordinator,
        store,
        _dir: dir,
    }
}

pub fn endpoint(node: &Node) -> PeerEndpoint {
    PeerEndpoint::new(&node.name, "127.0.0.1", node.fabric.data_port() - 1)
}

/// Bring up `names.len()` nodes and join them into a full mesh, every node
/// included in its own peer map.
pub async fn cluster(names: &[&str], replication: ReplicationConfig) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(names.len());
    for name in names {
        nodes.push(node(name, replication.clone()).await);
    }
    for a in &nodes {
        for b in &nodes {
            a.fabric.on_join(endpoint(b)).await;
        }
    }
    // Let the routers process the joins.
    tokio::time::sleep(Duration::from_millis(100)).await;
    nodes
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
