// Peer messaging fabric - asynchronous request/response between nodes,
// pub/sub on inbound message kinds, and the per-peer connection lifecycle.
//
// Connections are not shareable across tasks, so every socket lives inside a
// single router task; these methods hand it commands over a channel and wait
// on oneshot replies where a result is expected.

mod router;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::codec::{Command, Frames};
use crate::error::{MecError, MecResult};

use router::{FabricCommand, Router};

/// Default wait for a single round trip on request-style operations.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound subscription buffer, per message kind.
const SUBSCRIPTION_BUFFER: usize = 1000;

const COMMAND_BUFFER: usize = 256;

/// A cluster member as the membership layer advertises it: stable name,
/// reachable address, gossip port. The data (router) port is `port + 1` by
/// convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(name: &str, host: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
        }
    }

    pub fn data_port(&self) -> u16 {
        self.port + 1
    }
}

/// Handle to the fabric. Clones share the same router task.
#[derive(Clone)]
pub struct PeerFabric {
    name: String,
    data_port: u16,
    cmd_tx: mpsc::Sender<FabricCommand>,
    subscriptions: Arc<Mutex<HashMap<Command, mpsc::Sender<Frames>>>>,
    peers: Arc<RwLock<HashMap<String, PeerEndpoint>>>,
}

impl PeerFabric {
    /// Bind the inbound router socket on `data_port` (0 picks an ephemeral
    /// port) and spawn the router task.
    pub async fn bind(name: &str, data_port: u16) -> MecResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", data_port))
            .await
            .map_err(|e| MecError::Transport(format!("bind router port {}: {}", data_port, e)))?;
        let data_port = listener
            .local_addr()
            .map_err(|e| MecError::Transport(e.to_string()))?
            .port();

        let subscriptions = Arc::new(Mutex::new(HashMap::new()));
        let peers = Arc::new(RwLock::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

        Router::spawn(
            name.to_string(),
            listener,
            subscriptions.clone(),
            peers.clone(),
            cmd_rx,
        );

        Ok(Self {
            name: name.to_string(),
            data_port,
            cmd_tx,
            subscriptions,
            peers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The actual router port, useful when bound ephemeral.
    pub fn data_port(&self) -> u16 {
        self.data_port
    }

    /// Register for inbound messages of `kind`. One active subscriber per
    /// kind; a second subscription replaces the first. Delivered frame sets
    /// include the routing prefix at frame 0.
    pub async fn subscribe(&self, kind: Command) -> mpsc::Receiver<Frames> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscriptions.lock().await.insert(kind, tx);
        rx
    }

    /// Fire-and-forget send to one peer.
    pub async fn send(&self, peer: &str, frames: Frames) {
        let _ = self
            .cmd_tx
            .send(FabricCommand::Send {
                peer: peer.to_string(),
                frames,
            })
            .await;
    }

    /// One round trip: send and wait for the peer's next reply on that
    /// connection, or time out.
    pub async fn request(&self, peer: &str, frames: Frames, timeout: Duration) -> MecResult<Frames> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(FabricCommand::Request {
                peer: peer.to_string(),
                frames,
                reply: reply_tx,
            })
            .await
            .map_err(|_| MecError::Transport("router task is gone".to_string()))?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MecError::Transport("request dropped".to_string())),
            Err(_) => Err(MecError::Transport(format!("request to {} timed out", peer))),
        }
    }

    /// Request every peer in parallel; gather whatever arrived within the
    /// timeout. Missing peers are simply absent from the result.
    pub async fn request_many(
        &self,
        peers: &[String],
        frames: Frames,
        timeout: Duration,
    ) -> HashMap<String, Frames> {
        let requests = peers.iter().map(|peer| {
            let fabric = self.clone();
            let frames = frames.clone();
            let peer = peer.clone();
            async move {
                let response = fabric.request(&peer, frames, timeout).await;
                (peer, response)
            }
        });
        futures::future::join_all(requests)
            .await
            .into_iter()
            .filter_map(|(peer, response)| response.ok().map(|frames| (peer, frames)))
            .collect()
    }

    /// Send to every known peer; returns how many sends were queued.
    pub async fn broadcast(&self, frames: Frames) -> usize {
        let (count_tx, count_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(FabricCommand::Broadcast {
                frames,
                queued: count_tx,
            })
            .await
            .is_err()
        {
            return 0;
        }
        count_rx.await.unwrap_or(0)
    }

    /// Uniformly shuffled list of current peer names.
    pub async fn random_peers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peers.read().await.keys().cloned().collect();
        names.shuffle(&mut rand::rng());
        names
    }

    /// Fire-and-forget to `n` random peers; returns how many were targeted.
    pub async fn send_random(&self, n: usize, frames: Frames) -> usize {
        let targets: Vec<String> = self.random_peers().await.into_iter().take(n).collect();
        for peer in &targets {
            self.send(peer, frames.clone()).await;
        }
        targets.len()
    }

    /// Request `n` random peers and count the replies whose first frame is
    /// GOOD. This is the write-ack path.
    pub async fn verify_random(&self, n: usize, frames: Frames) -> usize {
        let targets: Vec<String> = self.random_peers().await.into_iter().take(n).collect();
        let responses = self.request_many(&targets, frames, REQUEST_TIMEOUT).await;
        responses
            .values()
            .filter(|frames| {
                frames.first().and_then(|f| Command::parse(f)) == Some(Command::Good)
            })
            .count()
    }

    /// Request a random subset of size min(n, available) and gather replies.
    pub async fn random_responses(&self, n: usize, frames: Frames) -> HashMap<String, Frames> {
        let targets: Vec<String> = self.random_peers().await.into_iter().take(n).collect();
        self.request_many(&targets, frames, REQUEST_TIMEOUT).await
    }

    /// Send a response on the inbound socket, routed back to the originator
    /// by the routing prefix captured at receive time (frame 0).
    pub async fn reply(&self, frames: Frames) {
        let _ = self.cmd_tx.send(FabricCommand::Reply { frames }).await;
    }

    /// Membership callback: a node joined. Connects a dealer to its router
    /// port and registers it. Idempotent for already-known peers.
    pub async fn on_join(&self, peer: PeerEndpoint) {
        let _ = self.cmd_tx.send(FabricCommand::Join { peer }).await;
    }

    /// Membership callback: a node left. Drops its connection and
    /// deregisters it.
    pub async fn on_leave(&self, name: &str) {
        let _ = self
            .cmd_tx
            .send(FabricCommand::Leave {
                name: name.to_string(),
            })
            .await;
    }
}
