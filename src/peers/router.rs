// The router task - sole owner of every socket in the fabric.
// Public fabric methods cross into this task via FabricCommand; replies
// travel back over per-request oneshot channels.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::codec::{Command, Frames};
use crate::error::{MecError, MecResult};

use super::wire;
use super::PeerEndpoint;

pub(super) enum FabricCommand {
    Send {
        peer: String,
        frames: Frames,
    },
    Request {
        peer: String,
        frames: Frames,
        reply: oneshot::Sender<MecResult<Frames>>,
    },
    Broadcast {
        frames: Frames,
        queued: oneshot::Sender<usize>,
    },
    Reply {
        frames: Frames,
    },
    Join {
        peer: PeerEndpoint,
    },
    Leave {
        name: String,
    },
}

enum SocketEvent {
    InboundFrames(u64, Frames),
    InboundClosed(u64),
    DealerFrames(String, Frames),
    DealerClosed(String),
}

/// Outbound side of one peer. Replies are correlated FIFO: the transport
/// preserves per-peer ordering, so the next frame set read off this
/// connection answers the oldest outstanding request.
struct Dealer {
    outbound: mpsc::UnboundedSender<Frames>,
    pending: VecDeque<oneshot::Sender<MecResult<Frames>>>,
}

pub(super) struct Router {
    name: String,
    dealers: HashMap<String, Dealer>,
    inbound: HashMap<u64, mpsc::UnboundedSender<Frames>>,
    next_token: u64,
    subscriptions: Arc<Mutex<HashMap<Command, mpsc::Sender<Frames>>>>,
    peers: Arc<RwLock<HashMap<String, PeerEndpoint>>>,
    sock_tx: mpsc::UnboundedSender<SocketEvent>,
}

impl Router {
    /// Construct the router and spawn its task. The listener and both
    /// receivers live inside the task; everything socket-shaped stays there.
    pub(super) fn spawn(
        name: String,
        listener: TcpListener,
        subscriptions: Arc<Mutex<HashMap<Command, mpsc::Sender<Frames>>>>,
        peers: Arc<RwLock<HashMap<String, PeerEndpoint>>>,
        cmd_rx: mpsc::Receiver<FabricCommand>,
    ) {
        let (sock_tx, sock_rx) = mpsc::unbounded_channel();
        let router = Self {
            name,
            dealers: HashMap::new(),
            inbound: HashMap::new(),
            next_token: 1,
            subscriptions,
            peers,
            sock_tx,
        };
        tokio::spawn(router.run(listener, cmd_rx, sock_rx));
    }

    async fn run(
        mut self,
        listener: TcpListener,
        mut cmd_rx: mpsc::Receiver<FabricCommand>,
        mut sock_rx: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    // Fabric dropped; router winds down.
                    None => break,
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.on_accept(stream, addr),
                    Err(err) => warn!("{}: accept failed: {}", self.name, err),
                },
                Some(event) = sock_rx.recv() => self.on_socket_event(event).await,
            }
        }
        debug!("{}: router task exiting", self.name);
    }

    async fn on_command(&mut self, cmd: FabricCommand) {
        match cmd {
            FabricCommand::Send { peer, frames } => {
                match self.dealers.get(&peer) {
                    Some(dealer) => {
                        let _ = dealer.outbound.send(frames);
                    }
                    None => warn!("{}: send to unknown peer {}", self.name, peer),
                }
            }
            FabricCommand::Request { peer, frames, reply } => {
                match self.dealers.get_mut(&peer) {
                    Some(dealer) => {
                        if dealer.outbound.send(frames).is_ok() {
                            dealer.pending.push_back(reply);
                        } else {
                            let _ = reply.send(Err(MecError::Transport(format!(
                                "connection to {} is down",
                                peer
                            ))));
                        }
                    }
                    None => {
                        let _ = reply.send(Err(MecError::Transport(format!(
                            "unknown peer {}",
                            peer
                        ))));
                    }
                }
            }
            FabricCommand::Broadcast { frames, queued } => {
                let count = self
                    .dealers
                    .values()
                    .filter(|dealer| dealer.outbound.send(frames.clone()).is_ok())
                    .count();
                let _ = queued.send(count);
            }
            FabricCommand::Reply { frames } => self.on_reply(frames),
            FabricCommand::Join { peer } => self.on_join(peer).await,
            FabricCommand::Leave { name } => self.on_leave(&name).await,
        }
    }

    /// Route a response back to the originating inbound connection. Frame 0
    /// is the routing token captured at receive time.
    fn on_reply(&mut self, frames: Frames) {
        let Some((token_frame, rest)) = frames.split_first() else {
            warn!("{}: reply with no routing frame", self.name);
            return;
        };
        let Ok(token_bytes) = <[u8; 8]>::try_from(token_frame.as_slice()) else {
            warn!("{}: reply with malformed routing frame", self.name);
            return;
        };
        let token = u64::from_be_bytes(token_bytes);
        match self.inbound.get(&token) {
            Some(out) => {
                let _ = out.send(rest.to_vec());
            }
            // Requester hung up; nothing to do.
            None => debug!("{}: reply to closed connection {}", self.name, token),
        }
    }

    async fn on_join(&mut self, peer: PeerEndpoint) {
        if self.dealers.contains_key(&peer.name) {
            debug!("{}: peer {} already connected", self.name, peer.name);
            return;
        }
        let addr = (peer.host.as_str(), peer.data_port());
        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(err) => {
                // No retry: the peer stays absent until the next join event.
                error!(
                    "{}: cannot connect to {} at {}:{}: {}",
                    self.name,
                    peer.name,
                    peer.host,
                    peer.data_port(),
                    err
                );
                return;
            }
        };
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(dealer_read_task(read, self.sock_tx.clone(), peer.name.clone()));
        tokio::spawn(write_task(write, out_rx));
        self.dealers.insert(
            peer.name.clone(),
            Dealer {
                outbound: out_tx,
                pending: VecDeque::new(),
            },
        );
        info!(
            "{}: peer joined: {} at {}:{}",
            self.name,
            peer.name,
            peer.host,
            peer.port
        );
        self.peers.write().await.insert(peer.name.clone(), peer);
    }

    async fn on_leave(&mut self, name: &str) {
        if let Some(mut dealer) = self.dealers.remove(name) {
            for pending in dealer.pending.drain(..) {
                let _ = pending.send(Err(MecError::Transport(format!("peer {} left", name))));
            }
            info!("{}: peer left: {}", self.name, name);
        }
        self.peers.write().await.remove(name);
    }

    fn on_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let token = self.next_token;
        self.next_token += 1;
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.inbound.insert(token, out_tx);
        tokio::spawn(inbound_read_task(read, self.sock_tx.clone(), token));
        tokio::spawn(write_task(write, out_rx));
        debug!("{}: inbound connection {} from {}", self.name, token, addr);
    }

    async fn on_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::InboundFrames(token, frames) => {
                let Some(cmd) = frames.first().and_then(|f| Command::parse(f)) else {
                    warn!("{}: inbound message with unknown command, dropping", self.name);
                    return;
                };
                let mut delivery: Frames = Vec::with_capacity(frames.len() + 1);
                delivery.push(token.to_be_bytes().to_vec());
                delivery.extend(frames);
                let subscriptions = self.subscriptions.lock().await;
                match subscriptions.get(&cmd) {
                    Some(tx) => {
                        if tx.try_send(delivery).is_err() {
                            warn!(
                                "{}: subscriber for {} unavailable, dropping message",
                                self.name,
                                cmd.as_str()
                            );
                        }
                    }
                    None => {
                        warn!("{}: no subscriber for {}, dropping message", self.name, cmd.as_str())
                    }
                }
            }
            SocketEvent::InboundClosed(token) => {
                self.inbound.remove(&token);
            }
            SocketEvent::DealerFrames(name, frames) => {
                let Some(dealer) = self.dealers.get_mut(&name) else {
                    return;
                };
                match dealer.pending.pop_front() {
                    // A dropped receiver means the caller timed out; the
                    // reply is discarded either way.
                    Some(reply) => {
                        let _ = reply.send(Ok(frames));
                    }
                    None => warn!("{}: unsolicited reply from {}", self.name, name),
                }
            }
            SocketEvent::DealerClosed(name) => {
                if let Some(mut dealer) = self.dealers.remove(&name) {
                    for pending in dealer.pending.drain(..) {
                        let _ = pending.send(Err(MecError::Transport(format!(
                            "connection to {} closed",
                            name
                        ))));
                    }
                    warn!("{}: peer connection closed: {}", self.name, name);
                }
                self.peers.write().await.remove(&name);
            }
        }
    }
}

async fn write_task(mut write: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frames>) {
    while let Some(frames) = rx.recv().await {
        if wire::write_frames(&mut write, &frames).await.is_err() {
            break;
        }
    }
}

async fn inbound_read_task(
    mut read: OwnedReadHalf,
    events: mpsc::UnboundedSender<SocketEvent>,
    token: u64,
) {
    loop {
        match wire::read_frames(&mut read).await {
            Ok(frames) => {
                if events.send(SocketEvent::InboundFrames(token, frames)).is_err() {
                    break;
                }
            }
            Err(_) => {
                let _ = events.send(SocketEvent::InboundClosed(token));
                break;
            }
        }
    }
}

async fn dealer_read_task(
    mut read: OwnedReadHalf,
    events: mpsc::UnboundedSender<SocketEvent>,
    name: String,
) {
    loop {
        match wire::read_frames(&mut read).await {
            Ok(frames) => {
                if events
                    .send(SocketEvent::DealerFrames(name.clone(), frames))
                    .is_err()
                {
                    break;
                }
            }
            Err(_) => {
                let _ = events.send(SocketEvent::DealerClosed(name));
                break;
            }
        }
    }
}
