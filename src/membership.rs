// Seed-based cluster membership - the minimal stand-in for a gossip layer.
// On startup the node announces itself to its own fabric, then greets every
// configured seed with a HELLO and registers the peer described in the
// mirrored reply. Inbound HELLOs register the greeter the same way.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{Command, Frames};
use crate::config::SeedNode;
use crate::error::{MecError, MecResult};
use crate::peers::{wire, PeerEndpoint, PeerFabric, REQUEST_TIMEOUT};

const SEED_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Membership {
    fabric: PeerFabric,
}

impl Membership {
    /// Announce the local node, serve inbound HELLOs, and greet each seed in
    /// the background (retrying until it answers, as seeds may start later).
    pub async fn start(fabric: PeerFabric, local: PeerEndpoint, seeds: Vec<SeedNode>) -> Self {
        let hellos = fabric.subscribe(Command::Hello).await;
        fabric.on_join(local.clone()).await;
        info!("{}: joined as {}:{}", local.name, local.host, local.port);

        tokio::spawn(serve_hellos(fabric.clone(), local.clone(), hellos));
        for seed in seeds {
            tokio::spawn(greet_seed(fabric.clone(), local.clone(), seed));
        }

        Self { fabric }
    }

    /// Leave callback from the failure-detection layer.
    pub async fn on_leave(&self, name: &str) {
        self.fabric.on_leave(name).await;
    }
}

fn hello_msg(endpoint: &PeerEndpoint) -> Frames {
    vec![
        Command::Hello.as_str().as_bytes().to_vec(),
        endpoint.name.as_bytes().to_vec(),
        endpoint.host.as_bytes().to_vec(),
        endpoint.port.to_string().into_bytes(),
    ]
}

fn parse_hello(naked: bool, frames: &Frames) -> MecResult<PeerEndpoint> {
    let at = if naked { 0 } else { 1 };
    if frames.len() < at + 4 || Command::parse(&frames[at]) != Some(Command::Hello) {
        return Err(MecError::Parse("not a HELLO message".to_string()));
    }
    let name = String::from_utf8(frames[at + 1].clone())
        .map_err(|_| MecError::Parse("peer name is not utf-8".to_string()))?;
    let host = String::from_utf8(frames[at + 2].clone())
        .map_err(|_| MecError::Parse("peer host is not utf-8".to_string()))?;
    let port: u16 = std::str::from_utf8(&frames[at + 3])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| MecError::Parse("peer port is not a number".to_string()))?;
    if name.is_empty() {
        return Err(MecError::Parse("peer name is empty".to_string()));
    }
    Ok(PeerEndpoint::new(&name, &host, port))
}

async fn serve_hellos(fabric: PeerFabric, local: PeerEndpoint, mut hellos: mpsc::Receiver<Frames>) {
    while let Some(frames) = hellos.recv().await {
        match parse_hello(false, &frames) {
            Ok(peer) => {
                debug!("{}: HELLO from {}", local.name, peer.name);
                fabric.on_join(peer).await;
                let mut reply = vec![frames[0].clone()];
                reply.extend(hello_msg(&local));
                fabric.reply(reply).await;
            }
            Err(err) => warn!("{}: dropping malformed HELLO: {}", local.name, err),
        }
    }
}

async fn greet_seed(fabric: PeerFabric, local: PeerEndpoint, seed: SeedNode) {
    loop {
        match hello_exchange(&local, &seed).await {
            Ok(peer) => {
                fabric.on_join(peer).await;
                return;
            }
            Err(err) => {
                debug!(
                    "{}: seed {}:{} not reachable yet: {}",
                    local.name, seed.host, seed.port, err
                );
                tokio::time::sleep(SEED_RETRY_DELAY).await;
            }
        }
    }
}

/// One transient framed connection to the seed's data port: send our HELLO,
/// read the mirrored one back.
async fn hello_exchange(local: &PeerEndpoint, seed: &SeedNode) -> MecResult<PeerEndpoint> {
    let mut stream = TcpStream::connect((seed.host.as_str(), seed.port + 1))
        .await
        .map_err(|e| MecError::Transport(format!("connect seed: {}", e)))?;
    wire::write_frames(&mut stream, &hello_msg(local))
        .await
        .map_err(|e| MecError::Transport(format!("greet seed: {}", e)))?;
    let frames = tokio::time::timeout(REQUEST_TIMEOUT, wire::read_frames(&mut stream))
        .await
        .map_err(|_| MecError::Transport("seed HELLO timed out".to_string()))?
        .map_err(|e| MecError::Transport(format!("read seed HELLO: {}", e)))?;
    parse_hello(true, &frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_hello_roundtrip() {
        let endpoint = PeerEndpoint::new("n1", "127.0.0.1", 7946);
        let frames = hello_msg(&endpoint);
        assert_eq!(parse_hello(true, &frames).unwrap(), endpoint);

        let mut prefixed = vec![0u64.to_be_bytes().to_vec()];
        prefixed.extend(frames);
        assert_eq!(parse_hello(false, &prefixed).unwrap(), endpoint);
    }

    #[test]
    fn test_hello_rejects_garbage() {
        assert!(parse_hello(true, &vec![b"HELLO".to_vec()]).is_err());
        let bad_port = vec![
            b"HELLO".to_vec(),
            b"n1".to_vec(),
            b"127.0.0.1".to_vec(),
            b"not-a-port".to_vec(),
        ];
        assert!(parse_hello(true, &bad_port).is_err());
    }

    #[tokio::test]
    async fn test_two_nodes_discover_each_other() {
        let a = PeerFabric::bind("a", 0).await.unwrap();
        let b = PeerFabric::bind("b", 0).await.unwrap();
        let a_local = PeerEndpoint::new("a", "127.0.0.1", a.data_port() - 1);
        let b_local = PeerEndpoint::new("b", "127.0.0.1", b.data_port() - 1);

        let _ma = Membership::start(a.clone(), a_local.clone(), vec![]).await;
        let _mb = Membership::start(
            b.clone(),
            b_local,
            vec![SeedNode {
                host: "127.0.0.1".to_string(),
                port: a_local.port,
            }],
        )
        .await;

        // Both sides should end up with both names (self included).
        for _ in 0..50 {
            if a.random_peers().await.len() == 2 && b.random_peers().await.len() == 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "discovery incomplete: a={:?} b={:?}",
            a.random_peers().await,
            b.random_peers().await
        );
    }
}
