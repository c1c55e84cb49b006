use std::sync::Arc;

use crate::{
    config::Config,
    coordinator::Coordinator,
    membership::Membership,
    peers::{PeerEndpoint, PeerFabric},
    store::LocalStore,
};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub membership: Arc<Membership>,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        // Local store first, then the fabric on the data port (gossip + 1).
        let store = LocalStore::open(&config.root)?;
        let fabric = PeerFabric::bind(&config.name, config.port + 1).await?;

        let coordinator = Coordinator::new(store, fabric.clone(), config.replication.clone());
        coordinator.listen().await;

        // Announce ourselves and greet the configured seeds.
        let local = PeerEndpoint::new(&config.name, "127.0.0.1", config.port);
        let membership = Membership::start(fabric, local, config.nodes.clone()).await;

        Ok(Self {
            coordinator,
            membership: Arc::new(membership),
            config,
        })
    }
}
