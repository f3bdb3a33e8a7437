use libp2p::identity;
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct NetworkConfig {
    pub identity: identity::Keypair,
    pub swarm: SwarmConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub listen: Vec<Multiaddr>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "bool_true")]
    pub mdns: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { mdns: true }
    }
}

fn bool_true() -> bool {
    true
}
