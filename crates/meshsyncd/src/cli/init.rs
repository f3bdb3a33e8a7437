use core::net::IpAddr;
use std::fs::create_dir_all;

use clap::Parser;
use eyre::{bail, Result as EyreResult};
use libp2p::identity::Keypair;
use meshsync_node::config::{ConfigFile, SyncConfig, DEFAULT_PORT};
use meshsync_network::config::{DiscoveryConfig, SwarmConfig};
use multiaddr::{Multiaddr, Protocol};
use rand::RngCore;
use tracing::{info, warn};

use crate::cli::RootArgs;

/// Initialize node configuration
#[derive(Debug, Parser)]
pub struct InitCommand {
    /// Host to listen on
    #[clap(long, value_name = "IP")]
    #[clap(default_value = "0.0.0.0,::")]
    #[clap(use_value_delimiter = true)]
    pub host: Vec<IpAddr>,

    /// Port to listen on
    #[clap(long, value_name = "PORT")]
    #[clap(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Enable mDNS discovery
    #[clap(long, default_value_t = true)]
    #[clap(overrides_with("no_mdns"))]
    pub mdns: bool,

    #[clap(long, hide = true)]
    #[clap(overrides_with("mdns"))]
    pub no_mdns: bool,

    /// Force initialization even if the directory already exists
    #[clap(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let mdns = self.mdns && !self.no_mdns;

        let home = &root_args.home;

        if !home.exists() {
            create_dir_all(home)?;
        }

        if ConfigFile::exists(home) {
            if self.force {
                warn!("Overriding existing configuration in {home:?}");
            } else {
                bail!("Node is already initialized in {home:?}");
            }
        }

        let identity = Keypair::generate_ed25519();
        info!("Generated identity: {:?}", identity.public().to_peer_id());

        let mut listen = Vec::with_capacity(self.host.len().saturating_mul(2));

        for host in self.host {
            let host = Multiaddr::from(host);
            listen.push(host.clone().with(Protocol::Tcp(self.port)));
            listen.push(
                host.with(Protocol::Udp(self.port))
                    .with(Protocol::QuicV1),
            );
        }

        // A key is always provisioned so `run -E` works out of the box;
        // copy the same value to every node in the group.
        let mut key = [0; 32];
        rand::thread_rng().fill_bytes(&mut key);

        let config = ConfigFile {
            identity,
            swarm: SwarmConfig { listen },
            discovery: DiscoveryConfig { mdns },
            sync: SyncConfig {
                encryption_key: Some(hex::encode(key)),
                ..SyncConfig::default()
            },
        };

        config.save(home)?;

        create_dir_all(home.join(&config.sync.shared_root))?;

        info!("Initialized node in {home:?}");

        Ok(())
    }
}
