use clap::Parser;
use eyre::{bail, Result as EyreResult};
use meshsync_node::config::ConfigFile;
use meshsync_node::run::start;

use crate::cli::RootArgs;

/// Run a node
#[derive(Debug, Parser)]
pub struct RunCommand {
    /// Request encrypted transfers for downloads this node initiates
    #[clap(short = 'E', long)]
    pub encrypt: bool,
}

impl RunCommand {
    pub async fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let home = &root_args.home;

        if !ConfigFile::exists(home) {
            bail!("Node is not initialized in {home:?}");
        }

        let config = ConfigFile::load(home)?;

        let node_config = config.node_config(home, self.encrypt)?;
        let network_config = config.network_config();

        start(node_config, network_config).await
    }
}
