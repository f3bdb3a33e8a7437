//! Node orchestration.
//!
//! [`Node`] packages everything the stream handlers need: the metadata
//! store, the peer and file bookkeeping maps, the network client and the
//! shutdown plumbing. It is cheap to clone; every spawned task gets its own
//! handle. Locks guard in-memory state only and are never held across I/O.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use eyre::eyre;
use libp2p::{Multiaddr, PeerId};
use meshsync_crdt::MetadataStore;
use meshsync_crypto::SharedKey;
use meshsync_network::Client;
use meshsync_transfer::Progress;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub mod announce;
pub mod config;
pub mod interactive_cli;
pub mod journal;
pub mod run;
pub mod scan;
pub mod sync;

/// Runtime settings resolved from the config file and CLI flags.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Source tree for outbound transfers.
    pub shared_root: Utf8PathBuf,
    /// Staging root for inbound transfers.
    pub staging_root: Utf8PathBuf,
    /// Metadata journal file.
    pub journal: Utf8PathBuf,
    /// Whether transfers this node initiates ask for encryption.
    pub encrypt: bool,
    /// Key for sealed transfers, shared across the group out of band.
    pub transfer_key: Option<SharedKey>,
}

#[derive(Clone)]
pub struct Node {
    config: Arc<NodeConfig>,
    network: Client,
    store: Arc<Mutex<MetadataStore>>,
    known_peers: Arc<Mutex<HashMap<PeerId, Multiaddr>>>,
    known_files: Arc<Mutex<HashMap<String, Vec<String>>>>,
    synced_peers: Arc<Mutex<HashSet<PeerId>>>,
    progress: Progress,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Node {
    pub fn new(config: NodeConfig, network: Client, store: MetadataStore) -> Self {
        Self {
            config: Arc::new(config),
            network,
            store: Arc::new(Mutex::new(store)),
            known_peers: Arc::new(Mutex::new(HashMap::new())),
            known_files: Arc::new(Mutex::new(HashMap::new())),
            synced_peers: Arc::new(Mutex::new(HashSet::new())),
            progress: Progress::new(),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn network(&self) -> &Client {
        &self.network
    }

    pub fn peer_id(&self) -> PeerId {
        self.network.local_peer_id()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Consistent snapshot of the metadata store.
    pub fn store_snapshot(&self) -> eyre::Result<MetadataStore> {
        let guard = self.store.lock().map_err(|err| eyre!("{err:?}"))?;

        Ok(guard.clone())
    }

    /// Merges `remote` into the local store and returns the result.
    ///
    /// The expensive union runs against a snapshot off-lock; the swap under
    /// the lock re-merges with whatever landed in between, which the CRDT
    /// makes safe and cheap.
    pub fn merge_store(&self, remote: &MetadataStore) -> eyre::Result<MetadataStore> {
        let snapshot = self.store_snapshot()?;

        let computed = MetadataStore::merge(&snapshot, remote);

        let mut guard = self.store.lock().map_err(|err| eyre!("{err:?}"))?;
        *guard = MetadataStore::merge(&guard, &computed);

        Ok(guard.clone())
    }

    /// Applies `mutate` to the store under the lock.
    pub fn with_store<T>(&self, mutate: impl FnOnce(&mut MetadataStore) -> T) -> eyre::Result<T> {
        let mut guard = self.store.lock().map_err(|err| eyre!("{err:?}"))?;

        Ok(mutate(&mut guard))
    }

    pub fn record_peer(&self, peer_id: PeerId, addr: Multiaddr) -> eyre::Result<()> {
        let mut guard = self.known_peers.lock().map_err(|err| eyre!("{err:?}"))?;

        let _prev = guard.insert(peer_id, addr);

        Ok(())
    }

    pub fn known_peer(&self, peer_id: &PeerId) -> eyre::Result<Option<Multiaddr>> {
        let guard = self.known_peers.lock().map_err(|err| eyre!("{err:?}"))?;

        Ok(guard.get(peer_id).cloned())
    }

    /// Marks `peer_id` as reverse-synced; true on first contact. The set is
    /// process-lifetime, never evicted, so the reverse sync fires at most
    /// once per peer.
    pub fn first_sync_with(&self, peer_id: PeerId) -> eyre::Result<bool> {
        let mut guard = self.synced_peers.lock().map_err(|err| eyre!("{err:?}"))?;

        Ok(guard.insert(peer_id))
    }

    pub fn record_announcement(&self, peer_id: String, files: Vec<String>) -> eyre::Result<()> {
        let mut guard = self.known_files.lock().map_err(|err| eyre!("{err:?}"))?;

        let _prev = guard.insert(peer_id, files);

        Ok(())
    }

    pub fn known_files_snapshot(&self) -> eyre::Result<HashMap<String, Vec<String>>> {
        let guard = self.known_files.lock().map_err(|err| eyre!("{err:?}"))?;

        Ok(guard.clone())
    }

    /// First peer advertising `path`, skipping ourselves. Announced folders
    /// carry a trailing slash, which requesters may omit.
    pub fn find_provider(&self, path: &str) -> eyre::Result<Option<PeerId>> {
        let local = self.peer_id().to_string();

        let guard = self.known_files.lock().map_err(|err| eyre!("{err:?}"))?;

        for (peer, files) in guard.iter() {
            if *peer == local {
                continue;
            }

            if files
                .iter()
                .any(|entry| entry == path || entry.trim_end_matches('/') == path)
            {
                return Ok(peer.parse().ok());
            }
        }

        Ok(None)
    }
}
