//! Initial shared-root scan: every file without metadata gets a root
//! version, so freshly shared content enters the version graph before the
//! first exchange.

use meshsync_crdt::FileVersion;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{announce, journal, Node};

impl Node {
    /// Seeds a root version for each shared file the store has never seen.
    /// Returns how many versions were created; the journal is rewritten
    /// only when something changed.
    pub async fn seed_local_versions(&self) -> eyre::Result<usize> {
        let shared_root = self.config().shared_root.as_std_path();
        let author = self.peer_id().to_string();

        let mut seeded = 0;

        for path in announce::list_shared_paths(shared_root)? {
            if path.ends_with('/') {
                continue;
            }

            let known = self.with_store(|store| store.contains(&path))?;
            if known {
                continue;
            }

            let contents = tokio::fs::read(shared_root.join(&path)).await?;
            let content_id = hex::encode(Sha256::digest(&contents));

            let version = FileVersion::new(&author, "initial import", content_id, vec![]);

            debug!(path, version_id = version.version_id, "Seeding local version");

            self.with_store(|store| store.entry(&path).add_version(version))?;

            seeded += 1;
        }

        if seeded > 0 {
            let snapshot = self.store_snapshot()?;
            journal::save(self.config().journal.as_std_path(), &snapshot).await?;

            info!(seeded, "Created versions for newly shared files");
        }

        Ok(seeded)
    }
}
