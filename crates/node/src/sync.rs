//! Metadata synchronization over `/metadata/1` streams.
//!
//! One newline-terminated JSON store each way. The initiator sends first;
//! the responder merges what it read before replying with its own (now
//! merged) store, so a single handshake converges both sides. The first
//! time a responder completes an exchange with a peer it schedules one
//! reverse sync toward it, closing the gossip loop when only one side ever
//! initiates.

use std::io;

use libp2p::PeerId;
use meshsync_crdt::MetadataStore;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::{journal, Node};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Writes one store record: compact JSON plus the newline terminator.
/// serde_json escapes every control byte inside string values, so the
/// newline cannot occur before the terminator.
pub async fn send_store<S>(stream: &mut S, store: &MetadataStore) -> Result<(), SyncError>
where
    S: AsyncWrite + Unpin,
{
    let mut payload = serde_json::to_vec(store)?;
    payload.push(b'\n');

    stream.write_all(&payload).await?;
    stream.flush().await?;

    Ok(())
}

/// Reads one store record. Versions whose id does not match their
/// recomputed hash are rejected before the store reaches the caller.
pub async fn recv_store<S>(stream: &mut S) -> Result<MetadataStore, SyncError>
where
    S: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();

    let read = stream.read_until(b'\n', &mut line).await?;

    if read == 0 {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }

    let mut store: MetadataStore = serde_json::from_slice(&line)?;

    let rejected = store.retain_verified();
    if rejected > 0 {
        warn!(rejected, "Rejected tampered versions in metadata payload");
    }

    Ok(store)
}

impl Node {
    /// Initiator role: send our store, merge the reply, persist.
    ///
    /// The local store is only touched once the full reply parsed; a failed
    /// exchange leaves it as it was, and re-discovery drives the retry.
    pub async fn initiate_sync(&self, peer_id: PeerId) -> eyre::Result<()> {
        info!(%peer_id, "Syncing metadata to peer");

        let mut stream = self
            .network()
            .open_stream(peer_id, meshsync_network::METADATA_PROTOCOL)
            .await?;

        let snapshot = self.store_snapshot()?;
        send_store(&mut stream, &snapshot).await?;

        let remote = recv_store(&mut stream).await?;

        let merged = self.merge_store(&remote)?;
        journal::save(self.config().journal.as_std_path(), &merged).await?;

        stream.shutdown().await?;

        info!(%peer_id, files = merged.len(), "Metadata sync complete");

        Ok(())
    }

    /// Responder role: merge the initiator's store, persist, reply with the
    /// merged store, then schedule a reverse sync on first contact.
    pub async fn respond_sync(
        &self,
        peer_id: PeerId,
        mut stream: meshsync_network::Stream,
    ) -> eyre::Result<()> {
        let remote = recv_store(&mut stream).await?;

        debug!(%peer_id, files = remote.len(), "Received metadata from peer");

        let merged = self.merge_store(&remote)?;
        journal::save(self.config().journal.as_std_path(), &merged).await?;

        send_store(&mut stream, &merged).await?;
        stream.shutdown().await?;

        if self.first_sync_with(peer_id)? {
            info!(%peer_id, "First exchange with peer, scheduling reverse sync");

            let node = self.clone();
            let _handle = self.tracker().spawn(async move {
                if let Err(err) = node.initiate_sync(peer_id).await {
                    error!(%peer_id, %err, "Reverse sync failed");
                }
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use meshsync_crdt::{FileMetadata, FileVersion};
    use meshsync_network::Client;
    use tokio::io::BufStream;

    use super::*;
    use crate::NodeConfig;

    fn test_node() -> Node {
        let config = NodeConfig {
            shared_root: "shared".into(),
            staging_root: "TransferredFiles".into(),
            journal: "sync-metadata.json".into(),
            encrypt: false,
            transfer_key: None,
        };

        Node::new(
            config,
            Client::detached(PeerId::random()),
            MetadataStore::new(),
        )
    }

    fn store_with(file: &str, versions: &[&FileVersion]) -> MetadataStore {
        let mut store = MetadataStore::new();
        for version in versions {
            store.entry(file).add_version((*version).clone());
        }
        store
    }

    /// Full handshake between two in-memory stores over a duplex pipe.
    async fn handshake(
        initiator: MetadataStore,
        responder: MetadataStore,
    ) -> (MetadataStore, MetadataStore) {
        let (a, b) = tokio::io::duplex(1024 * 1024);

        let responder_task = tokio::spawn(async move {
            let mut stream = BufStream::new(b);

            let remote = recv_store(&mut stream).await.unwrap();
            let merged = MetadataStore::merge(&responder, &remote);
            send_store(&mut stream, &merged).await.unwrap();

            merged
        });

        let mut stream = BufStream::new(a);

        send_store(&mut stream, &initiator).await.unwrap();
        let reply = recv_store(&mut stream).await.unwrap();
        let initiator_merged = MetadataStore::merge(&initiator, &reply);

        let responder_merged = responder_task.await.unwrap();

        (initiator_merged, responder_merged)
    }

    #[tokio::test]
    async fn test_store_framing_round_trip() {
        let v = FileVersion::new("peer-a", "with\nnewline", "cid", vec![]);
        let store = store_with("f", &[&v]);

        let (a, b) = tokio::io::duplex(64 * 1024);

        let mut writer = BufStream::new(a);
        send_store(&mut writer, &store).await.unwrap();

        let mut reader = BufStream::new(b);
        let received = recv_store(&mut reader).await.unwrap();

        assert_eq!(received, store);
    }

    #[tokio::test]
    async fn test_handshake_converges_forked_replicas() {
        // Peer A: {v0, v1<-v0}; peer B: {v0, v2<-v0}. One handshake must
        // leave both with {v0, v1, v2} and heads sorted({v1, v2}).
        let v0 = FileVersion::new("peer-a", "root", "cid0", vec![]);
        let v1 = FileVersion::new("peer-a", "a edit", "cid1", vec![v0.version_id.clone()]);
        let v2 = FileVersion::new("peer-b", "b edit", "cid2", vec![v0.version_id.clone()]);

        let a = store_with("f", &[&v0, &v1]);
        let b = store_with("f", &[&v0, &v2]);

        let (on_a, on_b) = handshake(a, b).await;

        assert_eq!(on_a, on_b);

        let meta = on_a.get("f").unwrap();
        assert_eq!(meta.versions.len(), 3);

        let mut expected = vec![v1.version_id, v2.version_id];
        expected.sort();
        assert_eq!(meta.heads(), expected);
    }

    #[tokio::test]
    async fn test_second_handshake_changes_nothing() {
        let v0 = FileVersion::new("peer-a", "root", "cid0", vec![]);
        let v1 = FileVersion::new("peer-a", "a edit", "cid1", vec![v0.version_id.clone()]);
        let v2 = FileVersion::new("peer-b", "b edit", "cid2", vec![v0.version_id.clone()]);

        let a = store_with("f", &[&v0, &v1]);
        let b = store_with("f", &[&v0, &v2]);

        let (on_a, on_b) = handshake(a, b).await;
        let (again_a, again_b) = handshake(on_a.clone(), on_b.clone()).await;

        assert_eq!(again_a, on_a);
        assert_eq!(again_b, on_b);
    }

    #[test]
    fn test_reverse_sync_is_scheduled_once_per_peer() {
        let node = test_node();

        let peer = PeerId::random();

        // The first completed exchange with a peer schedules the reverse
        // sync; every later exchange with the same peer must not.
        assert!(node.first_sync_with(peer).unwrap());
        assert!(!node.first_sync_with(peer).unwrap());
        assert!(!node.first_sync_with(peer).unwrap());

        // The set is keyed per peer, not global.
        let other = PeerId::random();
        assert!(node.first_sync_with(other).unwrap());
        assert!(!node.first_sync_with(other).unwrap());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let (a, b) = tokio::io::duplex(64 * 1024);

        let mut writer = BufStream::new(a);
        writer.write_all(b"{ not json }\n").await.unwrap();
        writer.flush().await.unwrap();

        let mut reader = BufStream::new(b);

        assert!(matches!(
            recv_store(&mut reader).await,
            Err(SyncError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        drop(a);

        let mut reader = BufStream::new(b);

        assert!(matches!(
            recv_store(&mut reader).await,
            Err(SyncError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_versions_are_dropped_on_receive() {
        let good = FileVersion::new("peer-a", "good", "cid", vec![]);
        let mut bad = FileVersion::new("peer-b", "bad", "cid", vec![]);
        bad.content_id = "forged".to_owned();

        let mut meta = FileMetadata::new("f");
        meta.add_version(good.clone());
        meta.add_version(bad.clone());

        let mut store = MetadataStore::new();
        *store.entry("f") = meta;

        let (a, b) = tokio::io::duplex(64 * 1024);

        let mut writer = BufStream::new(a);
        send_store(&mut writer, &store).await.unwrap();

        let mut reader = BufStream::new(b);
        let received = recv_store(&mut reader).await.unwrap();

        let meta = received.get("f").unwrap();
        assert!(meta.versions.contains_key(&good.version_id));
        assert!(!meta.versions.contains_key(&bad.version_id));
    }
}
