//! Metadata journal: the on-disk copy of the store, reloaded at startup and
//! rewritten after every successful merge.

use std::io;
use std::path::Path;

use meshsync_crdt::MetadataStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("unsupported journal schema version {0}")]
    SchemaVersion(u32),
}

/// Envelope around the store so the on-disk schema can evolve without
/// guessing; the wire format stays the bare store map.
#[derive(Debug, Serialize, Deserialize)]
struct Journal {
    schema_version: u32,
    store: MetadataStore,
}

/// Loads the journal, treating a missing file as an empty store.
pub async fn load(path: &Path) -> Result<MetadataStore, JournalError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No metadata journal yet, starting empty");
            return Ok(MetadataStore::new());
        }
        Err(err) => return Err(err.into()),
    };

    let journal: Journal = serde_json::from_slice(&raw)?;

    if journal.schema_version != SCHEMA_VERSION {
        return Err(JournalError::SchemaVersion(journal.schema_version));
    }

    debug!(path = %path.display(), files = journal.store.len(), "Loaded metadata journal");

    Ok(journal.store)
}

/// Rewrites the journal with a pretty-printed snapshot.
pub async fn save(path: &Path, store: &MetadataStore) -> Result<(), JournalError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let journal = Journal {
        schema_version: SCHEMA_VERSION,
        store: store.clone(),
    };

    let encoded = serde_json::to_vec_pretty(&journal)?;

    tokio::fs::write(path, encoded).await?;

    debug!(path = %path.display(), files = store.len(), "Saved metadata journal");

    Ok(())
}

#[cfg(test)]
mod tests {
    use meshsync_crdt::FileVersion;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync-metadata.json");

        let mut store = MetadataStore::new();
        store
            .entry("notes.txt")
            .add_version(FileVersion::new("peer-a", "initial import", "cid", vec![]));

        save(&path, &store).await.unwrap();
        let loaded = load(&path).await.unwrap();

        assert_eq!(loaded, store);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();

        let loaded = load(&dir.path().join("absent.json")).await.unwrap();

        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_schema_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync-metadata.json");

        std::fs::write(&path, r#"{"schema_version": 99, "store": {}}"#).unwrap();

        assert!(matches!(
            load(&path).await,
            Err(JournalError::SchemaVersion(99))
        ));
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync-metadata.json");

        save(&path, &MetadataStore::new()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["schema_version"], 1);
        assert!(value["store"].is_object());
        assert!(raw.contains('\n'), "journal is pretty-printed");
    }
}
