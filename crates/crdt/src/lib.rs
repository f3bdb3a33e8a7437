//! Version graph CRDT for file metadata
//!
//! Each file is tracked as a Git-like DAG of immutable [`FileVersion`]s,
//! content-addressed by a SHA-256 hash over their own fields. Replicas
//! converge by merging version maps and head sets; the merge is commutative,
//! associative and idempotent, so no coordination between peers is needed.
//!
//! The crate is pure in-memory data and operations. Persistence and wire
//! exchange live with the callers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(test)]
mod tests;

/// One observed state of a file, identified by the hash of its own fields.
///
/// Versions are immutable once constructed. A version with no parents is a
/// root; a version with two or more parents is a merge commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub version_id: String,
    pub parent_ids: Vec<String>,
    pub author: String,
    #[serde(with = "canonical_time")]
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "cid")]
    pub content_id: String,
}

impl FileVersion {
    /// Creates a version authored now, deriving its id from the canonical
    /// serialization of the remaining fields.
    pub fn new(
        author: impl Into<String>,
        message: impl Into<String>,
        content_id: impl Into<String>,
        parent_ids: Vec<String>,
    ) -> Self {
        let mut version = Self {
            version_id: String::new(),
            parent_ids,
            author: author.into(),
            timestamp: Utc::now(),
            message: message.into(),
            content_id: content_id.into(),
        };

        version.version_id = version.computed_id();
        version
    }

    /// Recomputes the content hash over every field except the id itself.
    ///
    /// Hash input layout is fixed: parents in given order, author, canonical
    /// timestamp, message, content id. Each field is fed as its JSON string
    /// literal, so a raw 0x0A can never occur inside a part, making `\n` a
    /// safe separator.
    pub fn computed_id(&self) -> String {
        let mut parts = Vec::with_capacity(self.parent_ids.len() + 4);

        for parent in &self.parent_ids {
            parts.push(json_literal(parent));
        }

        parts.push(json_literal(&self.author));
        parts.push(json_literal(&canonical_timestamp(&self.timestamp)));
        parts.push(json_literal(&self.message));
        parts.push(json_literal(&self.content_id));

        let digest = Sha256::digest(parts.join("\n").as_bytes());

        hex::encode(digest)
    }

    /// Whether the stored id matches the recomputed hash. A mismatch means
    /// the version was tampered with in transit or at rest.
    pub fn verify_id(&self) -> bool {
        self.version_id == self.computed_id()
    }

    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }
}

/// Canonical string form of a version timestamp: RFC 3339, UTC `Z` suffix,
/// fixed nanosecond precision.
pub fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn json_literal(value: &str) -> String {
    serde_json::to_string(value).expect("string serialization is infallible")
}

mod canonical_time {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::canonical_timestamp(timestamp))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(de::Error::custom)
    }
}

/// Per-file view of the version DAG: every version seen so far, plus the
/// current heads (versions no other local version lists as a parent).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_name: String,
    pub versions: BTreeMap<String, FileVersion>,
    pub heads: Vec<String>,
}

impl FileMetadata {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            versions: BTreeMap::new(),
            heads: Vec::new(),
        }
    }

    /// Inserts a version and advances the head set: parents of the new
    /// version stop being heads, the new version becomes one unless some
    /// already-known version lists it as a parent (out-of-order arrival).
    /// Inserting an already-known id is a no-op.
    ///
    /// Parents need not be present yet; they may arrive through a later
    /// merge, and dangling references are tolerated until they do.
    pub fn add_version(&mut self, version: FileVersion) {
        if self.versions.contains_key(&version.version_id) {
            return;
        }

        self.heads
            .retain(|head| !version.parent_ids.contains(head));

        let id = version.version_id.clone();

        let superseded = self
            .versions
            .values()
            .any(|known| known.parent_ids.contains(&id));

        let _prev = self.versions.insert(id.clone(), version);

        if !superseded {
            self.heads.push(id);
            self.heads.sort();
            self.heads.dedup();
        }
    }

    /// Heads in lexicographic order, for deterministic serialization.
    pub fn heads(&self) -> &[String] {
        &self.heads
    }

    /// CRDT merge of two replicas of the same file.
    ///
    /// Versions are unioned by id (equal ids imply equal content, either
    /// copy may be kept). Heads are unioned and then reduced: an id listed
    /// as a parent by any merged version is no longer a head.
    pub fn merge(local: &Self, remote: &Self) -> Self {
        let mut versions = local.versions.clone();

        for (id, version) in &remote.versions {
            let _prev = versions
                .entry(id.clone())
                .or_insert_with(|| version.clone());
        }

        let mut heads: BTreeSet<String> = local.heads.iter().cloned().collect();
        heads.extend(remote.heads.iter().cloned());

        for version in versions.values() {
            for parent in &version.parent_ids {
                let _was_head = heads.remove(parent);
            }
        }

        Self {
            file_name: local.file_name.clone(),
            versions,
            heads: heads.into_iter().collect(),
        }
    }
}

/// Mapping of file name to its version graph; one per peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataStore {
    files: BTreeMap<String, FileMetadata>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<&FileMetadata> {
        self.files.get(file_name)
    }

    /// The metadata entry for `file_name`, created on first observation.
    pub fn entry(&mut self, file_name: &str) -> &mut FileMetadata {
        self.files
            .entry(file_name.to_owned())
            .or_insert_with(|| FileMetadata::new(file_name))
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.files.contains_key(file_name)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileMetadata> {
        self.files.values()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Elementwise [`FileMetadata::merge`] over the union of file names.
    pub fn merge(local: &Self, remote: &Self) -> Self {
        let mut files = local.files.clone();

        for (name, remote_meta) in &remote.files {
            match files.get_mut(name) {
                Some(local_meta) => *local_meta = FileMetadata::merge(local_meta, remote_meta),
                None => {
                    let _prev = files.insert(name.clone(), remote_meta.clone());
                }
            }
        }

        Self { files }
    }

    /// Drops every version whose stored id does not match its recomputed
    /// hash, along with heads left pointing at nothing. Returns how many
    /// versions were rejected.
    pub fn retain_verified(&mut self) -> usize {
        let mut rejected = 0;

        for meta in self.files.values_mut() {
            let before = meta.versions.len();

            meta.versions.retain(|_, version| version.verify_id());

            rejected += before - meta.versions.len();

            meta.heads.retain(|head| meta.versions.contains_key(head));
        }

        rejected
    }
}
