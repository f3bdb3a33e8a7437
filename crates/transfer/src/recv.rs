//! Receiver path: materialize incoming file frames under a staging root and
//! verify each file's plaintext hash.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meshsync_crypto::SharedKey;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::wire::{self, MAX_CHUNK_LEN, MAX_PATH_LEN};
use crate::TransferError;

/// Monotonically increasing count of plaintext bytes received. Cheap to
/// clone and share with whatever presents progress.
#[derive(Clone, Debug, Default)]
pub struct Progress {
    bytes: Arc<AtomicU64>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn add(&self, count: u64) {
        let _prev = self.bytes.fetch_add(count, Ordering::Relaxed);
    }
}

/// Outcome of a completed (fully verified) transfer.
#[derive(Debug, Default)]
pub struct TransferSummary {
    pub files: Vec<String>,
    pub bytes: u64,
}

/// Reads file frames until the stream ends, writing each file under
/// `staging_root`. Existing files are overwritten. Any hash mismatch or
/// decode failure fails the whole transfer; nothing partial is reported as
/// success.
pub async fn receive_files<S>(
    stream: &mut S,
    staging_root: &Path,
    key: Option<&SharedKey>,
    progress: &Progress,
) -> Result<TransferSummary, TransferError>
where
    S: AsyncRead + Unpin,
{
    tokio::fs::create_dir_all(staging_root).await?;

    let mut summary = TransferSummary::default();

    loop {
        let path_len = match wire::read_u32_or_eof(stream).await? {
            // Stream EOF and an explicit zero path length both terminate.
            None | Some(0) => break,
            Some(len) if len > MAX_PATH_LEN => {
                return Err(TransferError::PathTooLong { len })
            }
            Some(len) => len,
        };

        let mut path_bytes = vec![0; path_len as usize];
        stream.read_exact(&mut path_bytes).await?;

        let wire_path = String::from_utf8(path_bytes).map_err(|_| TransferError::PathEncoding)?;
        let rel = wire::validate_rel_path(&wire_path)?;

        let output_path = staging_root.join(rel);

        debug!(path = wire_path, "Receiving file");

        let bytes = receive_one_file(stream, &output_path, &wire_path, key, progress).await?;

        summary.bytes += bytes;
        summary.files.push(wire_path);
    }

    Ok(summary)
}

/// Receives one file body and verifies its digest. On any failure the
/// partially written output is removed before the error propagates.
async fn receive_one_file<S>(
    stream: &mut S,
    output_path: &Path,
    wire_path: &str,
    key: Option<&SharedKey>,
    progress: &Progress,
) -> Result<u64, TransferError>
where
    S: AsyncRead + Unpin,
{
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut output = File::create(output_path).await?;

    let result = write_verified(stream, &mut output, key, progress, wire_path).await;

    drop(output);

    if result.is_err() {
        if let Err(err) = tokio::fs::remove_file(output_path).await {
            warn!(path = wire_path, %err, "Failed to remove corrupt file");
        }
    }

    result
}

async fn write_verified<S>(
    stream: &mut S,
    output: &mut File,
    key: Option<&SharedKey>,
    progress: &Progress,
    wire_path: &str,
) -> Result<u64, TransferError>
where
    S: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut bytes = 0;

    loop {
        let chunk_len = match wire::read_u32_or_eof(stream).await? {
            None => {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
            }
            Some(0) => break,
            Some(len) if len > MAX_CHUNK_LEN => {
                return Err(TransferError::ChunkTooLarge { len })
            }
            Some(len) => len,
        };

        let mut chunk = vec![0; chunk_len as usize];
        stream.read_exact(&mut chunk).await?;

        let plain = match key {
            Some(key) => key.open(&chunk)?,
            None => chunk,
        };

        hasher.update(&plain);
        output.write_all(&plain).await?;

        bytes += plain.len() as u64;
        progress.add(plain.len() as u64);
    }

    output.flush().await?;

    let mut expected = [0; 32];
    stream.read_exact(&mut expected).await?;

    if hasher.finalize().as_slice() != expected {
        return Err(TransferError::HashMismatch {
            path: wire_path.to_owned(),
        });
    }

    Ok(bytes)
}
