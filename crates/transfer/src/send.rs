//! Sender path: resolve a request under the shared root and stream file
//! frames for it.

use std::io;
use std::path::{Path, PathBuf};

use meshsync_crypto::SharedKey;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::wire::{self, BLOCK_SIZE, MAX_PATH_LEN};
use crate::TransferError;

/// Serves one incoming `/transfer/1` stream: reads the request, then emits
/// one file frame per regular file under the resolved target.
///
/// A missing target closes the stream cleanly with no frames; a request
/// that escapes the shared root is refused with an error.
pub async fn handle_request<S>(
    stream: &mut S,
    shared_root: &Path,
    key: Option<&SharedKey>,
) -> Result<(), TransferError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let (request, peer_wants_encryption) = wire::read_request(stream).await?;

    debug!(
        request,
        encrypted = peer_wants_encryption,
        "Transfer requested"
    );

    let key = match (peer_wants_encryption, key) {
        (false, _) => None,
        (true, Some(key)) => Some(key),
        (true, None) => return Err(TransferError::NoKey),
    };

    let rel = wire::validate_rel_path(&request)?;
    let target = shared_root.join(rel);

    let metadata = match tokio::fs::metadata(&target).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(request, "Requested item not found, closing with no frames");
            stream.flush().await?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if metadata.is_dir() {
        let mut files = Vec::new();
        collect_files(shared_root, rel, &mut files)?;

        for rel_file in &files {
            send_single_file(stream, shared_root, rel_file, key).await?;
        }

        info!(request, files = files.len(), "Folder transfer complete");
    } else {
        send_single_file(stream, shared_root, rel, key).await?;

        info!(request, "File transfer complete");
    }

    stream.flush().await?;

    Ok(())
}

/// Depth-first walk with entries sorted per directory level, so two sends
/// of the same tree emit frames in the same order. Directories themselves
/// are never emitted.
fn collect_files(
    shared_root: &Path,
    rel_dir: &Path,
    out: &mut Vec<PathBuf>,
) -> Result<(), TransferError> {
    let mut entries = std::fs::read_dir(shared_root.join(rel_dir))?
        .collect::<Result<Vec<_>, _>>()?;

    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let file_type = entry.file_type()?;
        let rel = rel_dir.join(entry.file_name());

        if file_type.is_dir() {
            collect_files(shared_root, &rel, out)?;
        } else if file_type.is_file() {
            out.push(rel);
        }
    }

    Ok(())
}

/// Emits one file frame: path, chunks in read order, the zero marker, then
/// the SHA-256 digest of the plaintext.
async fn send_single_file<S>(
    stream: &mut S,
    shared_root: &Path,
    rel_path: &Path,
    key: Option<&SharedKey>,
) -> Result<(), TransferError>
where
    S: AsyncWrite + Unpin,
{
    let wire_path = rel_path
        .to_str()
        .ok_or(TransferError::PathEncoding)?
        .replace(std::path::MAIN_SEPARATOR, "/");

    let path_len =
        u32::try_from(wire_path.len()).map_err(|_| TransferError::PathTooLong { len: u32::MAX })?;

    if path_len > MAX_PATH_LEN {
        return Err(TransferError::PathTooLong { len: path_len });
    }

    debug!(path = wire_path, "Sending file");

    stream.write_u32(path_len).await?;
    stream.write_all(wire_path.as_bytes()).await?;

    let mut file = File::open(shared_root.join(rel_path)).await?;
    let mut hasher = Sha256::new();
    let mut block = [0; BLOCK_SIZE];

    loop {
        let read = file.read(&mut block).await?;

        if read == 0 {
            break;
        }

        let plain = &block[..read];
        hasher.update(plain);

        match key {
            Some(key) => {
                let sealed = key.seal(plain)?;

                stream.write_u32(sealed.len() as u32).await?;
                stream.write_all(&sealed).await?;
            }
            None => {
                stream.write_u32(read as u32).await?;
                stream.write_all(plain).await?;
            }
        }
    }

    stream.write_u32(0).await?;
    stream.write_all(&hasher.finalize()).await?;

    Ok(())
}
