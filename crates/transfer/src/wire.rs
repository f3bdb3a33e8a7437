//! Byte-level framing shared by the sender and receiver paths.

use std::path::{Component, Path};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransferError;

/// Upper bound on an on-wire path, in bytes.
pub const MAX_PATH_LEN: u32 = 4096;

/// Upper bound on a single chunk, bounding receiver allocations.
pub const MAX_CHUNK_LEN: u32 = 1024 * 1024;

/// Read granularity for file contents; sealed chunks may be larger.
pub const BLOCK_SIZE: usize = 4096;

/// Rejects absolute paths, `..` components and over-long or empty paths.
/// Both sides run this: the sender on the request, the receiver on every
/// frame path a possibly-malicious sender supplies.
pub fn validate_rel_path(path: &str) -> Result<&Path, TransferError> {
    let violation = || TransferError::PathViolation {
        path: path.to_owned(),
    };

    if path.is_empty() || path.len() as u64 > u64::from(MAX_PATH_LEN) {
        return Err(violation());
    }

    let rel = Path::new(path);

    if rel.is_absolute() {
        return Err(violation());
    }

    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(violation());
            }
        }
    }

    Ok(rel)
}

/// Writes the request header: the path line and the encryption flag byte.
pub async fn write_request<W>(writer: &mut W, path: &str, encrypted: bool) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    if path.contains('\n') {
        return Err(TransferError::PathViolation {
            path: path.to_owned(),
        });
    }

    let _rel = validate_rel_path(path)?;

    writer.write_all(path.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.write_u8(u8::from(encrypted)).await?;
    writer.flush().await?;

    Ok(())
}

/// Reads the request header. The path is returned unvalidated; resolution
/// against the shared root validates it.
pub async fn read_request<R>(reader: &mut R) -> Result<(String, bool), TransferError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();

    let read = reader.read_until(b'\n', &mut line).await?;

    if read == 0 || line.last() != Some(&b'\n') {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }

    let _newline = line.pop();

    let path = String::from_utf8(line).map_err(|_| TransferError::PathEncoding)?;

    let flag = reader.read_u8().await?;

    Ok((path, flag == 1))
}

/// Reads a big-endian u32, distinguishing clean EOF at a frame boundary
/// (`None`) from a truncated integer (an error).
pub async fn read_u32_or_eof<R>(reader: &mut R) -> Result<Option<u32>, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0; 4];
    let mut filled = 0;

    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;

        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }

            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }

        filled += read;
    }

    Ok(Some(u32::from_be_bytes(buf)))
}
