//! Chunked file transfer protocol
//!
//! One `/transfer/1` stream carries a single request (a relative path plus
//! an encryption flag) answered by a sequence of file frames. Every integer
//! on the wire is big-endian u32:
//!
//! ```text
//! request := path-line LF flag-byte
//! file    := u32(path_len) path { u32(len > 0) bytes }* u32(0) hash32
//! ```
//!
//! The reply ends at stream EOF; a zero `path_len` is accepted as a clean
//! end-of-stream marker too. Hashes are SHA-256 over the plaintext, so
//! integrity verification is independent of the optional per-chunk
//! compressed encryption.

use std::io;

use meshsync_crypto::CodecError;
use thiserror::Error;

pub mod recv;
pub mod send;
pub mod wire;

pub use recv::{receive_files, Progress, TransferSummary};
pub use send::handle_request;
pub use wire::{BLOCK_SIZE, MAX_CHUNK_LEN, MAX_PATH_LEN};


#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("path length {len} exceeds the {MAX_PATH_LEN}-byte cap")]
    PathTooLong { len: u32 },

    #[error("chunk length {len} exceeds the {MAX_CHUNK_LEN}-byte cap")]
    ChunkTooLarge { len: u32 },

    #[error("{path:?} is not a clean relative path")]
    PathViolation { path: String },

    #[error("path bytes are not valid UTF-8")]
    PathEncoding,

    #[error("hash mismatch for {path:?}")]
    HashMismatch { path: String },

    #[error("encryption requested but no key is configured")]
    NoKey,
}
