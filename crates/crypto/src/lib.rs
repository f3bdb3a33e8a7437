use lz4_flex::block::DecompressError;
use rand::RngCore;
use ring::aead;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = aead::NONCE_LEN;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("key must be {KEY_LEN} non-zero bytes")]
    Key,
    #[error("input shorter than the {NONCE_LEN}-byte nonce")]
    ShortInput,
    #[error("authentication tag verification failed")]
    Integrity,
    #[error("decompression failed: {0}")]
    Format(#[from] DecompressError),
}

/// Symmetric codec for opaque byte runs: lz4 compression followed by
/// AES-256-GCM with a fresh random nonce prepended to every output.
#[derive(Copy, Clone)]
pub struct SharedKey {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKey").finish_non_exhaustive()
    }
}

impl SharedKey {
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Result<Self, CodecError> {
        if key == [0; KEY_LEN] {
            return Err(CodecError::Key);
        }

        Ok(SharedKey { key })
    }

    pub fn from_slice(key: &[u8]) -> Result<Self, CodecError> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| CodecError::Key)?;

        Self::from_bytes(key)
    }

    fn aead_key(&self) -> aead::LessSafeKey {
        let key = aead::UnboundKey::new(&aead::AES_256_GCM, &self.key)
            .expect("key length checked at construction");

        aead::LessSafeKey::new(key)
    }

    /// Compresses and seals `payload`. The output is self-describing:
    /// `nonce || ciphertext || tag`.
    pub fn seal(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut nonce = [0; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut cipher_text = lz4_flex::compress_prepend_size(payload);

        self.aead_key()
            .seal_in_place_append_tag(
                aead::Nonce::assume_unique_for_key(nonce),
                aead::Aad::empty(),
                &mut cipher_text,
            )
            .map_err(|_| CodecError::Integrity)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + cipher_text.len());
        sealed.extend_from_slice(&nonce);
        sealed.append(&mut cipher_text);

        Ok(sealed)
    }

    /// Opens and decompresses a payload produced by [`SharedKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        if sealed.len() < NONCE_LEN {
            return Err(CodecError::ShortInput);
        }

        let (nonce, cipher_text) = sealed.split_at(NONCE_LEN);

        let nonce: [u8; NONCE_LEN] = nonce.try_into().expect("split at NONCE_LEN");

        let mut buf = cipher_text.to_vec();

        let compressed = self
            .aead_key()
            .open_in_place(
                aead::Nonce::assume_unique_for_key(nonce),
                aead::Aad::empty(),
                &mut buf,
            )
            .map_err(|_| CodecError::Integrity)?;

        Ok(lz4_flex::decompress_size_prepended(compressed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SharedKey {
        SharedKey::from_bytes([7; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_seal_open_round_trip() {
        let key = test_key();

        let payload = b"privacy is important";

        let sealed = key.seal(payload).unwrap();
        let opened = key.open(&sealed).unwrap();

        assert_eq!(opened, payload);
        assert_ne!(&sealed[NONCE_LEN..], payload.as_slice());
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = test_key();

        let a = key.seal(b"same payload").unwrap();
        let b = key.seal(b"same payload").unwrap();

        assert_ne!(a, b);
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn test_open_rejects_tampering() {
        let key = test_key();

        let mut sealed = key.seal(&[0xAB; 10 * 1024]).unwrap();
        let mid = sealed.len() / 2;
        sealed[mid] ^= 0x01;

        assert!(matches!(key.open(&sealed), Err(CodecError::Integrity)));
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let sealed = test_key().seal(b"for your eyes only").unwrap();

        let other = SharedKey::from_bytes([9; KEY_LEN]).unwrap();

        assert!(matches!(other.open(&sealed), Err(CodecError::Integrity)));
    }

    #[test]
    fn test_open_rejects_short_input() {
        let key = test_key();

        assert!(matches!(
            key.open(&[0; NONCE_LEN - 1]),
            Err(CodecError::ShortInput)
        ));
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(matches!(
            SharedKey::from_bytes([0; KEY_LEN]),
            Err(CodecError::Key)
        ));
        assert!(matches!(
            SharedKey::from_slice(&[1; 16]),
            Err(CodecError::Key)
        ));
    }

    #[test]
    fn test_empty_payload() {
        let key = test_key();

        let sealed = key.seal(b"").unwrap();

        assert_eq!(key.open(&sealed).unwrap(), b"");
    }
}
