//! AES-256-GCM sealing for embedding blobs at rest.
//!
//! Sealed layout: 12-byte random nonce followed by the ciphertext. The
//! key lives in a file next to the database, created with fresh random
//! bytes on first run.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("key file {0} must hold exactly 32 bytes")]
    KeyLength(PathBuf),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("sealed blob shorter than its nonce")]
    Truncated,
}

pub struct EmbeddingCipher {
    cipher: Aes256Gcm,
}

impl EmbeddingCipher {
    pub fn from_key_bytes(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Read the key file, or create it with fresh random bytes (mode 0600).
    pub fn load_or_create(path: &Path) -> Result<Self, CipherError> {
        let io_err = |source| CipherError::KeyFile {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let bytes = std::fs::read(path).map_err(io_err)?;
            let key: [u8; KEY_LEN] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| CipherError::KeyLength(path.to_path_buf()))?;
            return Ok(Self::from_key_bytes(&key));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        std::fs::write(path, key).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        tracing::info!(path = %path.display(), "created new embedding key file");
        Ok(Self::from_key_bytes(&key))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
        if blob.len() < NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> EmbeddingCipher {
        EmbeddingCipher::from_key_bytes(&[7u8; KEY_LEN])
    }

    #[test]
    fn test_seal_open_round_trip() {
        let c = cipher();
        let sealed = c.seal(b"[0.25,-1.5,3.0]").unwrap();
        assert_eq!(c.open(&sealed).unwrap(), b"[0.25,-1.5,3.0]");
    }

    #[test]
    fn test_nonces_differ_between_seals() {
        let c = cipher();
        let a = c.seal(b"same").unwrap();
        let b = c.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_blob_rejected() {
        let c = cipher();
        let mut sealed = c.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(c.open(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealed = cipher().seal(b"payload").unwrap();
        let other = EmbeddingCipher::from_key_bytes(&[8u8; KEY_LEN]);
        assert!(matches!(other.open(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(matches!(
            cipher().open(&[1, 2, 3]),
            Err(CipherError::Truncated)
        ));
    }
}
