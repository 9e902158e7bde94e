// Vault cipher: AES-256-GCM over a key derived from a single configured
// secret. Ciphertext layout: version byte || 12-byte nonce || ct+tag.
//
// Decrypted values only ever travel to a worker slot as an execution
// parameter; nothing here writes plaintext anywhere.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const PAYLOAD_VERSION: u8 = 1;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Ciphertext tampered with, truncated, or encrypted under another key.
    #[error("Failed to decrypt secret")]
    InvalidSecret,

    #[error("Encryption failed")]
    EncryptionFailed,
}

/// Symmetric cipher for vault secrets.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Build the cipher from the configured key string. A key that decodes
    /// as url-safe base64 to exactly 32 bytes is used verbatim; anything
    /// else is hashed with SHA-256 first, so any configured string yields
    /// a working cipher.
    pub fn new(configured_key: &str) -> Self {
        let key = Self::derive_key(configured_key);
        let cipher = Aes256Gcm::new(&key.into());
        Self { cipher }
    }

    fn derive_key(configured_key: &str) -> [u8; KEY_SIZE] {
        if let Ok(decoded) = URL_SAFE.decode(configured_key) {
            if decoded.len() == KEY_SIZE {
                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(&decoded);
                return key;
            }
        }
        Sha256::digest(configured_key.as_bytes()).into()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        out.push(PAYLOAD_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt to the original plaintext. Fails closed: any tampering or
    /// wrong key yields [`VaultError::InvalidSecret`], never partial output.
    pub fn decrypt(&self, data: &[u8]) -> Result<String, VaultError> {
        if data.len() < 1 + NONCE_SIZE || data[0] != PAYLOAD_VERSION {
            return Err(VaultError::InvalidSecret);
        }
        let nonce = Nonce::from_slice(&data[1..1 + NONCE_SIZE]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &data[1 + NONCE_SIZE..])
            .map_err(|_| VaultError::InvalidSecret)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::InvalidSecret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let vault = Vault::new("homelab-master-key");
        let ct = vault.encrypt("ssh-password-123").unwrap();
        assert_eq!(vault.decrypt(&ct).unwrap(), "ssh-password-123");
    }

    #[test]
    fn ciphertext_is_nondeterministic() {
        let vault = Vault::new("k");
        let a = vault.encrypt("same").unwrap();
        let b = vault.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a).unwrap(), vault.decrypt(&b).unwrap());
    }

    #[test]
    fn tampering_fails_closed() {
        let vault = Vault::new("k");
        let mut ct = vault.encrypt("secret").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(matches!(vault.decrypt(&ct), Err(VaultError::InvalidSecret)));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let vault = Vault::new("k");
        assert!(vault.decrypt(&[]).is_err());
        assert!(vault.decrypt(&[PAYLOAD_VERSION, 0, 1, 2]).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let ct = Vault::new("key-a").encrypt("secret").unwrap();
        assert!(Vault::new("key-b").decrypt(&ct).is_err());
    }

    #[test]
    fn valid_base64_key_used_verbatim() {
        let raw = [7u8; 32];
        let configured = URL_SAFE.encode(raw);
        // Same raw key via base64 and via an equal derivation must interoperate.
        let a = Vault::new(&configured);
        let b = Vault::new(&configured);
        let ct = a.encrypt("p").unwrap();
        assert_eq!(b.decrypt(&ct).unwrap(), "p");
        // A non-base64 passphrase still produces a working cipher.
        let c = Vault::new("not base64 at all!");
        let ct2 = c.encrypt("p").unwrap();
        assert_eq!(c.decrypt(&ct2).unwrap(), "p");
    }

    #[test]
    fn unknown_version_rejected() {
        let vault = Vault::new("k");
        let mut ct = vault.encrypt("secret").unwrap();
        ct[0] = 9;
        assert!(vault.decrypt(&ct).is_err());
    }
}
