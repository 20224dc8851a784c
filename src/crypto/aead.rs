/// XChaCha20-Poly1305 sealing of credentials into storable text tokens.
///
/// Token layout: `base64(nonce[24] || ciphertext || tag[16])`. The 24-byte
/// XChaCha20 nonce is drawn at random for every token.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::crypto::sensitive::VaultKey;
use crate::error::{BackupError, Result};

pub const NONCE_LEN: usize = 24;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

/// Associated data bound into every credential token.
const TOKEN_AAD: &[u8] = b"gfs-backup:credential:v1";

/// Generate a random 256-bit key.
pub fn generate_key() -> VaultKey {
    let mut key = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    VaultKey::new(key)
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` and return the base64 token.
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> Result<String> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| BackupError::Encryption(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let payload = Payload {
        msg: plaintext,
        aad: TOKEN_AAD,
    };

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), payload)
        .map_err(|e| BackupError::Encryption(e.to_string()))?;

    let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    token.extend_from_slice(&nonce_bytes);
    token.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(token))
}

/// Decrypt a token produced by [`seal`].
///
/// Fails on malformed base64, truncated tokens and on tokens sealed under a
/// different key.
pub fn open(key: &VaultKey, token: &str) -> Result<Vec<u8>> {
    let raw = STANDARD
        .decode(token.trim())
        .map_err(|e| BackupError::Decryption(format!("malformed token: {e}")))?;

    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(BackupError::Decryption("token too short".into()));
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| BackupError::Decryption(e.to_string()))?;

    let payload = Payload {
        msg: ciphertext,
        aad: TOKEN_AAD,
    };

    cipher
        .decrypt(XNonce::from_slice(nonce), payload)
        .map_err(|_| BackupError::Decryption("token was not sealed under this key".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = generate_key();
        let token = seal(&key, b"super-secret master password").unwrap();
        let opened = open(&key, &token).unwrap();
        assert_eq!(opened, b"super-secret master password");
    }

    #[test]
    fn test_tokens_are_randomized() {
        let key = generate_key();
        let t1 = seal(&key, b"same").unwrap();
        let t2 = seal(&key, b"same").unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = generate_key();
        let key2 = generate_key();
        let token = seal(&key1, b"secret").unwrap();
        assert!(matches!(open(&key2, &token), Err(BackupError::Decryption(_))));
    }

    #[test]
    fn test_tampered_token_fails() {
        let key = generate_key();
        let token = seal(&key, b"secret").unwrap();
        let mut raw = STANDARD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = STANDARD.encode(raw);
        assert!(matches!(open(&key, &tampered), Err(BackupError::Decryption(_))));
    }

    #[test]
    fn test_malformed_tokens_fail() {
        let key = generate_key();
        assert!(matches!(open(&key, "not base64 !!"), Err(BackupError::Decryption(_))));
        assert!(matches!(open(&key, "AAAA"), Err(BackupError::Decryption(_))));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = generate_key();
        let token = seal(&key, b"").unwrap();
        assert!(open(&key, &token).unwrap().is_empty());
    }
}
