//! Passphrase encryption for exported keys.
//!
//! Argon2id key derivation + AES-256-GCM. The blob is self-contained: it
//! carries the KDF parameters, salt, and nonce, so only the passphrase is
//! needed to decrypt. Layout:
//!
//! ```text
//! magic "KINW" | version (1) | t_cost | m_cost | parallelism (u32 LE each)
//!             | salt (32) | nonce (12) | ciphertext
//! ```

use crate::error::WalletError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

const MAGIC: &[u8; 4] = b"KINW";

const VERSION: u8 = 1;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Header size: 4 (magic) + 1 (version) + 12 (params) + 32 (salt) + 12 (nonce).
const HEADER_SIZE: usize = 61;

const KEY_LEN: usize = 32;

// Upper bounds accepted from a blob header.
const MAX_T_COST: u32 = 10;
const MAX_M_COST: u32 = 4 * 65536;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub t_cost: u32,
    /// Memory cost in KiB.
    pub m_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// OWASP recommended minimums.
    fn default() -> Self {
        Self {
            t_cost: 3,
            m_cost: 65536, // 64 MiB
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Minimal parameters for tests and throwaway transfers.
    pub fn light() -> Self {
        Self {
            t_cost: 1,
            m_cost: 64,
            parallelism: 1,
        }
    }

    fn check_bounds(&self) -> Result<(), WalletError> {
        if self.t_cost > MAX_T_COST || self.m_cost > MAX_M_COST || self.parallelism > MAX_PARALLELISM {
            return Err(WalletError::InvalidFile(format!(
                "kdf parameters out of range: t={} m={} p={}",
                self.t_cost, self.m_cost, self.parallelism
            )));
        }
        Ok(())
    }

    fn derive_key(&self, passphrase: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN], WalletError> {
        let params = Params::new(self.m_cost, self.t_cost, self.parallelism, Some(KEY_LEN))
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = [0u8; KEY_LEN];
        argon
            .hash_password_into(passphrase, salt, &mut key)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

/// Encrypt `plaintext` under `passphrase`. An empty passphrase is allowed.
#[allow(deprecated)] // aes-gcm 0.10 uses generic-array 0.x
pub fn encrypt(plaintext: &[u8], passphrase: &[u8], kdf: &KdfParams) -> Result<Vec<u8>, WalletError> {
    let mut rng = rand::thread_rng();

    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce_bytes);

    let key_bytes = kdf.derive_key(passphrase, &salt)?;

    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;

    let mut output = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    output.extend_from_slice(MAGIC);
    output.push(VERSION);
    output.extend_from_slice(&kdf.t_cost.to_le_bytes());
    output.extend_from_slice(&kdf.m_cost.to_le_bytes());
    output.extend_from_slice(&kdf.parallelism.to_le_bytes());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// Structural problems are `InvalidFile`; a wrong passphrase (or tampered
/// ciphertext) is `DecryptionFailed`.
#[allow(deprecated)] // aes-gcm 0.10 uses generic-array 0.x
pub fn decrypt(encrypted: &[u8], passphrase: &[u8]) -> Result<Vec<u8>, WalletError> {
    if encrypted.len() < HEADER_SIZE {
        return Err(WalletError::InvalidFile("blob too short".into()));
    }
    if &encrypted[0..4] != MAGIC {
        return Err(WalletError::InvalidFile("invalid magic bytes".into()));
    }
    let version = encrypted[4];
    if version != VERSION {
        return Err(WalletError::InvalidFile(format!(
            "unsupported version: {}",
            version
        )));
    }

    let kdf = KdfParams {
        t_cost: read_u32(&encrypted[5..9]),
        m_cost: read_u32(&encrypted[9..13]),
        parallelism: read_u32(&encrypted[13..17]),
    };
    let salt = &encrypted[17..49];
    let nonce_bytes = &encrypted[49..61];
    let ciphertext = &encrypted[61..];

    if ciphertext.is_empty() {
        return Err(WalletError::InvalidFile("no ciphertext".into()));
    }
    kdf.check_bounds()?;

    let key_bytes = kdf
        .derive_key(passphrase, salt)
        .map_err(|e| WalletError::InvalidFile(e.to_string()))?;

    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| WalletError::DecryptionFailed)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}
