//! Public address encoding, decoding, and validation.
//!
//! Addresses use the ledger's strkey format: RFC 4648 base32 (no padding) of
//! `[version byte] ++ ed25519 public key (32) ++ crc16-xmodem (little endian)`.
//! Account addresses carry version byte `6 << 3` and therefore start with `G`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base32 alphabet (RFC 4648).
const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Version byte for account public keys.
const ACCOUNT_ID_VERSION: u8 = 6 << 3;

/// Raw public key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Encoded address length: (1 + 32 + 2) bytes → 56 base32 characters.
pub const ENCODED_LEN: usize = 56;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be a non-empty string")]
    Empty,

    #[error("invalid address length ({0}), expected {ENCODED_LEN}")]
    InvalidLength(usize),

    #[error("invalid character '{0}' at position {1}")]
    InvalidCharacter(char, usize),

    #[error("unexpected version byte 0x{0:02x}")]
    InvalidVersion(u8),

    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// A validated account address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicAddress(String);

impl PublicAddress {
    /// Encode a raw ed25519 public key as an address.
    pub fn from_public_key(key: &[u8; KEY_SIZE]) -> Self {
        let mut payload = Vec::with_capacity(1 + KEY_SIZE + 2);
        payload.push(ACCOUNT_ID_VERSION);
        payload.extend_from_slice(key);
        let crc = crc16_xmodem(&payload);
        payload.extend_from_slice(&crc.to_le_bytes());
        Self(base32_encode(&payload))
    }

    /// Parse and validate an address string.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        decode_public_key(address)?;
        Ok(Self(address.trim().to_string()))
    }

    /// The raw public key behind this address.
    pub fn public_key(&self) -> [u8; KEY_SIZE] {
        // Construction guarantees a valid encoding.
        decode_public_key(&self.0).unwrap_or([0u8; KEY_SIZE])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PublicAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PublicAddress {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PublicAddress {
    type Error = AddressError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PublicAddress> for String {
    fn from(a: PublicAddress) -> String {
        a.0
    }
}

/// Validate an address string.
pub fn is_valid_address(address: &str) -> bool {
    decode_public_key(address).is_ok()
}

/// Decode an address string to its raw public key.
pub fn decode_public_key(address: &str) -> Result<[u8; KEY_SIZE], AddressError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AddressError::Empty);
    }
    if address.len() != ENCODED_LEN {
        return Err(AddressError::InvalidLength(address.len()));
    }

    let raw = base32_decode(address)?;
    let (payload, checksum) = raw.split_at(raw.len() - 2);

    if payload[0] != ACCOUNT_ID_VERSION {
        return Err(AddressError::InvalidVersion(payload[0]));
    }

    let expected = crc16_xmodem(payload).to_le_bytes();
    if checksum != expected {
        return Err(AddressError::ChecksumMismatch);
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&payload[1..]);
    Ok(key)
}

/// CRC-16/XMODEM (poly 0x1021, init 0).
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }
    out
}

fn base32_decode(encoded: &str) -> Result<Vec<u8>, AddressError> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for (i, ch) in encoded.chars().enumerate() {
        let value = ALPHABET
            .iter()
            .position(|&c| c as char == ch)
            .ok_or(AddressError::InvalidCharacter(ch, i))? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xFF) as u8);
        }
    }
    Ok(out)
}
