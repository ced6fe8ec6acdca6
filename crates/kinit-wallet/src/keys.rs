//! Ed25519 account keys.

use crate::error::WalletError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use kinit_types::PublicAddress;
use rand::RngCore;

/// Length of a signature hint: the trailing bytes of the signer's public key.
pub const HINT_LEN: usize = 4;

/// A signing keypair for one ledger account.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    address: PublicAddress,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let address = PublicAddress::from_public_key(signing.verifying_key().as_bytes());
        Self { signing, address }
    }

    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(seed_hex)
            .map_err(|e| WalletError::InvalidFile(format!("seed: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WalletError::InvalidFile("seed must be 32 bytes".into()))?;
        Ok(Self::from_seed(&seed))
    }

    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn address(&self) -> &PublicAddress {
        &self.address
    }

    pub fn hint(&self) -> [u8; HINT_LEN] {
        hint_for(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

pub fn hint_for(public_key: &[u8; 32]) -> [u8; HINT_LEN] {
    let mut hint = [0u8; HINT_LEN];
    hint.copy_from_slice(&public_key[32 - HINT_LEN..]);
    hint
}

/// Check an Ed25519 signature. Malformed keys simply fail verification.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(signature)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_determines_address() {
        let a = KeyPair::from_seed(&[7u8; 32]);
        let b = KeyPair::from_seed_hex(&hex::encode([7u8; 32])).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.seed(), [7u8; 32]);
        assert!(a.address().as_str().starts_with('G'));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(KeyPair::generate().address(), KeyPair::generate().address());
    }

    #[test]
    fn test_sign_verify() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"payload");
        assert!(verify(&kp.public_key(), b"payload", &sig));
        assert!(!verify(&kp.public_key(), b"other", &sig));
        assert_eq!(kp.hint(), kp.public_key()[28..32]);
    }

    #[test]
    fn test_bad_seed_hex() {
        assert!(matches!(KeyPair::from_seed_hex("zz"), Err(WalletError::InvalidFile(_))));
        assert!(matches!(KeyPair::from_seed_hex("abcd"), Err(WalletError::InvalidFile(_))));
    }

    #[test]
    fn test_debug_hides_seed() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let dbg = format!("{:?}", kp);
        assert!(!dbg.contains(&hex::encode([1u8; 32])));
    }
}
