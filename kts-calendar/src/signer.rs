//! Round and publications signing keys

use ed25519_dalek::{Signer as _, SigningKey};
use kts_types::{PublicKey, Signature};
use tracing::warn;

use crate::error::{CalendarError, Result};

/// Environment variable holding the hex seed of the round signing key
pub const SIGNING_KEY_ENV: &str = "KTS_SIGNING_KEY";
/// Environment variable holding the hex seed of the publications key
pub const PUBLICATIONS_KEY_ENV: &str = "KTS_PUBLICATIONS_KEY";

/// Signs calendar rounds or publications files
pub trait Signer: Send + Sync {
    fn public_key(&self) -> &PublicKey;

    fn sign(&self, message: &[u8]) -> Result<Signature>;
}

/// Ed25519 signer holding the key in process memory
pub struct SoftwareSigner {
    key: SigningKey,
    public_key: PublicKey,
}

impl SoftwareSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&seed);
        let public_key = PublicKey::new(*key.verifying_key().as_bytes());
        Self { key, public_key }
    }

    /// Fresh random key
    pub fn generate() -> Self {
        let key = SigningKey::generate(&mut rand::thread_rng());
        Self::from_seed(key.to_bytes())
    }

    pub fn from_hex(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| CalendarError::Config(format!("invalid key seed: {}", e)))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            CalendarError::Config(format!("key seed must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    /// Load the key named by `var`, or generate an ephemeral one
    pub fn from_env_or_generate(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(seed) => Self::from_hex(&seed),
            Err(_) => {
                warn!("{} not set, using an ephemeral key", var);
                Ok(Self::generate())
            }
        }
    }
}

impl Signer for SoftwareSigner {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        Ok(Signature::new(self.key.sign(message).to_bytes()))
    }
}
