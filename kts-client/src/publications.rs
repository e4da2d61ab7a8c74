//! Validation of downloaded publications files

use parking_lot::Mutex;
use tracing::{info, warn};

use kts_core::PublicationsFile;
use kts_types::{PublicKey, Timestamp};

use crate::{ClientError, Result};

/// A validated publications file as held by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publications {
    /// Raw file bytes, handed to `Token::check_publication`
    pub data: Vec<u8>,
    /// Time of the newest publication, if any
    pub last: Option<Timestamp>,
}

/// Turns a downloaded blob into trusted [`Publications`]
pub trait PublicationsValidator: Send + Sync {
    fn validate(&self, raw: Vec<u8>) -> Result<Publications>;
}

/// Publisher key pinning mode
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PinMode {
    /// No pinning, accept any correctly signed file
    None,
    /// Trust-On-First-Use: pin the key of the first accepted file
    TrustOnFirstUse,
    /// Reject files signed by any other key
    Pinned(PublicKey),
}

/// Checks the file signature and applies a [`PinMode`] to the publisher key
#[derive(Debug)]
pub struct TrustedPublications {
    pin_mode: PinMode,
    pinned_key: Mutex<Option<PublicKey>>,
}

impl TrustedPublications {
    pub fn new(pin_mode: PinMode) -> Self {
        Self {
            pin_mode,
            pinned_key: Mutex::new(None),
        }
    }

    pub fn pin_mode(&self) -> &PinMode {
        &self.pin_mode
    }

    /// Key pinned so far under trust-on-first-use
    pub fn pinned_key(&self) -> Option<PublicKey> {
        self.pinned_key.lock().clone()
    }

    /// Check the publisher key against the pinning policy
    fn check_publisher(&self, publisher: &PublicKey) -> Result<()> {
        match &self.pin_mode {
            PinMode::None => Ok(()),
            PinMode::Pinned(expected) => {
                if publisher != expected {
                    Err(ClientError::Untrusted(format!(
                        "publications key {} does not match pinned key {}",
                        publisher, expected
                    )))
                } else {
                    Ok(())
                }
            }
            PinMode::TrustOnFirstUse => {
                let mut pinned = self.pinned_key.lock();
                match pinned.as_ref() {
                    Some(key) if key != publisher => Err(ClientError::Untrusted(format!(
                        "publications key changed from {} to {} (TOFU violation)",
                        key, publisher
                    ))),
                    Some(_) => Ok(()),
                    None => {
                        info!("Pinning publications key {}", publisher);
                        *pinned = Some(publisher.clone());
                        Ok(())
                    }
                }
            }
        }
    }
}

impl Default for TrustedPublications {
    fn default() -> Self {
        Self::new(PinMode::None)
    }
}

impl PublicationsValidator for TrustedPublications {
    fn validate(&self, raw: Vec<u8>) -> Result<Publications> {
        let file = PublicationsFile::decode(&raw).map_err(|e| {
            warn!("Rejected publications file: {}", e);
            ClientError::MalformedResponse(e.to_string())
        })?;
        self.check_publisher(file.publisher())?;

        let last = file.last_publication_time();
        info!(
            publications = file.publications().len(),
            keys = file.key_hashes().len(),
            "Loaded publications file"
        );
        Ok(Publications { data: raw, last })
    }
}
