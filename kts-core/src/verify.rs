//! Signature and hash chain verification for timestamp tokens

use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use kts_types::{
    messages::{build_sign_message, MAX_PATH_DEPTH},
    Digest, PublicKey, Signature, TimestampToken,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Merkle path verification failed")]
    InvalidMerklePath,

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Path depth {depth} exceeds the allowed maximum")]
    PathTooDeep { depth: usize },

    #[error("Calendar chain ends before the registration time")]
    ChainBeforeRegistration,
}

/// Structural sanity checks that need no key material
pub fn check_syntax(token: &TimestampToken) -> Result<(), VerificationError> {
    let depth = token.aggregation_path.depth();
    if depth > MAX_PATH_DEPTH {
        return Err(VerificationError::PathTooDeep { depth });
    }
    if let Some(chain) = &token.calendar_chain {
        if chain.path.depth() > MAX_PATH_DEPTH {
            return Err(VerificationError::PathTooDeep {
                depth: chain.path.depth(),
            });
        }
        if chain.publication_time < token.registration_time {
            return Err(VerificationError::ChainBeforeRegistration);
        }
    }
    Ok(())
}

/// Recompute the round root from the document leaf
pub fn verify_aggregation(token: &TimestampToken) -> Result<(), VerificationError> {
    if token.computed_round_root() != token.round_root {
        return Err(VerificationError::InvalidMerklePath);
    }
    Ok(())
}

/// Verify the calendar's signature over the round root
pub fn verify_round_signature(token: &TimestampToken) -> Result<(), VerificationError> {
    let message = build_sign_message(&token.round_root, &token.registration_time);
    verify_signature(&token.signing_key, &token.signature, &message)
}

/// Recompute the calendar root the token's chain leads to, if extended
pub fn calendar_root(token: &TimestampToken) -> Option<Digest> {
    token
        .calendar_chain
        .as_ref()
        .map(|chain| chain.path.compute_root(&token.calendar_leaf()))
}

/// Verify an Ed25519 signature
pub fn verify_signature(
    public_key: &PublicKey,
    signature: &Signature,
    message: &[u8],
) -> Result<(), VerificationError> {
    let verifying_key = VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|e| VerificationError::InvalidPublicKey(e.to_string()))?;

    let sig = Ed25519Signature::from_bytes(signature.as_bytes());

    verifying_key
        .verify(message, &sig)
        .map_err(|_| VerificationError::InvalidSignature)
}
