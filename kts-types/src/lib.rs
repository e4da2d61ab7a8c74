//! Core types and protocol definitions for KTS (keyless timestamping)
//!
//! Shared by the client, the calendar service and the verification core:
//! primitives, document imprints, verification result codes and the wire
//! messages exchanged with the signing and extending services.

pub mod error;
pub mod hash;
pub mod messages;
pub mod primitives;
pub mod result;

pub use error::{Error, Result};
pub use hash::{HashAlgorithm, Hasher, Imprint};
pub use messages::{
    CalendarChain, ExtendRequest, ExtendResponse, MerkleNode, MerklePath, SignRequest,
    SignResponse, TimestampToken, PROTOCOL_VERSION,
};
pub use primitives::{Digest, Nonce, PublicKey, Signature, Timestamp};
pub use result::{Checks, Failures, ResultCode};
