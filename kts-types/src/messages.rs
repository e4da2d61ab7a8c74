//! Protocol message definitions and the timestamp token data type

use crate::hash::Imprint;
use crate::primitives::{Digest, Nonce, PublicKey, Signature, Timestamp};
use serde::{Deserialize, Serialize};

/// Current protocol version carried in every request and response
pub const PROTOCOL_VERSION: u32 = 1;

/// Paths deeper than this are rejected as syntactically invalid
pub const MAX_PATH_DEPTH: usize = 64;

/// Request from client to the signing service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub version: u32,
    /// Imprint of the document being timestamped
    pub imprint: Imprint,
}

/// Response from the signing service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    pub version: u32,
    pub token: TimestampToken,
}

/// Request to extend a token's proof up to a publication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendRequest {
    pub version: u32,
    /// Registration time of the token being extended
    pub registration_time: Timestamp,
    /// Target publication; `None` lets the extender pick
    #[serde(default)]
    pub publication_time: Option<Timestamp>,
}

/// Response from the extending service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendResponse {
    pub version: u32,
    pub calendar_chain: CalendarChain,
}

/// Proof linking a round root to the calendar root at `publication_time`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarChain {
    pub publication_time: Timestamp,
    pub path: MerklePath,
}

/// A timestamp token: proves `imprint` was registered in the calendar
/// round at `registration_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampToken {
    /// The document imprint that was timestamped
    pub imprint: Imprint,
    /// Per-leaf blinding nonce
    pub nonce: Nonce,
    /// Merkle path from the leaf to the round root
    pub aggregation_path: MerklePath,
    /// Root of the aggregation round, as signed by the calendar
    pub round_root: Digest,
    /// Calendar round time
    pub registration_time: Timestamp,
    /// Calendar signature over the round root
    pub signature: Signature,
    /// Key that produced `signature`
    pub signing_key: PublicKey,
    /// Present once the token has been extended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_chain: Option<CalendarChain>,
}

impl TimestampToken {
    pub fn aggregation_leaf(&self) -> Digest {
        compute_leaf_hash(&self.imprint, &self.nonce)
    }

    /// Round root recomputed from the leaf and the aggregation path
    pub fn computed_round_root(&self) -> Digest {
        self.aggregation_path.compute_root(&self.aggregation_leaf())
    }

    /// Calendar tree leaf for this token's round
    pub fn calendar_leaf(&self) -> Digest {
        calendar_leaf_hash(&self.round_root, &self.registration_time)
    }

    pub fn is_extended(&self) -> bool {
        self.calendar_chain.is_some()
    }
}

/// Merkle path from leaf to root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    /// The leaf index in the tree
    pub leaf_index: u64,
    /// Sibling hashes from the leaf level upwards
    pub siblings: Vec<MerkleNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub hash: Digest,
    /// True if this sibling is on the left of the path
    pub is_left: bool,
}

impl MerklePath {
    /// Compute the Merkle root from a leaf hash
    pub fn compute_root(&self, leaf_hash: &Digest) -> Digest {
        self.siblings.iter().fold(*leaf_hash, |current, sibling| {
            if sibling.is_left {
                hash_pair(&sibling.hash, &current)
            } else {
                hash_pair(&current, &sibling.hash)
            }
        })
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

/// Aggregation leaf: H(imprint || nonce)
pub fn compute_leaf_hash(imprint: &Imprint, nonce: &Nonce) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&imprint.to_bytes());
    hasher.update(nonce.as_bytes());
    Digest::new(*hasher.finalize().as_bytes())
}

/// Interior node: H(left || right)
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest::new(*hasher.finalize().as_bytes())
}

/// Calendar leaf: H("cal" || round_root || round_time)
pub fn calendar_leaf_hash(round_root: &Digest, round_time: &Timestamp) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(CALENDAR_LEAF_PREFIX);
    hasher.update(round_root.as_bytes());
    hasher.update(&round_time.to_be_bytes());
    Digest::new(*hasher.finalize().as_bytes())
}

const CALENDAR_LEAF_PREFIX: &[u8] = b"cal";

/// Domain separation prefix for round signatures
pub const SIGN_MESSAGE_PREFIX: &[u8] = b"KTS-v1:";

/// Message signed by the calendar for each round:
/// "KTS-v1:" || round_root || seconds || nanos
pub fn build_sign_message(round_root: &Digest, registration_time: &Timestamp) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGN_MESSAGE_PREFIX.len() + 32 + 12);
    msg.extend_from_slice(SIGN_MESSAGE_PREFIX);
    msg.extend_from_slice(round_root.as_bytes());
    msg.extend_from_slice(&registration_time.to_be_bytes());
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use proptest::prelude::*;

    fn sample_token() -> TimestampToken {
        let imprint = HashAlgorithm::Sha256.hash(b"document");
        let nonce = Nonce::new([2u8; 32]);
        let leaf = compute_leaf_hash(&imprint, &nonce);
        TimestampToken {
            imprint,
            nonce,
            aggregation_path: MerklePath {
                leaf_index: 0,
                siblings: vec![],
            },
            round_root: leaf,
            registration_time: Timestamp::new(1000, 0).unwrap(),
            signature: Signature::new([0u8; 64]),
            signing_key: PublicKey::new([0u8; 32]),
            calendar_chain: None,
        }
    }

    #[test]
    fn test_leaf_hash_binds_algorithm() {
        let nonce = Nonce::new([2u8; 32]);
        let sha = Imprint::new(HashAlgorithm::Sha256, vec![1u8; 32]).unwrap();
        let b3 = Imprint::new(HashAlgorithm::Blake3, vec![1u8; 32]).unwrap();
        assert_ne!(compute_leaf_hash(&sha, &nonce), compute_leaf_hash(&b3, &nonce));
    }

    #[test]
    fn test_merkle_path_simple() {
        let leaf0 = Digest::new([1u8; 32]);
        let leaf1 = Digest::new([2u8; 32]);

        let path = MerklePath {
            leaf_index: 0,
            siblings: vec![MerkleNode {
                hash: leaf1,
                is_left: false,
            }],
        };

        assert_eq!(path.compute_root(&leaf0), hash_pair(&leaf0, &leaf1));
    }

    #[test]
    fn test_single_leaf_round_root() {
        let token = sample_token();
        assert_eq!(token.computed_round_root(), token.round_root);
        assert!(!token.is_extended());
    }

    #[test]
    fn test_calendar_leaf_binds_time() {
        let root = Digest::new([9u8; 32]);
        let a = calendar_leaf_hash(&root, &Timestamp::new(1, 0).unwrap());
        let b = calendar_leaf_hash(&root, &Timestamp::new(1, 1).unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_unextended_token_json_omits_chain() {
        let json = serde_json::to_string(&sample_token()).unwrap();
        assert!(!json.contains("calendar_chain"));
        let parsed: TimestampToken = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample_token());
    }

    prop_compose! {
        fn arb_digest()(bytes in prop::array::uniform32(any::<u8>())) -> Digest {
            Digest::new(bytes)
        }
    }

    prop_compose! {
        fn arb_timestamp()(
            seconds in 0i64..=4_000_000_000i64,
            nanos in 0u32..1_000_000_000u32
        ) -> Timestamp {
            Timestamp::new(seconds, nanos).unwrap()
        }
    }

    proptest! {
        #[test]
        fn prop_hash_pair_non_commutative(a in arb_digest(), b in arb_digest()) {
            prop_assume!(a != b);
            prop_assert_ne!(hash_pair(&a, &b), hash_pair(&b, &a));
        }

        #[test]
        fn prop_sign_message_varies_with_root(
            d1 in arb_digest(),
            d2 in arb_digest(),
            ts in arb_timestamp()
        ) {
            prop_assume!(d1 != d2);
            prop_assert_ne!(build_sign_message(&d1, &ts), build_sign_message(&d2, &ts));
        }

        #[test]
        fn prop_sign_message_has_prefix_and_length(d in arb_digest(), ts in arb_timestamp()) {
            let msg = build_sign_message(&d, &ts);
            prop_assert!(msg.starts_with(SIGN_MESSAGE_PREFIX));
            prop_assert_eq!(msg.len(), SIGN_MESSAGE_PREFIX.len() + 32 + 12);
        }
    }
}
