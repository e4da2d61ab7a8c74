//! Proptest-based fuzzing for input parsers in kts-types.
//!
//! These tests feed arbitrary and malformed inputs through the
//! deserialization paths and check they only ever return errors.

use kts_types::messages::{ExtendRequest, ExtendResponse, MerkleNode, MerklePath, TimestampToken};
use kts_types::{Digest, HashAlgorithm, Imprint, Nonce, PublicKey, ResultCode, Signature, Timestamp};
use proptest::prelude::*;

proptest! {
    #[test]
    fn fuzz_digest_from_json(s in "\\PC{0,200}") {
        let json = format!("\"{}\"", s);
        let _ = serde_json::from_str::<Digest>(&json);
    }

    #[test]
    fn fuzz_signature_from_json(s in "\\PC{0,200}") {
        let json = format!("\"{}\"", s);
        let _ = serde_json::from_str::<Signature>(&json);
    }

    #[test]
    fn fuzz_public_key_from_json(s in "\\PC{0,200}") {
        let json = format!("\"{}\"", s);
        let _ = serde_json::from_str::<PublicKey>(&json);
    }

    #[test]
    fn fuzz_nonce_from_json(s in "\\PC{0,200}") {
        let json = format!("\"{}\"", s);
        let _ = serde_json::from_str::<Nonce>(&json);
    }

    #[test]
    fn fuzz_imprint_from_hex(s in "[0-9a-fA-F]{0,200}") {
        if let Ok(imprint) = Imprint::from_hex(&s) {
            prop_assert_eq!(imprint.digest().len(), imprint.algorithm().digest_len());
        }
    }

    #[test]
    fn fuzz_hash_algorithm_from_id(id in any::<u8>()) {
        if let Ok(alg) = HashAlgorithm::from_id(id) {
            prop_assert_eq!(alg.id(), id);
        }
    }

    #[test]
    fn fuzz_token_from_json(json in "\\PC{0,1000}") {
        let _ = serde_json::from_str::<TimestampToken>(&json);
    }

    #[test]
    fn fuzz_token_from_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = serde_json::from_slice::<TimestampToken>(&bytes);
    }

    #[test]
    fn fuzz_extend_messages_from_json(json in "\\PC{0,500}") {
        let _ = serde_json::from_str::<ExtendRequest>(&json);
        let _ = serde_json::from_str::<ExtendResponse>(&json);
    }

    #[test]
    fn fuzz_result_code_from_json(failures in any::<u32>(), checks in any::<u32>()) {
        let json = format!("{{\"failures\":{},\"checks\":{}}}", failures, checks);
        let code: ResultCode = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(code.failures.bits(), failures);
        prop_assert_eq!(code.checks.bits(), checks);
    }

    #[test]
    fn fuzz_timestamp_new(seconds in any::<i64>(), nanos in any::<u32>()) {
        let result = Timestamp::new(seconds, nanos);
        if nanos >= 1_000_000_000 {
            prop_assert!(result.is_err());
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn fuzz_merkle_path_compute_root(
        leaf_bytes in prop::array::uniform32(any::<u8>()),
        sibling_data in prop::collection::vec(
            (prop::array::uniform32(any::<u8>()), any::<bool>()),
            0..20
        )
    ) {
        let leaf = Digest::new(leaf_bytes);
        let siblings: Vec<MerkleNode> = sibling_data
            .into_iter()
            .map(|(hash_bytes, is_left)| MerkleNode {
                hash: Digest::new(hash_bytes),
                is_left,
            })
            .collect();

        let path = MerklePath {
            leaf_index: 0,
            siblings,
        };

        let _root = path.compute_root(&leaf);
    }
}
