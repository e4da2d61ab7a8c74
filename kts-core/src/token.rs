//! Token capability trait
//!
//! The verification engine never looks inside a token. Everything it needs
//! (self-checks, hash comparison, the publication check and the extension
//! round trip) goes through [`Token`]. [`TimestampToken`] is the concrete
//! format issued by the KTS calendar.

use crate::publications::PublicationsFile;
use crate::verify::{calendar_root, check_syntax, verify_aggregation, verify_round_signature};
use kts_types::{
    Checks, Error, ExtendRequest, ExtendResponse, Failures, HashAlgorithm, Imprint, Result,
    ResultCode, SignRequest, SignResponse, Timestamp, TimestampToken, PROTOCOL_VERSION,
};
use tracing::debug;

/// Operations the verification engine needs from a timestamp token.
///
/// Check methods report outcomes as [`ResultCode`] bits. An `Err` means the
/// check could not be evaluated at all.
pub trait Token: Clone + Send + Sync + Sized + 'static {
    fn hash_algorithm(&self) -> HashAlgorithm;

    fn registered_time(&self) -> Timestamp;

    fn is_extended(&self) -> bool;

    /// Internal consistency: syntax, hash chain and signature
    fn verify(&self) -> Result<ResultCode>;

    fn compare_hash(&self, hash: &[u8], algorithm: HashAlgorithm) -> Result<ResultCode>;

    /// Check the token against a raw publications blob
    fn check_publication(&self, publications: &[u8]) -> Result<ResultCode>;

    fn compose_extending_request(&self) -> Result<Vec<u8>>;

    /// Absorb an extension response, returning the extended copy
    fn extend(&self, response: &[u8]) -> Result<Self>;

    fn compose_sign_request(imprint: &Imprint) -> Result<Vec<u8>>;

    fn from_sign_response(response: &[u8]) -> Result<Self>;

    fn to_bytes(&self) -> Result<Vec<u8>>;

    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

fn check_version(actual: u32) -> Result<()> {
    if actual != PROTOCOL_VERSION {
        return Err(Error::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual,
        });
    }
    Ok(())
}

impl Token for TimestampToken {
    fn hash_algorithm(&self) -> HashAlgorithm {
        self.imprint.algorithm()
    }

    fn registered_time(&self) -> Timestamp {
        self.registration_time
    }

    fn is_extended(&self) -> bool {
        TimestampToken::is_extended(self)
    }

    fn verify(&self) -> Result<ResultCode> {
        let mut code = ResultCode::default();

        if let Err(e) = check_syntax(self) {
            debug!("Syntax check failed: {}", e);
            code |= ResultCode::failed(Failures::SYNTACTIC_CHECK_FAILURE);
        }
        if let Err(e) = verify_aggregation(self) {
            debug!("Aggregation check failed: {}", e);
            code |= ResultCode::failed(Failures::HASHCHAIN_VERIFICATION_FAILURE);
        }
        code |= match verify_round_signature(self) {
            Ok(()) => ResultCode::passed(Checks::PUBLIC_KEY_SIGNATURE_PRESENT),
            Err(e) => {
                debug!("Round signature check failed: {}", e);
                ResultCode::failed(Failures::PUBLIC_KEY_SIGNATURE_FAILURE)
            }
        };

        Ok(code)
    }

    fn compare_hash(&self, hash: &[u8], algorithm: HashAlgorithm) -> Result<ResultCode> {
        if self.imprint.algorithm() == algorithm && self.imprint.digest() == hash {
            Ok(ResultCode::passed(Checks::DOCUMENT_HASH_CHECKED))
        } else {
            Ok(ResultCode::failed(Failures::WRONG_DOCUMENT_FAILURE))
        }
    }

    fn check_publication(&self, publications: &[u8]) -> Result<ResultCode> {
        let file = PublicationsFile::decode(publications)?;

        if let Some(chain) = &self.calendar_chain {
            if let Some(publication) = file.publication_at(&chain.publication_time) {
                return Ok(match calendar_root(self) {
                    Some(root) if root == publication.root => ResultCode::passed(
                        Checks::PUBLICATION_CHECKED | Checks::PUBLICATION_REFERENCE_PRESENT,
                    ),
                    _ => ResultCode::failed(Failures::NOT_VALID_PUBLICATION),
                });
            }
            debug!(
                publication_time = %chain.publication_time,
                "No publication at chain time, falling back to key check"
            );
        }

        if file.is_key_trusted(&self.signing_key.fingerprint(), &self.registration_time) {
            Ok(ResultCode::passed(Checks::PUBLICATION_CHECKED))
        } else {
            Ok(ResultCode::failed(Failures::NOT_VALID_PUBLIC_KEY_FAILURE))
        }
    }

    fn compose_extending_request(&self) -> Result<Vec<u8>> {
        let request = ExtendRequest {
            version: PROTOCOL_VERSION,
            registration_time: self.registration_time,
            publication_time: None,
        };
        Ok(serde_json::to_vec(&request)?)
    }

    fn extend(&self, response: &[u8]) -> Result<Self> {
        let response: ExtendResponse = serde_json::from_slice(response)?;
        check_version(response.version)?;
        if response.calendar_chain.publication_time < self.registration_time {
            return Err(Error::InvalidRequest(
                "extension response ends before registration time".to_string(),
            ));
        }

        let mut extended = self.clone();
        extended.calendar_chain = Some(response.calendar_chain);
        Ok(extended)
    }

    fn compose_sign_request(imprint: &Imprint) -> Result<Vec<u8>> {
        let request = SignRequest {
            version: PROTOCOL_VERSION,
            imprint: imprint.clone(),
        };
        Ok(serde_json::to_vec(&request)?)
    }

    fn from_sign_response(response: &[u8]) -> Result<Self> {
        let response: SignResponse = serde_json::from_slice(response)?;
        check_version(response.version)?;
        Ok(response.token)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::HashTree;
    use crate::publications::PublicationsFileBuilder;
    use ed25519_dalek::{Signer, SigningKey};
    use kts_types::messages::{build_sign_message, compute_leaf_hash, CalendarChain, MerklePath};
    use kts_types::{Digest, Nonce, PublicKey, Signature};
    use std::convert::Infallible;

    struct Fixture {
        aggregator: SigningKey,
        publisher: SigningKey,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                aggregator: SigningKey::from_bytes(&[1u8; 32]),
                publisher: SigningKey::from_bytes(&[2u8; 32]),
            }
        }

        fn aggregator_key(&self) -> PublicKey {
            PublicKey::new(*self.aggregator.verifying_key().as_bytes())
        }

        fn token(&self, data: &[u8], seconds: i64) -> TimestampToken {
            let imprint = HashAlgorithm::Sha256.hash(data);
            let nonce = Nonce::new([5u8; 32]);
            let registration_time = Timestamp::new(seconds, 0).unwrap();
            let round_root = compute_leaf_hash(&imprint, &nonce);
            let signature = self
                .aggregator
                .sign(&build_sign_message(&round_root, &registration_time));
            TimestampToken {
                imprint,
                nonce,
                aggregation_path: MerklePath {
                    leaf_index: 0,
                    siblings: vec![],
                },
                round_root,
                registration_time,
                signature: Signature::new(signature.to_bytes()),
                signing_key: self.aggregator_key(),
                calendar_chain: None,
            }
        }

        fn publications(&self, key_at: i64, publications: &[(i64, Digest)]) -> Vec<u8> {
            let mut builder = PublicationsFileBuilder::new();
            builder.add_key(Timestamp::new(key_at, 0).unwrap(), &self.aggregator_key());
            for (seconds, root) in publications {
                builder.add_publication(Timestamp::new(*seconds, 0).unwrap(), *root);
            }
            let publisher = PublicKey::new(*self.publisher.verifying_key().as_bytes());
            builder
                .encode(&publisher, |msg| {
                    Ok::<_, Infallible>(Signature::new(self.publisher.sign(msg).to_bytes()))
                })
                .unwrap()
        }
    }

    /// Extend `token` into a two-round calendar published at `published_at`
    fn extend_into_calendar(token: &TimestampToken, published_at: i64) -> (TimestampToken, Digest) {
        let other_round = Digest::new([4u8; 32]);
        let tree: HashTree = [token.calendar_leaf(), other_round].into_iter().collect();
        let response = ExtendResponse {
            version: PROTOCOL_VERSION,
            calendar_chain: CalendarChain {
                publication_time: Timestamp::new(published_at, 0).unwrap(),
                path: tree.generate_path(0).unwrap(),
            },
        };
        let extended = token.extend(&serde_json::to_vec(&response).unwrap()).unwrap();
        (extended, tree.root())
    }

    #[test]
    fn test_verify_valid_token() {
        let token = Fixture::new().token(b"doc", 100);
        let code = Token::verify(&token).unwrap();
        assert!(code.is_valid());
        assert!(code.has_check(Checks::PUBLIC_KEY_SIGNATURE_PRESENT));
    }

    #[test]
    fn test_verify_broken_chain() {
        let mut token = Fixture::new().token(b"doc", 100);
        token.nonce = Nonce::new([6u8; 32]);
        let code = Token::verify(&token).unwrap();
        assert!(code.has_failure(Failures::HASHCHAIN_VERIFICATION_FAILURE));
        assert!(!code.has_failure(Failures::PUBLIC_KEY_SIGNATURE_FAILURE));
    }

    #[test]
    fn test_compare_hash() {
        let token = Fixture::new().token(b"doc", 100);
        let right = HashAlgorithm::Sha256.hash(b"doc");
        let code = token.compare_hash(right.digest(), HashAlgorithm::Sha256).unwrap();
        assert!(code.has_check(Checks::DOCUMENT_HASH_CHECKED));

        let wrong = HashAlgorithm::Sha256.hash(b"other");
        let code = token.compare_hash(wrong.digest(), HashAlgorithm::Sha256).unwrap();
        assert!(code.has_failure(Failures::WRONG_DOCUMENT_FAILURE));

        // Same digest bytes under another algorithm is still the wrong document
        let code = token.compare_hash(right.digest(), HashAlgorithm::Blake3).unwrap();
        assert!(code.has_failure(Failures::WRONG_DOCUMENT_FAILURE));
    }

    #[test]
    fn test_key_based_publication_check() {
        let fixture = Fixture::new();
        let token = fixture.token(b"doc", 100);

        let code = token.check_publication(&fixture.publications(50, &[])).unwrap();
        assert_eq!(code, ResultCode::passed(Checks::PUBLICATION_CHECKED));

        // Key published after the round is not trusted for it
        let code = token.check_publication(&fixture.publications(150, &[])).unwrap();
        assert!(code.has_failure(Failures::NOT_VALID_PUBLIC_KEY_FAILURE));
    }

    #[test]
    fn test_extended_token_checks_published_root() {
        let fixture = Fixture::new();
        let token = fixture.token(b"doc", 100);
        let (extended, root) = extend_into_calendar(&token, 200);

        assert!(extended.is_extended());
        assert!(!token.is_extended());
        assert!(Token::verify(&extended).unwrap().is_valid());

        let code = extended
            .check_publication(&fixture.publications(50, &[(200, root)]))
            .unwrap();
        assert!(code.has_check(Checks::PUBLICATION_CHECKED | Checks::PUBLICATION_REFERENCE_PRESENT));
        assert!(code.is_valid());

        let code = extended
            .check_publication(&fixture.publications(50, &[(200, Digest::new([0u8; 32]))]))
            .unwrap();
        assert!(code.has_failure(Failures::NOT_VALID_PUBLICATION));
    }

    #[test]
    fn test_extended_past_last_publication_uses_key() {
        let fixture = Fixture::new();
        let token = fixture.token(b"doc", 100);
        let (extended, _) = extend_into_calendar(&token, 300);

        let code = extended
            .check_publication(&fixture.publications(50, &[(200, Digest::new([1u8; 32]))]))
            .unwrap();
        assert_eq!(code, ResultCode::passed(Checks::PUBLICATION_CHECKED));
    }

    #[test]
    fn test_malformed_publications_is_error() {
        let token = Fixture::new().token(b"doc", 100);
        assert!(token.check_publication(b"not a publications file").is_err());
    }

    #[test]
    fn test_extend_rejects_chain_before_registration() {
        let token = Fixture::new().token(b"doc", 100);
        let response = ExtendResponse {
            version: PROTOCOL_VERSION,
            calendar_chain: CalendarChain {
                publication_time: Timestamp::new(50, 0).unwrap(),
                path: MerklePath {
                    leaf_index: 0,
                    siblings: vec![],
                },
            },
        };
        assert!(token.extend(&serde_json::to_vec(&response).unwrap()).is_err());
        assert!(token.extend(b"garbage").is_err());
    }

    #[test]
    fn test_sign_response_version_checked() {
        let token = Fixture::new().token(b"doc", 100);
        let response = SignResponse {
            version: PROTOCOL_VERSION + 1,
            token: token.clone(),
        };
        let bytes = serde_json::to_vec(&response).unwrap();
        assert!(matches!(
            TimestampToken::from_sign_response(&bytes),
            Err(Error::VersionMismatch { .. })
        ));

        let response = SignResponse {
            version: PROTOCOL_VERSION,
            token: token.clone(),
        };
        let bytes = serde_json::to_vec(&response).unwrap();
        assert_eq!(TimestampToken::from_sign_response(&bytes).unwrap(), token);
    }

    #[test]
    fn test_persisted_token_verifies_identically() {
        let fixture = Fixture::new();
        let (extended, root) = extend_into_calendar(&fixture.token(b"doc", 100), 200);
        let publications = fixture.publications(50, &[(200, root)]);

        let loaded = TimestampToken::from_bytes(&extended.to_bytes().unwrap()).unwrap();
        assert_eq!(
            loaded.check_publication(&publications).unwrap(),
            extended.check_publication(&publications).unwrap()
        );
        assert_eq!(Token::verify(&loaded).unwrap(), Token::verify(&extended).unwrap());
    }
}
