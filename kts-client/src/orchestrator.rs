//! Verification orchestration
//!
//! A token is checked against the cached publications file. Tokens registered
//! after the newest publication, and not yet extended, are first extended so
//! the check can run on a calendar chain instead of the signing key alone.
//! If extension fails the original token is checked instead and the outcome
//! is reported as degraded.

use std::sync::Arc;

use tracing::{debug, info, warn};

use kts_core::Token;
use kts_types::{Failures, HashAlgorithm, ResultCode};

use crate::cache::PublicationCache;
use crate::publications::{Publications, PublicationsValidator};
use crate::service::ServiceClient;
use crate::{ClientError, Result};

/// What happened to the token's extension during a verification
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionStatus {
    /// Already extended, or older than the newest publication
    NotRequired,
    /// The token failed its own consistency checks
    Skipped,
    /// Extension succeeded; the extended copy was checked
    Extended,
    /// Extension failed; the original token was checked
    FailedOver(ClientError),
}

/// Outcome of [`Verifier::verify_hash`]
#[derive(Debug, Clone)]
pub struct Verification<T> {
    pub code: ResultCode,
    pub extension: ExtensionStatus,
    /// The token the publication check ran on
    pub token: T,
}

impl<T> Verification<T> {
    pub fn is_valid(&self) -> bool {
        self.code.is_valid()
    }

    /// True when an extension was needed but could not be obtained
    pub fn is_degraded(&self) -> bool {
        matches!(self.extension, ExtensionStatus::FailedOver(_))
    }
}

/// Ties the service, the publications cache and a token together
#[derive(Clone)]
pub struct Verifier {
    service: Arc<dyn ServiceClient>,
    validator: Arc<dyn PublicationsValidator>,
    cache: Arc<PublicationCache>,
}

impl Verifier {
    pub fn new(
        service: Arc<dyn ServiceClient>,
        validator: Arc<dyn PublicationsValidator>,
        cache: Arc<PublicationCache>,
    ) -> Self {
        Self {
            service,
            validator,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<PublicationCache> {
        &self.cache
    }

    pub async fn load_publications(&self) -> Result<Arc<Publications>> {
        self.cache.ensure_loaded(&self.service, &self.validator).await
    }

    pub async fn refresh_publications(&self) -> Result<Arc<Publications>> {
        self.cache.refresh(&self.service, &self.validator).await
    }

    /// Extend a token to the newest publication the extender offers.
    ///
    /// Returns the extended copy; `token` itself is untouched.
    pub async fn extend<T: Token>(&self, token: &T) -> Result<T> {
        let request = token.compose_extending_request()?;
        let response = self.service.submit_extend_request(request).await?;
        let extended = token.extend(&response)?;
        debug!(registered = %token.registered_time(), "Token extended");
        Ok(extended)
    }

    /// Verify `token` against a document hash and the publications file.
    ///
    /// Failed checks are reported in the returned code. `Err` means the
    /// verification could not be carried out at all, e.g. the publications
    /// file could not be loaded.
    pub async fn verify_hash<T: Token>(
        &self,
        hash: &[u8],
        algorithm: HashAlgorithm,
        token: &T,
    ) -> Result<Verification<T>> {
        let publications = self.load_publications().await?;

        let mut code = token.verify()? | token.compare_hash(hash, algorithm)?;

        let is_new = publications
            .last
            .map_or(true, |last| token.registered_time() > last);

        if token.is_extended() || !is_new {
            code |= token.check_publication(&publications.data)?;
            return Ok(Verification {
                code,
                extension: ExtensionStatus::NotRequired,
                token: token.clone(),
            });
        }

        if code.has_failure(Failures::SELF_CHECK) {
            debug!("Token failed self-checks, not extending: {}", code);
            code |= token.check_publication(&publications.data)?;
            return Ok(Verification {
                code,
                extension: ExtensionStatus::Skipped,
                token: token.clone(),
            });
        }

        match self.extend(token).await {
            Ok(extended) => {
                code |= extended.verify()?;
                code |= extended.compare_hash(hash, algorithm)?;
                code |= extended.check_publication(&publications.data)?;
                info!("Verified extended token: {}", code);
                Ok(Verification {
                    code,
                    extension: ExtensionStatus::Extended,
                    token: extended,
                })
            }
            Err(e) => {
                warn!("Extension failed, checking original token: {}", e);
                code |= token.check_publication(&publications.data)?;
                Ok(Verification {
                    code,
                    extension: ExtensionStatus::FailedOver(e),
                    token: token.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kts_types::{Checks, Imprint, Timestamp};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Token whose check outcomes are fixed by the test
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct MockToken {
        registered: i64,
        extended: bool,
        self_check: ResultCode,
    }

    impl MockToken {
        fn new(registered: i64) -> Self {
            Self {
                registered,
                extended: false,
                self_check: ResultCode::passed(Checks::PUBLIC_KEY_SIGNATURE_PRESENT),
            }
        }
    }

    impl Token for MockToken {
        fn hash_algorithm(&self) -> HashAlgorithm {
            HashAlgorithm::Sha256
        }

        fn registered_time(&self) -> Timestamp {
            Timestamp::new(self.registered, 0).unwrap()
        }

        fn is_extended(&self) -> bool {
            self.extended
        }

        fn verify(&self) -> kts_types::Result<ResultCode> {
            Ok(self.self_check)
        }

        fn compare_hash(&self, hash: &[u8], _algorithm: HashAlgorithm) -> kts_types::Result<ResultCode> {
            if hash == b"doc" {
                Ok(ResultCode::passed(Checks::DOCUMENT_HASH_CHECKED))
            } else {
                Ok(ResultCode::failed(Failures::WRONG_DOCUMENT_FAILURE))
            }
        }

        fn check_publication(&self, publications: &[u8]) -> kts_types::Result<ResultCode> {
            if publications != b"pubs" {
                return Err(kts_types::Error::InvalidPublicationsFile("unexpected".into()));
            }
            if self.extended {
                Ok(ResultCode::passed(
                    Checks::PUBLICATION_CHECKED | Checks::PUBLICATION_REFERENCE_PRESENT,
                ))
            } else {
                Ok(ResultCode::passed(Checks::PUBLICATION_CHECKED))
            }
        }

        fn compose_extending_request(&self) -> kts_types::Result<Vec<u8>> {
            Ok(self.registered.to_be_bytes().to_vec())
        }

        fn extend(&self, response: &[u8]) -> kts_types::Result<Self> {
            if response != b"chain" {
                return Err(kts_types::Error::InvalidRequest("bad chain".into()));
            }
            Ok(Self {
                extended: true,
                ..self.clone()
            })
        }

        fn compose_sign_request(imprint: &Imprint) -> kts_types::Result<Vec<u8>> {
            Ok(imprint.to_bytes())
        }

        fn from_sign_response(response: &[u8]) -> kts_types::Result<Self> {
            Ok(serde_json::from_slice(response)?)
        }

        fn to_bytes(&self) -> kts_types::Result<Vec<u8>> {
            Ok(serde_json::to_vec(self)?)
        }

        fn from_bytes(bytes: &[u8]) -> kts_types::Result<Self> {
            Ok(serde_json::from_slice(bytes)?)
        }
    }

    struct MockService {
        extend_calls: AtomicU64,
        extender_down: AtomicBool,
        extend_response: Vec<u8>,
        publications_down: bool,
    }

    impl MockService {
        fn new() -> Self {
            Self {
                extend_calls: AtomicU64::new(0),
                extender_down: AtomicBool::new(false),
                extend_response: b"chain".to_vec(),
                publications_down: false,
            }
        }
    }

    #[async_trait]
    impl ServiceClient for MockService {
        async fn fetch_publications(&self) -> Result<Vec<u8>> {
            if self.publications_down {
                return Err(ClientError::Timeout);
            }
            Ok(b"pubs".to_vec())
        }

        async fn submit_extend_request(&self, _request: Vec<u8>) -> Result<Vec<u8>> {
            self.extend_calls.fetch_add(1, Ordering::SeqCst);
            if self.extender_down.load(Ordering::SeqCst) {
                return Err(ClientError::Network("extender down".to_string()));
            }
            Ok(self.extend_response.clone())
        }

        async fn submit_sign_request(&self, _request: Vec<u8>) -> Result<Vec<u8>> {
            unimplemented!()
        }
    }

    /// Serves the blob as-is with a fixed last publication time
    struct FixedLast(Option<i64>);

    impl PublicationsValidator for FixedLast {
        fn validate(&self, raw: Vec<u8>) -> Result<Publications> {
            Ok(Publications {
                data: raw,
                last: self.0.map(|t| Timestamp::new(t, 0).unwrap()),
            })
        }
    }

    fn verifier_with(service: Arc<MockService>, last: Option<i64>) -> Verifier {
        Verifier::new(
            service,
            Arc::new(FixedLast(last)),
            Arc::new(PublicationCache::new()),
        )
    }

    #[tokio::test]
    async fn test_old_token_checked_directly() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service.clone(), Some(100));

        let v = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &MockToken::new(50))
            .await
            .unwrap();

        assert_eq!(v.extension, ExtensionStatus::NotRequired);
        assert!(v.is_valid());
        assert!(v.code.has_check(Checks::DOCUMENT_HASH_CHECKED | Checks::PUBLICATION_CHECKED));
        assert_eq!(service.extend_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_registered_at_last_publication_is_not_new() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service.clone(), Some(100));

        let v = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &MockToken::new(100))
            .await
            .unwrap();

        assert_eq!(v.extension, ExtensionStatus::NotRequired);
        assert_eq!(service.extend_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extended_token_never_re_extended() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service.clone(), Some(100));
        let token = MockToken {
            extended: true,
            ..MockToken::new(500)
        };

        let v = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &token)
            .await
            .unwrap();

        assert_eq!(v.extension, ExtensionStatus::NotRequired);
        assert!(v.code.has_check(Checks::PUBLICATION_REFERENCE_PRESENT));
        assert_eq!(service.extend_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_new_token_extended_before_check() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service.clone(), Some(100));

        let v = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &MockToken::new(150))
            .await
            .unwrap();

        assert_eq!(v.extension, ExtensionStatus::Extended);
        assert!(v.token.extended);
        assert!(v.is_valid());
        assert!(v.code.has_check(Checks::PUBLICATION_REFERENCE_PRESENT));
        assert_eq!(service.extend_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_publications_makes_every_token_new() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service.clone(), None);

        let v = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &MockToken::new(1))
            .await
            .unwrap();

        assert_eq!(v.extension, ExtensionStatus::Extended);
    }

    #[tokio::test]
    async fn test_extension_failure_fails_over() {
        let service = Arc::new(MockService::new());
        service.extender_down.store(true, Ordering::SeqCst);
        let verifier = verifier_with(service.clone(), Some(100));

        let v = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &MockToken::new(150))
            .await
            .unwrap();

        assert!(v.is_degraded());
        assert!(matches!(
            v.extension,
            ExtensionStatus::FailedOver(ClientError::Network(_))
        ));
        assert!(!v.token.extended);
        assert!(v.is_valid());
        assert!(v.code.has_check(Checks::PUBLICATION_CHECKED));
        assert!(!v.code.has_check(Checks::PUBLICATION_REFERENCE_PRESENT));
    }

    #[tokio::test]
    async fn test_unparseable_extension_fails_over() {
        let service = Arc::new(MockService {
            extend_response: b"garbage".to_vec(),
            ..MockService::new()
        });
        let verifier = verifier_with(service, Some(100));

        let v = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &MockToken::new(150))
            .await
            .unwrap();

        assert!(matches!(
            v.extension,
            ExtensionStatus::FailedOver(ClientError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_self_check_failure_skips_extension() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service.clone(), Some(100));
        let token = MockToken {
            self_check: ResultCode::failed(Failures::HASHCHAIN_VERIFICATION_FAILURE),
            ..MockToken::new(150)
        };

        let v = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &token)
            .await
            .unwrap();

        assert_eq!(v.extension, ExtensionStatus::Skipped);
        assert!(v.code.has_failure(Failures::HASHCHAIN_VERIFICATION_FAILURE));
        assert_eq!(service.extend_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_document_still_checks_publication() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service.clone(), Some(100));

        let v = verifier
            .verify_hash(b"other", HashAlgorithm::Sha256, &MockToken::new(150))
            .await
            .unwrap();

        assert!(v.code.has_failure(Failures::WRONG_DOCUMENT_FAILURE));
        assert!(!v.code.has_check(Checks::DOCUMENT_HASH_CHECKED));
        assert!(v.code.has_check(Checks::PUBLICATION_CHECKED));
        // A wrong document is not a self-check failure
        assert_eq!(v.extension, ExtensionStatus::Extended);
    }

    #[tokio::test]
    async fn test_publications_failure_is_error() {
        let service = Arc::new(MockService {
            publications_down: true,
            ..MockService::new()
        });
        let verifier = verifier_with(service.clone(), Some(100));

        let result = verifier
            .verify_hash(b"doc", HashAlgorithm::Sha256, &MockToken::new(150))
            .await;

        assert!(matches!(result, Err(ClientError::Timeout)));
        assert_eq!(service.extend_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_explicit_extend_leaves_original_untouched() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service, Some(100));
        let token = MockToken::new(150);

        let extended = verifier.extend(&token).await.unwrap();
        assert!(extended.extended);
        assert!(!token.extended);
    }

    #[tokio::test]
    async fn test_publications_loaded_once_across_verifications() {
        let service = Arc::new(MockService::new());
        let verifier = verifier_with(service, Some(100));

        for t in [50, 150, 250] {
            verifier
                .verify_hash(b"doc", HashAlgorithm::Sha256, &MockToken::new(t))
                .await
                .unwrap();
        }
        assert_eq!(verifier.cache().fetch_count(), 1);
    }
}
