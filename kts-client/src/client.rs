//! High-level client: sign, extend, verify, save and load tokens

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use kts_core::Token;
use kts_types::{HashAlgorithm, Imprint, TimestampToken};

use crate::cache::{CacheKey, PublicationCache};
use crate::config::ClientConfig;
use crate::orchestrator::{Verification, Verifier};
use crate::publications::{Publications, PublicationsValidator, TrustedPublications};
use crate::service::{HttpServiceClient, ServiceClient};
use crate::storage;
use crate::{ClientError, Result};

/// Read size when hashing files
const FILE_CHUNK_SIZE: usize = 128 * 1024;

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial backoff duration before first retry
    pub initial_backoff: Duration,
    /// Maximum backoff duration (caps exponential growth)
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff duration for a given attempt (0-indexed)
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        // Jitter: random value in [0.5 * capped, 1.0 * capped]
        let jitter = 0.5 + rand::random::<f64>() * 0.5;
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Client for a KTS calendar, generic over the token format
pub struct KtsClient<T: Token = TimestampToken> {
    service: Arc<dyn ServiceClient>,
    verifier: Verifier,
    /// Retry configuration for signing (None = no retries)
    retry_config: Option<RetryConfig>,
    _token: PhantomData<fn() -> T>,
}

impl KtsClient<TimestampToken> {
    /// HTTP client sharing the process-wide publications cache of its
    /// publications endpoint and pinning policy
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let pin_mode = config.pin_mode()?;
        let service = Arc::new(HttpServiceClient::new(config)?);
        let cache = PublicationCache::shared(CacheKey {
            publications_url: config.publications_url.url(),
            pin_mode: pin_mode.clone(),
        });
        let validator = Arc::new(TrustedPublications::new(pin_mode));

        let mut client = Self::new(service, validator, cache);
        client.retry_config = config.retry_config();
        Ok(client)
    }
}

impl<T: Token> KtsClient<T> {
    pub fn new(
        service: Arc<dyn ServiceClient>,
        validator: Arc<dyn PublicationsValidator>,
        cache: Arc<PublicationCache>,
    ) -> Self {
        let verifier = Verifier::new(service.clone(), validator, cache);
        Self {
            service,
            verifier,
            retry_config: None,
            _token: PhantomData,
        }
    }

    /// Enable retry for signing with the given configuration
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Submit an imprint for signing
    pub async fn sign_hash(&self, imprint: &Imprint) -> Result<T> {
        let request = T::compose_sign_request(imprint)?;
        let max_attempts = self
            .retry_config
            .as_ref()
            .map(|c| c.max_retries + 1)
            .unwrap_or(1);

        let mut attempt = 0;
        loop {
            match self.try_sign(&request).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    attempt += 1;
                    let retry = match &self.retry_config {
                        Some(config) if is_retryable(&e) && attempt < max_attempts => config,
                        _ => return Err(e),
                    };
                    let backoff = retry.backoff_for_attempt(attempt - 1);
                    warn!(
                        "Retry attempt {}/{} after {:?}: {}",
                        attempt,
                        max_attempts - 1,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Single attempt at signing (no retry)
    async fn try_sign(&self, request: &[u8]) -> Result<T> {
        let response = self.service.submit_sign_request(request.to_vec()).await?;
        let token = T::from_sign_response(&response)?;
        info!(registered = %token.registered_time(), "Received timestamp token");
        Ok(token)
    }

    /// Sign raw data, hashed with the default algorithm
    pub async fn sign_data(&self, data: &[u8]) -> Result<T> {
        self.sign_hash(&HashAlgorithm::DEFAULT.hash(data)).await
    }

    /// Sign a file, hashed with the default algorithm
    pub async fn sign_file(&self, path: &Path) -> Result<T> {
        let imprint = hash_file(path, HashAlgorithm::DEFAULT).await?;
        self.sign_hash(&imprint).await
    }

    /// Extend a token; the original is left as it was
    pub async fn extend(&self, token: &T) -> Result<T> {
        self.verifier.extend(token).await
    }

    pub async fn verify_hash(
        &self,
        hash: &[u8],
        algorithm: HashAlgorithm,
        token: &T,
    ) -> Result<Verification<T>> {
        self.verifier.verify_hash(hash, algorithm, token).await
    }

    /// Verify against raw data, hashed with the token's algorithm
    pub async fn verify_data(&self, data: &[u8], token: &T) -> Result<Verification<T>> {
        let imprint = token.hash_algorithm().hash(data);
        self.verify_hash(imprint.digest(), imprint.algorithm(), token)
            .await
    }

    /// Verify against a file, hashed with the token's algorithm
    pub async fn verify_file(&self, path: &Path, token: &T) -> Result<Verification<T>> {
        let imprint = hash_file(path, token.hash_algorithm()).await?;
        self.verify_hash(imprint.digest(), imprint.algorithm(), token)
            .await
    }

    pub async fn load_publications(&self) -> Result<Arc<Publications>> {
        self.verifier.load_publications().await
    }

    pub async fn refresh_publications(&self) -> Result<Arc<Publications>> {
        self.verifier.refresh_publications().await
    }

    pub fn save(&self, path: &Path, token: &T) -> Result<()> {
        storage::save_token(path, token)
    }

    pub fn load(&self, path: &Path) -> Result<T> {
        storage::load_token(path)
    }
}

/// Hash a file in fixed-size chunks
pub async fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<Imprint> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        ClientError::Storage(format!("failed to open {}: {}", path.display(), e))
    })?;

    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| {
            ClientError::Storage(format!("failed to read {}: {}", path.display(), e))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Determine if an error is retryable (transient network issues)
fn is_retryable(err: &ClientError) -> bool {
    match err {
        ClientError::Network(_) | ClientError::Timeout => true,
        ClientError::MalformedResponse(_)
        | ClientError::Untrusted(_)
        | ClientError::Storage(_)
        | ClientError::Config(_) => false,
    }
}
