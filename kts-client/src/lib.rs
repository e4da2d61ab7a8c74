//! Keyless Timestamping Client Library
//!
//! Signs document hashes with a KTS calendar, and verifies tokens against a
//! cached publications file, extending fresh tokens first when the extender
//! is reachable.

pub mod cache;
pub mod client;
pub mod config;
pub mod orchestrator;
pub mod publications;
pub mod service;
pub mod storage;
pub mod tls;

pub use cache::{CacheKey, PublicationCache};
pub use client::{KtsClient, RetryConfig};
pub use config::{ClientConfig, ServiceEndpoint};
pub use orchestrator::{ExtensionStatus, Verification, Verifier};
pub use publications::{PinMode, Publications, PublicationsValidator, TrustedPublications};
pub use service::{HttpServiceClient, ServiceClient};
pub use storage::TokenStore;
pub use tls::TlsOptions;

use thiserror::Error;

/// Client errors.
///
/// `Clone` so a single failed publications fetch can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout")]
    Timeout,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Untrusted publications: {0}")]
    Untrusted(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<kts_types::Error> for ClientError {
    fn from(e: kts_types::Error) -> Self {
        ClientError::MalformedResponse(e.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
