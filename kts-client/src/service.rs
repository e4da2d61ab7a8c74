//! Transport to the signing, extending and publications services
//!
//! The verification engine only ever sees [`ServiceClient`]: bytes out, bytes
//! back. [`HttpServiceClient`] is the reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::debug;

use crate::config::{ClientConfig, ServiceEndpoint};
use crate::{ClientError, Result};

/// Raw request/response exchange with the three KTS services
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn fetch_publications(&self) -> Result<Vec<u8>>;

    async fn submit_extend_request(&self, request: Vec<u8>) -> Result<Vec<u8>>;

    async fn submit_sign_request(&self, request: Vec<u8>) -> Result<Vec<u8>>;
}

/// Longest error body quoted back in a `Network` error
const MAX_ERROR_BODY: usize = 256;

/// HTTP transport with a per-request timeout
pub struct HttpServiceClient {
    client: Client,
    signing: ServiceEndpoint,
    extending: ServiceEndpoint,
    publications: ServiceEndpoint,
    timeout: Duration,
}

impl HttpServiceClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = config.tls.apply(Client::builder())?;

        let endpoints = [
            &config.signing_url,
            &config.extending_url,
            &config.publications_url,
        ];
        if endpoints.iter().all(|e| is_loopback(e.host())) {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            signing: config.signing_url.clone(),
            extending: config.extending_url.clone(),
            publications: config.publications_url.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post(&self, endpoint: &ServiceEndpoint, body: Vec<u8>) -> Result<Vec<u8>> {
        debug!(url = %endpoint, len = body.len(), "POST");
        let response = self
            .client
            .post(endpoint.url())
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        read_body(endpoint, response).await
    }

    async fn get(&self, endpoint: &ServiceEndpoint) -> Result<Vec<u8>> {
        debug!(url = %endpoint, "GET");
        let response = self
            .client
            .get(endpoint.url())
            .timeout(self.timeout)
            .send()
            .await?;
        read_body(endpoint, response).await
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn fetch_publications(&self) -> Result<Vec<u8>> {
        self.get(&self.publications).await
    }

    async fn submit_extend_request(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        self.post(&self.extending, request).await
    }

    async fn submit_sign_request(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        self.post(&self.signing, request).await
    }
}

async fn read_body(endpoint: &ServiceEndpoint, response: Response) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        return Err(ClientError::Network(format!(
            "{} returned {}: {}",
            endpoint, status, body
        )));
    }
    Ok(response.bytes().await?.to_vec())
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}
