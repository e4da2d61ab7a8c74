//! In-process calendar server for tests.
//!
//! Enabled via the `test-util` feature flag.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use kts_core::publications::PublicationRecord;
use kts_types::PublicKey;

use crate::config::{BatchConfig, CalendarConfig};
use crate::error::Result;
use crate::server::CalendarServer;
use crate::signer::SoftwareSigner;

/// A calendar server on a random localhost port with ephemeral software keys.
pub struct TestServer {
    addr: SocketAddr,
    server: CalendarServer,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a test server with short rounds.
    ///
    /// Returns once the listener is bound.
    pub async fn start() -> Self {
        Self::start_with_batch_config(BatchConfig {
            max_batch_size: 100,
            batch_interval_ms: 20,
        })
        .await
    }

    pub async fn start_with_batch_config(batch: BatchConfig) -> Self {
        let config = CalendarConfig {
            batch,
            ..CalendarConfig::default()
        };
        let server = CalendarServer::with_signers(
            config,
            Arc::new(SoftwareSigner::generate()),
            Arc::new(SoftwareSigner::generate()),
        )
        .expect("Test calendar config is valid");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().expect("Failed to get local address");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let router = server.router();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Test server failed");
        });

        Self {
            addr,
            server,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL, e.g. "http://127.0.0.1:12345"
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn signing_url(&self) -> String {
        format!("{}/signingservice", self.url())
    }

    pub fn extending_url(&self) -> String {
        format!("{}/extendingservice", self.url())
    }

    pub fn publications_url(&self) -> String {
        format!("{}/publications.bin", self.url())
    }

    /// Round signing key
    pub fn signing_key(&self) -> &PublicKey {
        self.server.signing_key()
    }

    /// Key that signs the publications file
    pub fn publications_key(&self) -> &PublicKey {
        self.server.publications_key()
    }

    /// Publish the calendar head
    pub fn publish(&self) -> Result<PublicationRecord> {
        self.server.publish()
    }

    pub fn set_signer_available(&self, available: bool) {
        self.server.state().availability.signer.store(available, Ordering::SeqCst);
    }

    pub fn set_extender_available(&self, available: bool) {
        self.server.state().availability.extender.store(available, Ordering::SeqCst);
    }

    pub fn set_publications_available(&self, available: bool) {
        self.server
            .state()
            .availability
            .publications
            .store(available, Ordering::SeqCst);
    }

    /// Number of publications file downloads so far
    pub fn publication_requests(&self) -> u64 {
        self.server.state().publication_requests.load(Ordering::SeqCst)
    }

    pub fn timestamps_issued(&self) -> u64 {
        self.server.state().timestamps_issued.load(Ordering::Relaxed)
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
