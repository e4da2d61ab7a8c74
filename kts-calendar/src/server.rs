//! Calendar server: wires the aggregator, calendar and HTTP surface together

use axum::Router;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use kts_core::publications::PublicationRecord;
use kts_types::{Imprint, PublicKey, Timestamp, TimestampToken};

use crate::batch::{BatchProcessor, BatchRequest};
use crate::calendar::Calendar;
use crate::config::CalendarConfig;
use crate::error::{CalendarError, Result};
use crate::http::{build_router, AppState};
use crate::signer::{Signer, SoftwareSigner, PUBLICATIONS_KEY_ENV, SIGNING_KEY_ENV};

/// The calendar service
pub struct CalendarServer {
    config: CalendarConfig,
    signer: Arc<dyn Signer>,
    state: Arc<AppState>,
}

impl CalendarServer {
    /// Create a server with keys from the environment
    pub fn new(config: CalendarConfig) -> Result<Self> {
        let signer = SoftwareSigner::from_env_or_generate(SIGNING_KEY_ENV)?;
        let publisher = SoftwareSigner::from_env_or_generate(PUBLICATIONS_KEY_ENV)?;
        Self::with_signers(config, Arc::new(signer), Arc::new(publisher))
    }

    /// Create a server with explicit round and publications signers.
    ///
    /// Spawns the aggregator, so this must run inside a tokio runtime.
    pub fn with_signers(
        config: CalendarConfig,
        signer: Arc<dyn Signer>,
        publisher: Arc<dyn Signer>,
    ) -> Result<Self> {
        config.validate()?;
        info!("Initializing calendar, round key: {}", signer.public_key());

        let calendar = Arc::new(RwLock::new(Calendar::new(
            Timestamp::now(),
            signer.public_key().clone(),
        )));

        let (request_tx, request_rx) = mpsc::channel(config.batch.max_batch_size * 2);
        let batch_processor = BatchProcessor::new(
            config.batch.clone(),
            signer.clone(),
            calendar.clone(),
            request_rx,
        );
        tokio::spawn(batch_processor.run());

        let state = Arc::new(AppState::new(request_tx, calendar, publisher));

        if let Some(secs) = config.publication_interval_secs {
            tokio::spawn(publish_periodically(state.clone(), Duration::from_secs(secs)));
        }

        Ok(Self {
            config,
            signer,
            state,
        })
    }

    pub fn router(&self) -> Router {
        build_router(&self.config.paths, self.state.clone())
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn signing_key(&self) -> &PublicKey {
        self.signer.public_key()
    }

    pub fn publications_key(&self) -> &PublicKey {
        self.state.publisher.public_key()
    }

    /// Timestamp an imprint without going through HTTP
    pub async fn handle_sign(&self, imprint: Imprint) -> Result<TimestampToken> {
        let (response_tx, response_rx) = oneshot::channel();
        self.state
            .request_tx
            .send(BatchRequest {
                imprint,
                response_tx,
            })
            .await
            .map_err(|_| CalendarError::ShuttingDown)?;
        response_rx.await.map_err(|_| CalendarError::ShuttingDown)?
    }

    /// Publish the current calendar head
    pub fn publish(&self) -> Result<PublicationRecord> {
        self.state.calendar.write().publish()
    }

    /// Serve until ctrl-c
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| CalendarError::Config(format!("invalid listen address: {}", e)))?;
        let listener = TcpListener::bind(addr).await?;

        info!("Calendar listening on {}", listener.local_addr()?);
        info!("Publications key: {}", self.publications_key());

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down calendar server");
            })
            .await?;

        Ok(())
    }
}

async fn publish_periodically(state: Arc<AppState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // First tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let published = state.calendar.write().publish();
        match published {
            Ok(_) => {}
            Err(CalendarError::EmptyCalendar) => {}
            Err(e) => warn!("Periodic publication failed: {}", e),
        }
    }
}
