//! HTTP surface of the calendar service
//!
//! Routes (paths configurable):
//!
//! ```text
//! POST /signingservice      - JSON SignRequest  -> JSON SignResponse
//! POST /extendingservice    - JSON ExtendRequest -> JSON ExtendResponse
//! GET  /publications.bin    - signed publications file
//! ```

use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use kts_types::{
    ExtendRequest, ExtendResponse, SignRequest, SignResponse, PROTOCOL_VERSION,
};

use crate::batch::BatchRequest;
use crate::calendar::Calendar;
use crate::config::EndpointPaths;
use crate::error::{CalendarError, Result};
use crate::signer::Signer;

/// Per-endpoint switches, used to inject outages
#[derive(Debug)]
pub struct Availability {
    pub signer: AtomicBool,
    pub extender: AtomicBool,
    pub publications: AtomicBool,
}

impl Default for Availability {
    fn default() -> Self {
        Self {
            signer: AtomicBool::new(true),
            extender: AtomicBool::new(true),
            publications: AtomicBool::new(true),
        }
    }
}

impl Availability {
    fn check(flag: &AtomicBool, endpoint: &'static str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CalendarError::Unavailable(endpoint))
        }
    }
}

/// Shared state behind every handler
pub struct AppState {
    pub request_tx: mpsc::Sender<BatchRequest>,
    pub calendar: Arc<RwLock<Calendar>>,
    pub publisher: Arc<dyn Signer>,
    pub availability: Availability,
    pub publication_requests: AtomicU64,
    pub timestamps_issued: AtomicU64,
}

impl AppState {
    pub fn new(
        request_tx: mpsc::Sender<BatchRequest>,
        calendar: Arc<RwLock<Calendar>>,
        publisher: Arc<dyn Signer>,
    ) -> Self {
        Self {
            request_tx,
            calendar,
            publisher,
            availability: Availability::default(),
            publication_requests: AtomicU64::new(0),
            timestamps_issued: AtomicU64::new(0),
        }
    }
}

pub fn build_router(paths: &EndpointPaths, state: Arc<AppState>) -> Router {
    Router::new()
        .route(&paths.sign_path, post(sign))
        .route(&paths.extend_path, post(extend))
        .route(&paths.publications_path, get(publications))
        .with_state(state)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| CalendarError::InvalidRequest(e.to_string()))
}

fn check_version(version: u32) -> Result<()> {
    if version != PROTOCOL_VERSION {
        return Err(kts_types::Error::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: version,
        }
        .into());
    }
    Ok(())
}

async fn sign(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<SignResponse>> {
    Availability::check(&state.availability.signer, "signing")?;
    let request: SignRequest = parse_body(&body)?;
    check_version(request.version)?;
    debug!(imprint = %request.imprint, "Sign request");

    let (response_tx, response_rx) = oneshot::channel();
    state
        .request_tx
        .send(BatchRequest {
            imprint: request.imprint,
            response_tx,
        })
        .await
        .map_err(|_| CalendarError::ShuttingDown)?;

    let token = response_rx.await.map_err(|_| CalendarError::ShuttingDown)??;
    state.timestamps_issued.fetch_add(1, Ordering::Relaxed);

    Ok(Json(SignResponse {
        version: PROTOCOL_VERSION,
        token,
    }))
}

async fn extend(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<ExtendResponse>> {
    Availability::check(&state.availability.extender, "extending")?;
    let request: ExtendRequest = parse_body(&body)?;
    check_version(request.version)?;

    let calendar_chain = state
        .calendar
        .read()
        .extend(&request.registration_time, request.publication_time.as_ref())?;

    Ok(Json(ExtendResponse {
        version: PROTOCOL_VERSION,
        calendar_chain,
    }))
}

async fn publications(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    state.publication_requests.fetch_add(1, Ordering::SeqCst);
    Availability::check(&state.availability.publications, "publications")?;

    let bytes = state.calendar.read().publications_file(state.publisher.as_ref())?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}
