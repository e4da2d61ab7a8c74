//! Aggregation of sign requests into calendar rounds

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use kts_core::{AggregationLeaf, HashTree, NonceGenerator};
use kts_types::{messages::build_sign_message, Imprint, Timestamp, TimestampToken};

use crate::calendar::Calendar;
use crate::config::BatchConfig;
use crate::error::{CalendarError, Result};
use crate::signer::Signer;

/// A single sign request waiting for its round
pub struct BatchRequest {
    pub imprint: Imprint,
    pub response_tx: oneshot::Sender<Result<TimestampToken>>,
}

/// Accumulates sign requests and closes them into signed rounds
pub struct BatchProcessor {
    config: BatchConfig,
    signer: Arc<dyn Signer>,
    calendar: Arc<RwLock<Calendar>>,
    nonce_gen: NonceGenerator,
    request_rx: mpsc::Receiver<BatchRequest>,
    pending_requests: Vec<BatchRequest>,
}

impl BatchProcessor {
    pub fn new(
        config: BatchConfig,
        signer: Arc<dyn Signer>,
        calendar: Arc<RwLock<Calendar>>,
        request_rx: mpsc::Receiver<BatchRequest>,
    ) -> Self {
        let capacity = config.max_batch_size;
        Self {
            config,
            signer,
            calendar,
            nonce_gen: NonceGenerator::new(),
            request_rx,
            pending_requests: Vec::with_capacity(capacity),
        }
    }

    /// Run the batch processor loop
    pub async fn run(mut self) {
        info!("Batch processor started");

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.batch_interval_ms));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.pending_requests.is_empty() {
                        self.process_batch();
                    }
                }

                Some(request) = self.request_rx.recv() => {
                    self.pending_requests.push(request);

                    if self.pending_requests.len() >= self.config.max_batch_size {
                        self.process_batch();
                    }
                }

                else => {
                    info!("Request channel closed, processing final batch");
                    if !self.pending_requests.is_empty() {
                        self.process_batch();
                    }
                    break;
                }
            }
        }

        info!("Batch processor stopped");
    }

    /// Close the pending requests into one round
    fn process_batch(&mut self) {
        let requests: Vec<BatchRequest> = self.pending_requests.drain(..).collect();
        let batch_size = requests.len();
        debug!("Processing batch of {} requests", batch_size);

        let leaves: Vec<AggregationLeaf> = requests
            .iter()
            .zip(self.nonce_gen.generate_batch(batch_size))
            .map(|(request, nonce)| AggregationLeaf {
                imprint: request.imprint.clone(),
                nonce,
            })
            .collect();
        let tree: HashTree = leaves.iter().map(AggregationLeaf::compute_hash).collect();
        let round_root = tree.root();

        // Time, signature and append happen under one lock so rounds stay ordered
        let sealed = {
            let mut calendar = self.calendar.write();
            let registration_time = calendar.next_round_time(Timestamp::now());
            let message = build_sign_message(&round_root, &registration_time);
            self.signer.sign(&message).and_then(|signature| {
                calendar.append(registration_time, &round_root)?;
                Ok((registration_time, signature))
            })
        };

        let (registration_time, signature) = match sealed {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!("Failed to seal round: {}", e);
                let reason = e.to_string();
                for request in requests {
                    let _ = request
                        .response_tx
                        .send(Err(CalendarError::Signing(reason.clone())));
                }
                return;
            }
        };

        info!(
            "Sealed round with {} leaves at {}",
            tree.leaf_count(),
            registration_time
        );

        for (i, (request, leaf)) in requests.into_iter().zip(leaves).enumerate() {
            let token = tree
                .generate_path(i)
                .map(|aggregation_path| TimestampToken {
                    imprint: leaf.imprint,
                    nonce: leaf.nonce,
                    aggregation_path,
                    round_root,
                    registration_time,
                    signature: signature.clone(),
                    signing_key: self.signer.public_key().clone(),
                    calendar_chain: None,
                })
                .ok_or_else(|| CalendarError::Signing(format!("no path for leaf {}", i)));

            // Receiver may have given up
            let _ = request.response_tx.send(token);
        }
    }
}
