//! Process-wide cache of the trusted publications file
//!
//! Loading is single-flight: concurrent callers that find the cache empty all
//! await one shared fetch and observe the same outcome. A failed fetch leaves
//! the cache as it was, and the next caller starts a new one.
//!
//! Shared caches are per [`CacheKey`]: clients only share publications that
//! came from the same endpoint and passed the same pinning policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::publications::{PinMode, Publications, PublicationsValidator};
use crate::service::ServiceClient;
use crate::Result;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Publications>>>>;

#[derive(Default)]
struct CacheState {
    current: Option<Arc<Publications>>,
    inflight: Option<SharedFetch>,
}

#[derive(Default)]
pub struct PublicationCache {
    state: Mutex<CacheState>,
    fetches: AtomicU64,
}

/// Identifies the source and trust policy behind a shared cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub publications_url: String,
    pub pin_mode: PinMode,
}

static SHARED: OnceLock<Mutex<HashMap<CacheKey, Arc<PublicationCache>>>> = OnceLock::new();

impl PublicationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache for `key`, created empty on first use
    pub fn shared(key: CacheKey) -> Arc<PublicationCache> {
        let registry = SHARED.get_or_init(Default::default);
        registry.lock().entry(key).or_default().clone()
    }

    /// Current contents, without fetching
    pub fn current(&self) -> Option<Arc<Publications>> {
        self.state.lock().current.clone()
    }

    /// Number of fetches started so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Return the cached publications, fetching them once if empty
    pub async fn ensure_loaded(
        self: &Arc<Self>,
        service: &Arc<dyn ServiceClient>,
        validator: &Arc<dyn PublicationsValidator>,
    ) -> Result<Arc<Publications>> {
        let fetch = {
            let mut state = self.state.lock();
            if let Some(current) = &state.current {
                return Ok(current.clone());
            }
            self.join_or_start(&mut state, service, validator)
        };
        fetch.await
    }

    /// Re-fetch even if loaded. On failure the previous contents stay.
    pub async fn refresh(
        self: &Arc<Self>,
        service: &Arc<dyn ServiceClient>,
        validator: &Arc<dyn PublicationsValidator>,
    ) -> Result<Arc<Publications>> {
        let fetch = {
            let mut state = self.state.lock();
            self.join_or_start(&mut state, service, validator)
        };
        fetch.await
    }

    fn join_or_start(
        self: &Arc<Self>,
        state: &mut CacheState,
        service: &Arc<dyn ServiceClient>,
        validator: &Arc<dyn PublicationsValidator>,
    ) -> SharedFetch {
        if let Some(inflight) = &state.inflight {
            debug!("Joining in-flight publications fetch");
            return inflight.clone();
        }

        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(fetch = n, "Starting publications fetch");

        let cache: Weak<Self> = Arc::downgrade(self);
        let service = service.clone();
        let validator = validator.clone();

        let fetch = async move {
            let outcome = match service.fetch_publications().await {
                Ok(raw) => validator.validate(raw).map(Arc::new),
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                warn!("Publications fetch failed: {}", e);
            }
            if let Some(cache) = cache.upgrade() {
                let mut state = cache.state.lock();
                state.inflight = None;
                if let Ok(publications) = &outcome {
                    state.current = Some(publications.clone());
                }
            }
            outcome
        }
        .boxed()
        .shared();

        state.inflight = Some(fetch.clone());
        fetch
    }
}

impl std::fmt::Debug for PublicationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PublicationCache")
            .field("loaded", &state.current.is_some())
            .field("inflight", &state.inflight.is_some())
            .field("fetches", &self.fetch_count())
            .finish()
    }
}
