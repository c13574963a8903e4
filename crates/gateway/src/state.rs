//! Shared application state.

use std::collections::HashMap;
use std::sync::Arc;

use braid_engine::EventBus;
use braid_tools::KbOverview;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::runtime::sessions::SessionManager;

/// Workers available to run searches concurrently.
pub const WORKER_POOL_SIZE: usize = 4;
/// Active (not-yet-terminal) searches accepted before returning 503.
pub const MAX_CONCURRENT_SEARCHES: usize = 8;

/// Registry of live search buses, keyed by search id. The SSE gateway
/// and the cancel endpoint read from here; a periodic sweep drops buses
/// that have gone terminal.
#[derive(Default)]
pub struct SearchRegistry {
    buses: RwLock<HashMap<String, Arc<EventBus>>>,
}

impl SearchRegistry {
    pub fn insert(&self, search_id: &str, bus: Arc<EventBus>) {
        self.buses.write().insert(search_id.to_string(), bus);
    }

    pub fn get(&self, search_id: &str) -> Option<Arc<EventBus>> {
        self.buses.read().get(search_id).cloned()
    }

    pub fn remove(&self, search_id: &str) {
        self.buses.write().remove(search_id);
    }

    /// Searches that have not reached a terminal event yet.
    pub fn active_count(&self) -> usize {
        self.buses.read().values().filter(|b| !b.is_done()).count()
    }

    /// Drop buses whose search has finished (terminal event emitted).
    pub fn sweep_finished(&self) -> usize {
        let mut buses = self.buses.write();
        let before = buses.len();
        buses.retain(|_, bus| !bus.is_done());
        before - buses.len()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub searches: Arc<SearchRegistry>,
    pub sessions: Arc<SessionManager>,
    /// Bounded worker pool; searches queue here when all workers busy.
    pub pool: Arc<Semaphore>,
    /// Taxonomy overview cached at startup (None when unreachable).
    pub kb_overview: Arc<RwLock<Option<KbOverview>>>,
    /// Last Cascade URL that answered the health probe.
    pub cascade_url: Arc<RwLock<Option<String>>>,
    /// SHA-256 of `SEARCH_API_KEY`; `None` = auth disabled.
    pub api_key_hash: Option<Arc<Vec<u8>>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let api_key_hash = if config.search_api_key.is_empty() {
            None
        } else {
            Some(Arc::new(
                Sha256::digest(config.search_api_key.as_bytes()).to_vec(),
            ))
        };
        let sessions = Arc::new(SessionManager::new(std::time::Duration::from_secs(
            config.session_timeout_secs,
        )));
        Self {
            config: Arc::new(config),
            searches: Arc::new(SearchRegistry::default()),
            sessions,
            pool: Arc::new(Semaphore::new(WORKER_POOL_SIZE)),
            kb_overview: Arc::new(RwLock::new(None)),
            cascade_url: Arc::new(RwLock::new(None)),
            api_key_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_domain::EventKind;

    #[test]
    fn registry_counts_only_live_searches() {
        let registry = SearchRegistry::default();
        let a = Arc::new(EventBus::new());
        let b = Arc::new(EventBus::new());
        registry.insert("a", a.clone());
        registry.insert("b", b.clone());
        assert_eq!(registry.active_count(), 2);

        a.emit(EventKind::Done, serde_json::json!({}));
        assert_eq!(registry.active_count(), 1);

        assert_eq!(registry.sweep_finished(), 1);
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }
}
