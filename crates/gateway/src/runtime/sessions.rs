//! Persistent multi-turn sessions.
//!
//! A session owns its driver (and through it the sandbox), its search
//! context, and the swappable bus handle. The manager enforces the
//! single-writer invariant: at most one active search per session, with
//! follow-ups atomically rejected while one is in flight. Idle sessions
//! are reaped on a timer; dropping the handle releases the sandbox.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use braid_domain::error::{Error, Result};
use braid_domain::RunMetadata;
use braid_engine::{BusHandle, Driver, EventBus};
use braid_tools::SearchContext;
use parking_lot::Mutex;

struct Activity {
    search_count: usize,
    last_active: Instant,
    active_search_id: Option<String>,
}

pub struct SessionHandle {
    pub session_id: String,
    pub driver: Mutex<Driver>,
    pub ctx: Arc<SearchContext>,
    pub bus: BusHandle,
    pub metadata: RunMetadata,
    activity: Mutex<Activity>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl SessionHandle {
    pub fn new(
        session_id: &str,
        driver: Driver,
        ctx: Arc<SearchContext>,
        bus: BusHandle,
        metadata: RunMetadata,
        first_search_id: &str,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            driver: Mutex::new(driver),
            ctx,
            bus,
            metadata,
            activity: Mutex::new(Activity {
                search_count: 1,
                last_active: Instant::now(),
                active_search_id: Some(first_search_id.to_string()),
            }),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.activity.lock().active_search_id.is_some()
    }

    pub fn search_count(&self) -> usize {
        self.activity.lock().search_count
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    session_timeout: Duration,
}

impl SessionManager {
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            session_timeout,
        }
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions
            .lock()
            .insert(handle.session_id.clone(), handle);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.get(session_id).map(|s| s.is_busy()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Remove a session. Refuses while a search is active; the sandbox
    /// releases when the last handle drops.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if let Some(active) = &handle.activity.lock().active_search_id {
            return Err(Error::SessionBusy {
                session_id: session_id.to_string(),
                search_id: active.clone(),
            });
        }
        sessions.remove(session_id);
        Ok(())
    }

    /// Atomically claim a session for a follow-up search: rejects while
    /// busy, bumps the counters, and re-points the session's bus handle
    /// at the new search's bus.
    pub fn prepare_follow_up(
        &self,
        session_id: &str,
        new_bus: Arc<EventBus>,
        search_id: &str,
    ) -> Result<Arc<SessionHandle>> {
        let handle = self
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        {
            let mut activity = handle.activity.lock();
            if let Some(active) = &activity.active_search_id {
                return Err(Error::SessionBusy {
                    session_id: session_id.to_string(),
                    search_id: active.clone(),
                });
            }
            activity.search_count += 1;
            activity.last_active = Instant::now();
            activity.active_search_id = Some(search_id.to_string());
        }

        handle.bus.swap(new_bus);
        Ok(handle)
    }

    /// Mark a session's active search complete (worker `finally` path).
    pub fn clear_active(&self, session_id: &str) {
        if let Some(handle) = self.get(session_id) {
            let mut activity = handle.activity.lock();
            activity.active_search_id = None;
            activity.last_active = Instant::now();
        }
    }

    /// Delete idle, non-busy sessions. Returns the removed ids.
    pub fn cleanup_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, handle)| {
                let activity = handle.activity.lock();
                activity.active_search_id.is_none()
                    && now.duration_since(activity.last_active) > self.session_timeout
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
            tracing::info!(session_id = %id, "reaped idle session");
        }
        expired
    }
}
