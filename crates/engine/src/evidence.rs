//! Per-session evidence: deduplicated hit registry, search log, and
//! relevance ratings.
//!
//! All mutation goes through store methods. The registry itself lives
//! behind a shared [`RegistryHandle`] so the sandbox can read the *live*
//! map: tool writes are visible to the LM on its next read without any
//! copying or re-assignment. Callers outside the owning worker must use
//! `snapshot` instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use braid_domain::{Hit, Rating, RatingLabel, SearchLogEntry};
use parking_lot::Mutex;

/// Shared live view of the hit registry, keyed by string id.
pub type RegistryHandle = Arc<Mutex<BTreeMap<String, Hit>>>;

#[derive(Default)]
pub struct EvidenceStore {
    registry: RegistryHandle,
    ratings: Mutex<HashMap<String, Rating>>,
    search_log: Mutex<Vec<SearchLogEntry>>,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ──────────────────────────────────────────────

    /// Register a hit. Deduplicates by id; on conflict the higher-score
    /// copy wins. Returns the id.
    pub fn register_hit(&self, hit: Hit) -> String {
        let id = hit.id.clone();
        let mut registry = self.registry.lock();
        match registry.get(&id) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                registry.insert(id.clone(), hit);
            }
        }
        id
    }

    pub fn get(&self, id: &str) -> Option<Hit> {
        self.registry.lock().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Highest score currently in the registry.
    pub fn top_score(&self) -> f64 {
        self.registry
            .lock()
            .values()
            .map(|h| h.score)
            .fold(0.0, f64::max)
    }

    /// The live registry handle shared with the sandbox. Reads through
    /// this handle always see the latest tool writes; do not replace it
    /// with a copy.
    pub fn registry_handle(&self) -> RegistryHandle {
        self.registry.clone()
    }

    /// Defensive copy of the registry.
    pub fn snapshot(&self) -> BTreeMap<String, Hit> {
        self.registry.lock().clone()
    }

    // ── Search log ────────────────────────────────────────────────

    pub fn log_search(&self, entry: SearchLogEntry) {
        self.search_log.lock().push(entry);
    }

    pub fn search_log(&self) -> Vec<SearchLogEntry> {
        self.search_log.lock().clone()
    }

    /// Number of `search` / `search_multi` entries (browse excluded).
    pub fn query_count(&self) -> usize {
        self.search_log
            .lock()
            .iter()
            .filter(|e| e.kind.is_query())
            .count()
    }

    // ── Ratings ───────────────────────────────────────────────────

    pub fn set_rating(&self, id: &str, rating: RatingLabel, confidence: u8) {
        self.ratings
            .lock()
            .insert(id.to_string(), Rating { rating, confidence });
    }

    pub fn get_rating(&self, id: &str) -> Option<Rating> {
        self.ratings.lock().get(id).copied()
    }

    pub fn rating_counts(&self) -> HashMap<RatingLabel, usize> {
        let mut counts = HashMap::new();
        for r in self.ratings.lock().values() {
            *counts.entry(r.rating).or_insert(0) += 1;
        }
        counts
    }

    pub fn rated_count(&self) -> usize {
        self.ratings.lock().len()
    }

    // ── Evidence retrieval ────────────────────────────────────────

    /// Registry entries for specific ids, preserving the given order.
    pub fn get_evidence(&self, ids: &[String]) -> Vec<Hit> {
        let registry = self.registry.lock();
        ids.iter()
            .filter_map(|id| registry.get(id).cloned())
            .collect()
    }

    /// Up to `n` rated hits, sorted by rating tier (relevant first) then
    /// descending confidence.
    pub fn top_rated(&self, n: usize) -> Vec<Hit> {
        let registry = self.registry.lock();
        let ratings = self.ratings.lock();
        let mut rated: Vec<(&Rating, &Hit)> = ratings
            .iter()
            .filter_map(|(id, rating)| registry.get(id).map(|hit| (rating, hit)))
            .collect();
        rated.sort_by(|a, b| {
            a.0.rating
                .tier()
                .cmp(&b.0.rating.tier())
                .then(b.0.confidence.cmp(&a.0.confidence))
                .then(a.1.id.cmp(&b.1.id))
        });
        rated.into_iter().take(n).map(|(_, hit)| hit.clone()).collect()
    }

    // ── Merge (child delegation) ──────────────────────────────────

    /// Import a child store. Higher scores win on registry conflicts;
    /// ratings merge only where the parent has none.
    pub fn merge(&self, child: &EvidenceStore) {
        for hit in child.registry.lock().values() {
            self.register_hit(hit.clone());
        }
        let mut ratings = self.ratings.lock();
        for (id, rating) in child.ratings.lock().iter() {
            ratings.entry(id.clone()).or_insert(*rating);
        }
    }
}
