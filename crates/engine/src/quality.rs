//! Scalar confidence scoring and search-phase classification.
//!
//! Single source of truth for the quality thresholds. The system prompt
//! and the progress advisor reference these by name, never by literal.

use braid_domain::RatingLabel;
use parking_lot::Mutex;
use serde::Serialize;

use crate::evidence::EvidenceStore;

/// Confidence at or above which evidence is considered sufficient.
pub const READY_THRESHOLD: u32 = 60;
/// Searches without traction after which the session counts as stalled.
pub const STALL_SEARCH_COUNT: usize = 6;

const WEIGHT_RELEVANCE: f64 = 35.0;
const WEIGHT_QUALITY: f64 = 25.0;
const WEIGHT_BREADTH: u32 = 10;
const WEIGHT_DRAFT: u32 = 15;
const WEIGHT_CRITIQUE: u32 = 15;
const WEIGHT_CRITIQUE_FAILED: u32 = 5;

/// Retrieval scores above this already indicate a strong semantic match,
/// so the quality factor saturates there.
const SCORE_SATURATION: f64 = 0.5;

/// Where the search currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Continue,
    Ready,
    Finalize,
    Stalled,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Continue => "continue",
            Phase::Ready => "ready",
            Phase::Finalize => "finalize",
            Phase::Stalled => "stalled",
        }
    }
}

#[derive(Debug, Clone)]
struct CritiqueOutcome {
    passed: bool,
    verdict: String,
}

/// Owns draft/critique state and derives confidence and phase from the
/// evidence store.
#[derive(Default)]
pub struct QualityGate {
    draft: Mutex<Option<usize>>,
    critique: Mutex<Option<CritiqueOutcome>>,
}

impl QualityGate {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Draft / critique tracking ─────────────────────────────────

    pub fn record_draft(&self, length: usize) {
        *self.draft.lock() = Some(length);
    }

    pub fn has_draft(&self) -> bool {
        self.draft.lock().is_some()
    }

    pub fn record_critique(&self, passed: bool, verdict: &str) {
        *self.critique.lock() = Some(CritiqueOutcome {
            passed,
            verdict: verdict.to_string(),
        });
    }

    pub fn last_critique_passed(&self) -> Option<bool> {
        self.critique.lock().as_ref().map(|c| c.passed)
    }

    pub fn last_critique_verdict(&self) -> Option<String> {
        self.critique.lock().as_ref().map(|c| c.verdict.clone())
    }

    // ── Confidence ────────────────────────────────────────────────

    /// Five-factor confidence score in [0, 100], deterministic from the
    /// evidence state.
    pub fn confidence(&self, evidence: &EvidenceStore) -> u32 {
        let counts = evidence.rating_counts();
        let relevant = *counts.get(&RatingLabel::Relevant).unwrap_or(&0);
        let partial = *counts.get(&RatingLabel::Partial).unwrap_or(&0);
        let total_rated: usize = counts.values().sum();

        let relevance = if total_rated == 0 {
            0
        } else {
            let ratio = (relevant as f64 + 0.3 * partial as f64) / total_rated as f64;
            (WEIGHT_RELEVANCE * ratio).min(WEIGHT_RELEVANCE) as u32
        };

        let quality = {
            let saturated = (evidence.top_score() / SCORE_SATURATION).min(1.0);
            (WEIGHT_QUALITY * saturated) as u32
        };

        let breadth = (evidence.query_count() as u32 * 3).min(WEIGHT_BREADTH);

        let draft = if self.has_draft() { WEIGHT_DRAFT } else { 0 };

        let critique = match self.last_critique_passed() {
            Some(true) => WEIGHT_CRITIQUE,
            Some(false) => WEIGHT_CRITIQUE_FAILED,
            None => 0,
        };

        (relevance + quality + breadth + draft + critique).min(100)
    }

    // ── Phase ─────────────────────────────────────────────────────

    pub fn phase(&self, evidence: &EvidenceStore) -> Phase {
        let relevant = *evidence
            .rating_counts()
            .get(&RatingLabel::Relevant)
            .unwrap_or(&0);

        if evidence.query_count() >= STALL_SEARCH_COUNT && relevant < 2 {
            return Phase::Stalled;
        }

        let confidence = self.confidence(evidence);
        if confidence >= READY_THRESHOLD {
            if self.has_draft() && self.last_critique_passed() == Some(true) {
                return Phase::Finalize;
            }
            return Phase::Ready;
        }

        Phase::Continue
    }

    // ── Guidance ──────────────────────────────────────────────────

    /// Copy-paste-ready next step for the LM.
    pub fn guidance(&self, evidence: &EvidenceStore) -> String {
        match self.phase(evidence) {
            Phase::Stalled => "Evidence insufficient after multiple searches. \
                               Try reformulate() or broaden filters."
                .into(),
            Phase::Ready => "Evidence sufficient. Call draft_answer() to synthesize.".into(),
            Phase::Finalize => "Draft passed critique. Call FINAL_VAR(answer) to deliver.".into(),
            Phase::Continue => {
                let relevant = *evidence
                    .rating_counts()
                    .get(&RatingLabel::Relevant)
                    .unwrap_or(&0);
                if relevant == 0 {
                    "No relevant results yet. Try different query angles or broader filters."
                        .into()
                } else {
                    format!(
                        "{relevant} relevant sources found. Continue searching for more \
                         evidence or draft if confident."
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_domain::{Hit, SearchKind, SearchLogEntry};

    fn store_with(hits: &[(&str, f64)], searches: usize) -> EvidenceStore {
        let store = EvidenceStore::new();
        for (id, score) in hits {
            store.register_hit(Hit {
                id: (*id).into(),
                score: *score,
                question: String::new(),
                answer: String::new(),
                metadata: Default::default(),
            });
        }
        for i in 0..searches {
            store.log_search(SearchLogEntry {
                kind: SearchKind::Search,
                query: format!("q{i}"),
                filters: None,
                num_results: 1,
            });
        }
        store
    }

    #[test]
    fn confidence_is_zero_on_empty_state() {
        let gate = QualityGate::new();
        let store = EvidenceStore::new();
        assert_eq!(gate.confidence(&store), 0);
    }

    #[test]
    fn top_score_factor_saturates_at_half() {
        let gate = QualityGate::new();
        // score 0.5 and score 0.9 both max out the 25-point factor
        let store = store_with(&[("1", 0.5)], 0);
        assert_eq!(gate.confidence(&store), 25);
        let store = store_with(&[("1", 0.9)], 0);
        assert_eq!(gate.confidence(&store), 25);
        // score 0.25 earns half
        let store = store_with(&[("1", 0.25)], 0);
        assert_eq!(gate.confidence(&store), 12);
    }

    #[test]
    fn breadth_caps_at_weight() {
        let gate = QualityGate::new();
        let store = store_with(&[], 2);
        assert_eq!(gate.confidence(&store), 6);
        let store = store_with(&[], 10);
        assert_eq!(gate.confidence(&store), 10);
    }

    #[test]
    fn relevance_factor_counts_partials_at_third_weight() {
        let gate = QualityGate::new();
        let store = store_with(&[("1", 0.0), ("2", 0.0)], 0);
        store.set_rating("1", RatingLabel::Relevant, 5);
        store.set_rating("2", RatingLabel::Partial, 3);
        // (1 + 0.3) / 2 * 35 = 22.75 -> 22
        assert_eq!(gate.confidence(&store), 22);
    }

    #[test]
    fn draft_and_critique_factors() {
        let gate = QualityGate::new();
        let store = EvidenceStore::new();
        gate.record_draft(500);
        assert_eq!(gate.confidence(&store), 15);
        gate.record_critique(false, "FAIL: weak citations");
        assert_eq!(gate.confidence(&store), 20);
        gate.record_critique(true, "PASS");
        assert_eq!(gate.confidence(&store), 30);
    }

    #[test]
    fn phase_progression() {
        let gate = QualityGate::new();
        let store = store_with(&[("1", 0.9), ("2", 0.85), ("3", 0.8)], 2);
        assert_eq!(gate.phase(&store), Phase::Continue);

        for id in ["1", "2", "3"] {
            store.set_rating(id, RatingLabel::Relevant, 5);
        }
        // 35 + 25 + 6 = 66 ≥ READY_THRESHOLD, no draft yet
        assert_eq!(gate.phase(&store), Phase::Ready);

        gate.record_draft(800);
        gate.record_critique(false, "FAIL");
        assert_eq!(gate.phase(&store), Phase::Ready);

        gate.record_critique(true, "PASS");
        assert_eq!(gate.phase(&store), Phase::Finalize);
    }

    #[test]
    fn stalled_beats_confidence() {
        let gate = QualityGate::new();
        let store = store_with(&[("1", 0.9)], STALL_SEARCH_COUNT);
        store.set_rating("1", RatingLabel::Relevant, 5);
        gate.record_draft(100);
        gate.record_critique(true, "PASS");
        // One relevant is < 2, searches at the stall count.
        assert_eq!(gate.phase(&store), Phase::Stalled);
    }

    #[test]
    fn guidance_names_the_next_tool() {
        let gate = QualityGate::new();
        let store = store_with(&[("1", 0.9), ("2", 0.9), ("3", 0.9)], 1);
        for id in ["1", "2", "3"] {
            store.set_rating(id, RatingLabel::Relevant, 5);
        }
        assert!(gate.guidance(&store).contains("draft_answer()"));
        gate.record_draft(100);
        gate.record_critique(true, "PASS");
        assert!(gate.guidance(&store).contains("FINAL_VAR"));
    }
}
