//! Per-session tool state.
//!
//! One `SearchContext` per session, shared (via `Arc`) by every tool
//! closure registered into the sandbox. All mutable configuration —
//! models, depths, the audit sink — lives here; there are no process-wide
//! singletons below the dispatcher.

use std::sync::Arc;

use braid_domain::{Classification, LmHandler, ToolCallRecord};
use braid_engine::logger::JsonlWriter;
use braid_engine::sandbox::{CallSink, OutputBuffer};
use braid_engine::{BusHandle, EvidenceStore, QualityGate};
use parking_lot::{Mutex, RwLock};

use crate::cascade::CascadeApi;
use crate::kb::KbOverview;

/// Nesting configuration for `rlm_query`.
#[derive(Debug, Clone)]
pub struct DelegationConfig {
    /// This context's depth: 0 for the root agent, 1+ for children.
    pub depth: usize,
    /// Hard cap on nesting. 0 removes the tool from the namespace.
    pub max_delegation_depth: usize,
    /// Base iteration budget for delegated children.
    pub sub_iterations: usize,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            depth: 0,
            max_delegation_depth: 1,
            sub_iterations: 3,
        }
    }
}

pub struct SearchContext {
    pub api: Arc<dyn CascadeApi>,
    pub bus: BusHandle,
    pub evidence: Arc<EvidenceStore>,
    pub quality: Arc<QualityGate>,
    /// LM for sub-agent calls (evaluation, critique, synthesis) and for
    /// delegated child loops.
    pub lm: Arc<dyn LmHandler>,
    /// LM for the one-shot classification call; falls back to `lm`.
    pub classify_lm: Option<Arc<dyn LmHandler>>,
    /// Sandbox stdout — tool prints interleave with script `print()`.
    pub output: OutputBuffer,
    /// Nested LM-call records drained into each fragment's result.
    pub calls: CallSink,
    pub kb_overview: Option<KbOverview>,
    pub delegation: DelegationConfig,
    /// When set, `research` fans out through `search_multi` instead of
    /// single-collection `search`.
    pub multi_mode: bool,

    classification: RwLock<Option<Classification>>,
    tool_calls: Mutex<Vec<ToolCallRecord>>,
    current_parent: Mutex<Option<usize>>,
    audit: RwLock<Option<Arc<JsonlWriter>>>,
}

impl SearchContext {
    pub fn new(
        api: Arc<dyn CascadeApi>,
        bus: BusHandle,
        lm: Arc<dyn LmHandler>,
        output: OutputBuffer,
        calls: CallSink,
    ) -> Self {
        Self {
            api,
            bus,
            evidence: Arc::new(EvidenceStore::new()),
            quality: Arc::new(QualityGate::new()),
            lm,
            classify_lm: None,
            output,
            calls,
            kb_overview: None,
            delegation: DelegationConfig::default(),
            multi_mode: false,
            classification: RwLock::new(None),
            tool_calls: Mutex::new(Vec::new()),
            current_parent: Mutex::new(None),
            audit: RwLock::new(None),
        }
    }

    /// Print a line to the sandbox stdout (what the LM sees).
    pub fn print(&self, line: &str) {
        self.output.line(line);
    }

    // ── Classification ────────────────────────────────────────────

    pub fn classification(&self) -> Option<Classification> {
        self.classification.read().clone()
    }

    pub fn set_classification(&self, classification: Option<Classification>) {
        *self.classification.write() = classification;
    }

    // ── Tool-call tree (used by the tracker) ──────────────────────

    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.tool_calls.lock().clone()
    }

    pub(crate) fn with_tool_calls<T>(&self, f: impl FnOnce(&mut Vec<ToolCallRecord>) -> T) -> T {
        f(&mut self.tool_calls.lock())
    }

    pub(crate) fn current_parent(&self) -> Option<usize> {
        *self.current_parent.lock()
    }

    pub(crate) fn set_current_parent(&self, idx: Option<usize>) {
        *self.current_parent.lock() = idx;
    }

    // ── Audit sink (rebindable per search) ────────────────────────

    pub fn audit(&self) -> Option<Arc<JsonlWriter>> {
        self.audit.read().clone()
    }

    /// Point the context at the current search's audit file. Called once
    /// per search, alongside the bus swap.
    pub fn rebind_audit(&self, jsonl: Option<Arc<JsonlWriter>>) {
        *self.audit.write() = jsonl;
    }
}
