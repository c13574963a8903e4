//! The typed event vocabulary carried by the per-search bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every kind of event a search can emit.
///
/// `Done`, `Error`, and `Cancelled` are terminal: once one of them is on the
/// bus, the bus is latched done and no further events are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Metadata,
    Iteration,
    SubIteration,
    ToolStart,
    ToolEnd,
    ToolError,
    Progress,
    Done,
    Error,
    Cancelled,
}

impl EventKind {
    /// Whether emitting this kind latches the bus done.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Done | EventKind::Error | EventKind::Cancelled)
    }
}

/// One record on the bus: kind + JSON payload + wall-clock timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }
}
