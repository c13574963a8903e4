//! Shared types for the Braid agentic search service.
//!
//! Everything in this crate is plain data: the event vocabulary that flows
//! over the bus, the evidence shapes (hits, ratings, search-log entries),
//! the iteration/REPL records produced by the driver, and the synchronous
//! LM handler contract the engine and tool layer call into.

pub mod chat;
pub mod classify;
pub mod error;
pub mod event;
pub mod hit;
pub mod repl;
pub mod toolcall;

pub use chat::{ChatMessage, LmHandler, Role};
pub use classify::{ClassConfidence, Classification};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use hit::{Hit, Rating, RatingLabel, SearchKind, SearchLogEntry};
pub use repl::{CodeBlock, IterationRecord, LmCallRecord, ReplResult, RunMetadata};
pub use toolcall::ToolCallRecord;
