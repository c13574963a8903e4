//! The Braid core: event bus, evidence store, quality gate, sandbox,
//! iteration driver, and the streaming/audit loggers.
//!
//! Everything here is session-scoped. A session exclusively owns its
//! driver, sandbox, evidence store, and quality gate; the bus is the one
//! shared channel, read concurrently by the SSE gateway and the JSONL
//! audit writer.

pub mod bus;
pub mod driver;
pub mod evidence;
pub mod logger;
pub mod prompts;
pub mod quality;
pub mod sandbox;

pub use bus::{BusHandle, EventBus};
pub use driver::{Completion, Driver, DriverLogger, NullLogger};
pub use evidence::{EvidenceStore, RegistryHandle};
pub use logger::{ChildLogger, JsonlWriter, StreamingLogger};
pub use quality::{Phase, QualityGate, READY_THRESHOLD, STALL_SEARCH_COUNT};
pub use sandbox::{OutputBuffer, Sandbox, SandboxBuilder};
