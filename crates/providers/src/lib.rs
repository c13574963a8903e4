//! LM backend adapters.
//!
//! Each adapter translates between Braid's provider-agnostic
//! [`ChatMessage`](braid_domain::ChatMessage) history and one backend's wire
//! format: the Anthropic Messages API, an OpenAI-compatible chat-completions
//! endpoint, or the Claude Code CLI as a subprocess.
//!
//! The adapters are async; [`blocking::BlockingLm`] bridges them into the
//! synchronous [`LmHandler`](braid_domain::LmHandler) contract the engine
//! and tool layer consume.

pub mod anthropic;
pub mod blocking;
pub mod claude_cli;
pub mod openai;
pub mod traits;

pub use blocking::BlockingLm;
pub use traits::{create_provider, Backend, LmProvider, ProviderSettings};
