/// Shared error type used across all Braid crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Sandbox bootstrap failed. Carries the captured stderr so the caller
    /// can surface the script error verbatim.
    #[error("setup code failed: {stderr}")]
    SetupCode { stderr: String },

    /// The owning bus was cancelled. Used to unwind the iteration driver
    /// and the tool layer; callers translate this into a `cancelled` event,
    /// never into a user-visible error.
    #[error("search cancelled")]
    Cancelled,

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {session_id} is busy with {search_id}")]
    SessionBusy {
        session_id: String,
        search_id: String,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is the cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
