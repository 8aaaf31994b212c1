/// Shared error type used across all shadow-writing gateway crates.
///
/// Each variant carries the context (provider, key, chunk, task) needed to
/// both classify propagation (§7) and log a single structured line without
/// re-deriving the classification at the call site.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("deadline exceeded for {unit}")]
    Deadline { unit: String },

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Content error: the LLM response was missing or had invalid JSON / schema,
    /// and the lenient repair pass could not recover it.
    #[error("content: {0}")]
    Content(String),

    /// Structural error: validate-stage rejection of a generated artifact.
    #[error("structural: {0}")]
    Structural(String),

    /// All keys for a provider are either cooling or invalidated.
    #[error("all keys exhausted for provider {provider}")]
    AllKeysExhausted { provider: String },

    /// A task's cancel flag was observed at a suspension point (§5).
    #[error("task cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors the call loop (§4.3) should retry via key rotation.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http(_) => true,
            Error::Provider { message, .. } => {
                let m = message.to_ascii_lowercase();
                m.contains("429")
                    || m.contains("rate limit")
                    || m.contains("500")
                    || m.contains("502")
                    || m.contains("503")
                    || m.contains("504")
                    || m.contains("529")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
