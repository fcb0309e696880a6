//! Domain errors for jarvis.
//!
//! Everything else is carried as `anyhow::Error` with context attached at the
//! I/O and network boundaries.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JarvisError {
    /// The configuration file does not exist. Startup aborts, there is no fallback.
    #[error("{} not found, could not load LLM configuration", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration in {}: {source}", path.display())]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("last_health_check is not an ISO-8601 timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid conversation id {0:?}")]
    InvalidConversationId(String),

    /// A non-streaming completion came back without any choice.
    #[error("completion response contained no choices")]
    EmptyCompletion,
}
