use std::time::Duration;

use thiserror::Error;

/// Failures talking to the external agent (membership, coordinates, identity).
#[derive(Debug, Error)]
pub enum AgentError {
    /// Underlying network or process I/O failure.
    #[error("agent transport error: {0}")]
    Io(#[from] std::io::Error),
    /// Request payload could not be encoded.
    #[error("agent request encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// Response payload could not be decoded.
    #[error("agent response decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    /// The agent answered with an explicit error string.
    #[error("agent rejected '{command}': {message}")]
    Rpc {
        /// RPC command that failed.
        command: &'static str,
        /// Error text reported by the agent.
        message: String,
    },
    /// Response did not match the request sequence or expected shape.
    #[error("agent protocol violation: {0}")]
    Protocol(String),
    /// The agent did not answer within the configured deadline.
    #[error("agent request timed out after {0:?}")]
    Timeout(Duration),
    /// The connection was closed by the agent.
    #[error("agent closed the connection")]
    Closed,
    /// The local node name could not be determined.
    #[error("unable to resolve local node name: {0}")]
    Identity(String),
}

/// Whole-cycle failures. Per-node problems never surface here.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Membership could not be listed; nothing is published this cycle.
    #[error("membership lookup failed: {0}")]
    Membership(#[source] AgentError),
    /// The local node identity could not be resolved.
    #[error("local identity lookup failed: {0}")]
    Identity(#[source] AgentError),
}

/// Failures preparing a snapshot for publication.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Snapshot could not be rendered as JSON.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of a single refresh cycle. The previous snapshot stays published.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}
