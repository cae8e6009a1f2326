use thiserror::Error;

/// Typed failures the engine needs to branch on. Plumbing code that only
/// ever propagates a failure uses `anyhow::Result` instead; this enum exists
/// for the handful of variants callers actually match on.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("transport error calling {method}: {source}")]
    Transport {
        method: String,
        #[source]
        source: tonic::Status,
    },

    #[error("peer reports pruned history, lowest available height is {lowest_height}")]
    PrunedNode { lowest_height: u64 },

    #[error("method {0} is not present in the peer's reflected descriptor set")]
    UnknownMethod(String),

    #[error("peer does not support gRPC server reflection")]
    ReflectionUnavailable,

    #[error("failed to decode message for {method}: {reason}")]
    DecodeFailure { method: String, reason: String },

    #[error("sink commit failed at height {height}: {source}")]
    SinkCommit {
        height: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("range misconfigured: {0}")]
    RangeMisconfigured(String),

    #[error("prune boundary {lowest_height} exceeds configured stop height {stop}")]
    PruneBoundaryExceedsStop { lowest_height: u64, stop: u64 },

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ExtractError>;
