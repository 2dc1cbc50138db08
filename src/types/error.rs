//! Error types
//!
//! None of these is fatal to the process. Model and parse errors are
//! absorbed by the rule-engine fallback; channel and exchange errors are
//! returned to whoever initiated a send.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while loading or running the language model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model asset not found: {0}")]
    AssetMissing(PathBuf),

    #[error("failed to copy model asset {path}: {source}")]
    AssetCopy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("incompatible model format: {0}")]
    IncompatibleFormat(String),

    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

/// Model output that cannot be turned into an assessment
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Transport-level failure on the pairing link
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("paired device is not reachable")]
    Unreachable,

    #[error("paired device did not reply")]
    NoReply,

    #[error("pairing channel closed")]
    Closed,

    #[error("this channel cannot carry replies")]
    RepliesUnsupported,
}

/// Inbound message that cannot be dispatched
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Missing message type")]
    MissingType,

    #[error("Unknown message type")]
    UnknownType(String),

    #[error("Malformed {kind} payload: {detail}")]
    Malformed { kind: String, detail: String },
}

/// Failure of an outbound exchange
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("peer rejected message: {0}")]
    Rejected(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
