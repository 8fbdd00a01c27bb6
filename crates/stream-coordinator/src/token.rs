//! Checkpoint serialization.
//!
//! `Token` is treated as opaque by callers — they receive it from
//! [`crate::coordinator::Coordinator::token`] and hand it back to
//! [`crate::coordinator::Coordinator::move_to`] (via [`crate::position::Position`]) to
//! resume. Stability across crate versions is a goal, not a promise.

use serde::{Deserialize, Serialize};

use crate::session::IteratorType;

/// Per-shard snapshot inside a [`Token`]. `stream_arn` is deliberately absent here —
/// it's carried once at the top level instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSnapshot {
    pub shard_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iterator_type: Option<IteratorType>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sequence_number: Option<String>,
}

/// The coordinator's full checkpoint: stream arn, active shard ids, and every shard
/// reachable from `roots`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub stream_arn: String,
    pub active: Vec<String>,
    pub shards: Vec<ShardSnapshot>,
}

impl Token {
    /// Serializes to the crate's canonical opaque encoding (JSON).
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a previously-encoded token. Fails if `s` isn't a valid token shape;
    /// the caller surfaces this as [`crate::Error::InvalidPosition`] at the `move_to`
    /// boundary.
    pub fn decode(s: &str) -> serde_json::Result<Token> {
        serde_json::from_str(s)
    }
}
