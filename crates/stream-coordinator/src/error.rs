/// Errors surfaced by the coordinator to its caller.
///
/// Two of these — [`Error::RecordsExpired`] and [`Error::ShardIteratorExpired`] — are
/// also produced internally by [`crate::shard::Shard`] and recovered without ever
/// reaching the caller: a shard re-jumps to `trim_horizon` on the former, and
/// silently re-acquires its iterator on the latter.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `move_to` was given a position argument that doesn't match any known shape.
    #[error("don't know how to move to position {0:?}")]
    InvalidPosition(String),

    /// A restored token shares no shard with the live stream topology.
    #[error("token has no relation to the actual stream")]
    InvalidStream,

    /// The requested sequence number is past the shard's trim horizon.
    #[error("sequence number is past the shard's trim horizon")]
    RecordsExpired,

    /// An open iterator aged out before it could be used.
    #[error("shard iterator expired")]
    ShardIteratorExpired,

    /// A conditional remote operation failed; not retried.
    #[error("constraint violation on request {0}")]
    ConstraintViolation(String),

    /// `call_with_retries` exceeded its attempt budget.
    #[error("exceeded retry budget for {operation} after {attempts} attempts")]
    RetriesExhausted { operation: &'static str, attempts: u32 },

    /// Opaque transport/service error from the caller-supplied [`crate::session::StreamClient`].
    #[error(transparent)]
    Service(Box<dyn std::error::Error + Send + Sync + 'static>),
}

pub type Result<T> = std::result::Result<T, Error>;
