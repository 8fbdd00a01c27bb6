//! Thin adapter over the four remote operations the coordinator needs, plus a
//! retry/backoff wrapper.
//!
//! The crate never speaks a wire protocol itself — [`StreamClient`] is the seam a
//! caller implements against whatever transport (gRPC, HTTP, an in-process fake for
//! tests) backs their stream service.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default cap on retry attempts for a single `call_with_retries` invocation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// A shard is open-ended (`trim_horizon`/`latest`) until its first record is
/// delivered, at which point it pins to `after_sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IteratorType {
    TrimHorizon,
    Latest,
    AtSequenceNumber,
    AfterSequenceNumber,
}

impl IteratorType {
    /// Whether this iterator type requires a `sequence_number` argument.
    pub fn requires_sequence_number(self) -> bool {
        matches!(
            self,
            IteratorType::AtSequenceNumber | IteratorType::AfterSequenceNumber
        )
    }
}

/// One node of `DescribeStream`'s shard listing.
#[derive(Debug, Clone)]
pub struct ShardDescriptor {
    pub shard_id: String,
    pub parent_shard_id: Option<String>,
    pub sequence_number_range: SequenceNumberRange,
}

impl ShardDescriptor {
    /// A shard is closed iff `ending_sequence_number` is present.
    pub fn is_closed(&self) -> bool {
        self.sequence_number_range.ending_sequence_number.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SequenceNumberRange {
    pub starting_sequence_number: String,
    pub ending_sequence_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DescribeStreamResponse {
    pub shards: Vec<ShardDescriptor>,
    pub stream_arn: String,
}

#[derive(Debug, Clone)]
pub struct GetRecordsResponse {
    pub records: Vec<Record>,
    /// Absence signals the iterator is terminal (shard closed and drained).
    pub next_shard_iterator: Option<String>,
}

/// A single change-data-capture record. The record body is opaque to this crate —
/// decoding it into a user type is left to the caller.
#[derive(Debug, Clone)]
pub struct Record {
    pub meta: RecordMeta,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub sequence_number: String,
    /// Approximate creation time, used by `Shard::seek_to` for timestamp seeks.
    pub created_at: time::OffsetDateTime,
}

/// How a [`StreamClient`] error should be handled by [`Session::call_with_retries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A transient service error; retry with backoff.
    Retryable,
    /// The requested sequence number is past the shard's trim horizon.
    RecordsExpired,
    /// The iterator handed to `get_stream_records` aged out before use.
    ShardIteratorExpired,
    /// A conditional operation failed; surface to the caller untouched.
    ConstraintViolation,
    /// Anything else: propagate immediately.
    Fatal,
}

/// The four remote operations the coordinator depends on.
#[async_trait::async_trait]
pub trait StreamClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn describe_stream(
        &self,
        stream_arn: &str,
        first_shard: Option<&str>,
    ) -> std::result::Result<DescribeStreamResponse, Self::Error>;

    async fn get_shard_iterator(
        &self,
        stream_arn: &str,
        shard_id: &str,
        iterator_type: IteratorType,
        sequence_number: Option<&str>,
    ) -> std::result::Result<String, Self::Error>;

    async fn get_stream_records(
        &self,
        iterator_id: &str,
    ) -> std::result::Result<GetRecordsResponse, Self::Error>;

    /// Classifies an error returned by any of the three calls above. Implementations
    /// map their transport's real error codes (`InternalServerError`,
    /// `ProvisionedThroughputExceededException`, `ConditionalCheckFailedException`,
    /// ...) onto this small closed set.
    fn classify(&self, error: &Self::Error) -> ErrorClass;
}

/// Exponential backoff policy for `call_with_retries`: `base · 2^attempts`, capped at
/// `cap` and at `max_attempts` tries total. Mirrors the builder shape of
/// `journal-client`'s `ExponentialBackoff` (`with_min`/`with_max`), but owns no
/// mutable error-count state itself — `Session` tracks attempts per call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            base: Duration::from_millis(50),
            cap: Duration::from_secs(20),
            max_attempts,
        }
    }

    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the `attempt`'th retry (1-indexed).
    fn delay(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Wraps a [`StreamClient`] with a retry/backoff policy.
pub struct Session<C: StreamClient> {
    client: C,
    policy: RetryPolicy,
}

impl<C: StreamClient> Session<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(client: C, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn describe_stream(
        &self,
        stream_arn: &str,
        first_shard: Option<&str>,
    ) -> Result<DescribeStreamResponse> {
        self.call_with_retries("describe_stream", || {
            self.client.describe_stream(stream_arn, first_shard)
        })
        .await
    }

    pub async fn get_shard_iterator(
        &self,
        stream_arn: &str,
        shard_id: &str,
        iterator_type: IteratorType,
        sequence_number: Option<&str>,
    ) -> Result<String> {
        self.call_with_retries("get_shard_iterator", || {
            self.client
                .get_shard_iterator(stream_arn, shard_id, iterator_type, sequence_number)
        })
        .await
    }

    pub async fn get_stream_records(&self, iterator_id: &str) -> Result<GetRecordsResponse> {
        self.call_with_retries("get_stream_records", || {
            self.client.get_stream_records(iterator_id)
        })
        .await
    }

    /// Invokes `op`, retrying on [`ErrorClass::Retryable`] errors with exponential
    /// backoff up to `policy.max_attempts`. Non-retryable errors and the attempt-cap
    /// overrun propagate immediately.
    async fn call_with_retries<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, C::Error>>,
    {
        let mut attempts = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.client.classify(&err) {
                    ErrorClass::Retryable => {
                        attempts += 1;
                        if attempts > self.policy.max_attempts {
                            tracing::warn!(operation, attempts, "retry budget exhausted");
                            return Err(Error::RetriesExhausted {
                                operation,
                                attempts,
                            });
                        }
                        let delay = self.policy.delay(attempts);
                        tracing::debug!(operation, attempts, ?delay, "retrying after transient error");
                        tokio::time::sleep(delay).await;
                    }
                    ErrorClass::RecordsExpired => return Err(Error::RecordsExpired),
                    ErrorClass::ShardIteratorExpired => return Err(Error::ShardIteratorExpired),
                    ErrorClass::ConstraintViolation => {
                        return Err(Error::ConstraintViolation(operation.to_string()))
                    }
                    ErrorClass::Fatal => return Err(Error::Service(Box::new(err))),
                },
            }
        }
    }
}
