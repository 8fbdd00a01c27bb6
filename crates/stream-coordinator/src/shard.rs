//! Per-shard iteration state machine.
//!
//! The forest itself — parent/child links, `roots`, `active` — is owned by
//! [`crate::coordinator::Coordinator`] as a flat arena addressed by [`ShardId`]
//! — a flat table addressed by index rather than object references — so tree-shaped operations
//! (`load_children`, `walk_tree`, token assembly) live on `Coordinator`. What's left
//! on `Shard` is exactly the per-shard iterator state machine: refreshing the
//! iterator handle, detecting exhaustion, and seeking.

use crate::error::{Error, Result};
use crate::session::{IteratorType, Record, Session, StreamClient};

/// Bounds the empty-poll retry burst inside a single `Shard::next()` call — a newly
/// created iterator on an open shard may need a few empty polls before the service
/// positions it near the stream head.
pub const CALLS_TO_REACH_HEAD: u32 = 3;

/// Opaque index into the coordinator's shard arena. Buffer entries and parent/child
/// links store this rather than owning or borrowing a `Shard` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardId(pub(crate) usize);

/// The remote iterator handle backing a shard, including the `last_iterator`
/// sentinel for a drained, non-refreshable iterator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IteratorHandle {
    /// No iterator has been requested yet.
    Unset,
    /// A live remote iterator handle.
    Open(String),
    /// The iterator is terminal and will never be refreshed.
    Closed,
}

#[derive(Debug)]
pub struct Shard {
    pub shard_id: String,
    pub(crate) parent: Option<ShardId>,
    pub(crate) children: Vec<ShardId>,
    pub(crate) children_loaded: bool,

    pub(crate) iterator_type: Option<IteratorType>,
    pub(crate) sequence_number: Option<String>,
    pub(crate) iterator_handle: IteratorHandle,
    pub(crate) empty_responses: u32,
}

impl Shard {
    pub(crate) fn new(shard_id: String, parent: Option<ShardId>) -> Self {
        Shard {
            shard_id,
            parent,
            children: Vec::new(),
            children_loaded: false,
            iterator_type: None,
            sequence_number: None,
            iterator_handle: IteratorHandle::Unset,
            empty_responses: 0,
        }
    }

    /// A shard whose iterator is closed and has pinned to a concrete, delivered
    /// position will never yield more records.
    pub fn exhausted(&self) -> bool {
        matches!(self.iterator_handle, IteratorHandle::Closed)
            && matches!(
                self.iterator_type,
                Some(IteratorType::Latest) | Some(IteratorType::AfterSequenceNumber)
            )
    }

    /// A shard that hasn't yet pinned to a delivered sequence number — the condition
    /// under which `Shard::next` retries in place and `Coordinator::heartbeat` must
    /// keep its iterator alive.
    fn is_open_ended(&self) -> bool {
        self.sequence_number.is_none()
    }

    /// Snapshot used to build a [`crate::token::Token`]. `parent_id` is
    /// resolved by the coordinator, which owns the arena `self.parent` indexes into.
    pub(crate) fn local_state(&self) -> (Option<IteratorType>, Option<String>) {
        (self.iterator_type, self.sequence_number.clone())
    }

    /// Discards the current iterator and requests a new one. May raise
    /// [`crate::Error::RecordsExpired`]; the coordinator's retry-to-trim_horizon
    /// policy lives one level up, since it needs to re-invoke this
    /// same method.
    pub(crate) async fn jump_to<C: StreamClient>(
        &mut self,
        session: &Session<C>,
        stream_arn: &str,
        iterator_type: IteratorType,
        sequence_number: Option<String>,
    ) -> Result<()> {
        let iterator_id = session
            .get_shard_iterator(
                stream_arn,
                &self.shard_id,
                iterator_type,
                sequence_number.as_deref(),
            )
            .await?;

        self.iterator_handle = IteratorHandle::Open(iterator_id);
        self.iterator_type = Some(iterator_type);
        self.sequence_number = sequence_number;
        self.empty_responses = 0;
        Ok(())
    }

    /// Marks the delivery of `record`: the shard's checkpoint becomes
    /// `(after_sequence, record.sequence_number)` regardless of its prior iterator
    /// type.
    pub(crate) fn checkpoint(&mut self, sequence_number: String) {
        self.iterator_type = Some(IteratorType::AfterSequenceNumber);
        self.sequence_number = Some(sequence_number);
    }

    /// Fetches one page (possibly empty) from the shard's current iterator.
    ///
    /// If the response has no records and no next iterator, the shard is marked
    /// exhausted. If there's a next iterator but no records, `empty_responses` is
    /// incremented and, while still below [`CALLS_TO_REACH_HEAD`] and the shard
    /// hasn't yet pinned to a delivered position, the shard immediately polls again.
    /// An iterator that ages out mid-flight ([`crate::Error::ShardIteratorExpired`])
    /// is silently re-acquired from the shard's current `(iterator_type,
    /// sequence_number)` and the poll retried.
    pub(crate) async fn next<C: StreamClient>(
        &mut self,
        session: &Session<C>,
        stream_arn: &str,
    ) -> Result<Vec<Record>> {
        let IteratorHandle::Open(mut iterator_id) = std::mem::replace(&mut self.iterator_handle, IteratorHandle::Unset)
        else {
            // No live iterator: already exhausted, or never jumped. Nothing to poll.
            return Ok(Vec::new());
        };

        loop {
            let response = match session.get_stream_records(&iterator_id).await {
                Ok(response) => response,
                Err(Error::ShardIteratorExpired) => {
                    tracing::debug!(shard = %self.shard_id, "iterator expired mid-flight, re-acquiring");
                    let iterator_type = self.iterator_type.unwrap_or(IteratorType::TrimHorizon);
                    let sequence_number = self.sequence_number.clone();
                    self.jump_to(session, stream_arn, iterator_type, sequence_number).await?;
                    let IteratorHandle::Open(reacquired) = &self.iterator_handle else {
                        unreachable!("jump_to always leaves the handle Open on success");
                    };
                    iterator_id = reacquired.clone();
                    continue;
                }
                Err(err) => return Err(err),
            };

            match response.next_shard_iterator {
                None => {
                    self.iterator_handle = IteratorHandle::Closed;
                    tracing::debug!(shard = %self.shard_id, "shard exhausted");
                    return Ok(response.records);
                }
                Some(next_id) => {
                    if !response.records.is_empty() {
                        self.iterator_handle = IteratorHandle::Open(next_id);
                        self.empty_responses = 0;
                        return Ok(response.records);
                    }

                    self.empty_responses += 1;
                    if self.empty_responses < CALLS_TO_REACH_HEAD && self.is_open_ended() {
                        tracing::trace!(
                            shard = %self.shard_id,
                            empty_responses = self.empty_responses,
                            "empty response, retrying in place"
                        );
                        iterator_id = next_id;
                        continue;
                    }

                    self.iterator_handle = IteratorHandle::Open(next_id);
                    return Ok(Vec::new());
                }
            }
        }
    }

    /// Advances page-by-page from the shard's current position, discarding records
    /// older than `time`, and returns the first page containing a record at or after
    /// `time`. Stops (returning no records) once the shard is exhausted.
    pub(crate) async fn seek_to<C: StreamClient>(
        &mut self,
        session: &Session<C>,
        stream_arn: &str,
        time: time::OffsetDateTime,
    ) -> Result<Vec<Record>> {
        loop {
            let records = self.next(session, stream_arn).await?;
            let hit: Vec<Record> = records
                .into_iter()
                .skip_while(|r| r.meta.created_at < time)
                .collect();

            if !hit.is_empty() {
                return Ok(hit);
            }
            if self.exhausted() {
                return Ok(Vec::new());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_requires_closed_and_pinned_type() {
        let mut shard = Shard::new("s".into(), None);
        assert!(!shard.exhausted());

        shard.iterator_handle = IteratorHandle::Closed;
        shard.iterator_type = Some(IteratorType::TrimHorizon);
        assert!(!shard.exhausted(), "trim_horizon shards are never exhausted");

        shard.iterator_type = Some(IteratorType::Latest);
        assert!(shard.exhausted());

        shard.iterator_type = Some(IteratorType::AfterSequenceNumber);
        assert!(shard.exhausted());
    }

    #[test]
    fn checkpoint_pins_to_after_sequence() {
        let mut shard = Shard::new("s".into(), None);
        shard.iterator_type = Some(IteratorType::TrimHorizon);
        shard.checkpoint("42".to_string());
        assert_eq!(shard.iterator_type, Some(IteratorType::AfterSequenceNumber));
        assert_eq!(shard.sequence_number.as_deref(), Some("42"));
    }

    #[test]
    fn is_open_ended_tracks_sequence_number() {
        let mut shard = Shard::new("s".into(), None);
        assert!(shard.is_open_ended());
        shard.sequence_number = Some("1".into());
        assert!(!shard.is_open_ended());
    }
}
