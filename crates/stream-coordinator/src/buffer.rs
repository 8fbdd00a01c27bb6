//! Multi-source merge of records from the active shards into one ordered sequence.
//!
//! A `std::collections::BinaryHeap` is a max-heap; entries are wrapped in
//! `Reverse` so the smallest `ordering_key` pops first, the standard
//! min-heap-via-max-heap idiom.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::session::Record;
use crate::shard::ShardId;

/// `(sequence_number, monotonic_tiebreaker)` — lexicographic so records pushed in the
/// same batch preserve arrival order for equal sequence numbers.
type OrderingKey = (String, u64);

struct Entry {
    key: OrderingKey,
    record: Record,
    shard: ShardId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

#[derive(Default)]
pub struct RecordBuffer {
    heap: BinaryHeap<Reverse<Entry>>,
    next_tiebreaker: u64,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record, shard: ShardId) {
        let tiebreaker = self.next_tiebreaker;
        self.next_tiebreaker += 1;
        let key = (record.meta.sequence_number.clone(), tiebreaker);
        self.heap.push(Reverse(Entry { key, record, shard }));
    }

    pub fn push_all(&mut self, entries: impl IntoIterator<Item = (Record, ShardId)>) {
        for (record, shard) in entries {
            self.push(record, shard);
        }
    }

    pub fn pop(&mut self) -> Option<(Record, ShardId)> {
        self.heap.pop().map(|Reverse(e)| (e.record, e.shard))
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes every buffered entry whose origin is `shard`, an `O(n)` scan
    /// run when a shard is promoted or pruned.
    pub(crate) fn remove_shard(&mut self, shard: ShardId) {
        self.heap.retain(|Reverse(entry)| entry.shard != shard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RecordMeta;
    use time::OffsetDateTime;

    fn record(seq: &str) -> Record {
        Record {
            meta: RecordMeta {
                sequence_number: seq.to_string(),
                created_at: OffsetDateTime::UNIX_EPOCH,
            },
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn pops_in_sequence_number_order() {
        let mut buffer = RecordBuffer::new();
        buffer.push(record("003"), ShardId(0));
        buffer.push(record("001"), ShardId(0));
        buffer.push(record("002"), ShardId(1));

        assert_eq!(buffer.pop().unwrap().0.meta.sequence_number, "001");
        assert_eq!(buffer.pop().unwrap().0.meta.sequence_number, "002");
        assert_eq!(buffer.pop().unwrap().0.meta.sequence_number, "003");
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn ties_preserve_push_order() {
        let mut buffer = RecordBuffer::new();
        buffer.push(record("001"), ShardId(0));
        buffer.push(record("001"), ShardId(1));

        let (_, first_shard) = buffer.pop().unwrap();
        let (_, second_shard) = buffer.pop().unwrap();
        assert_eq!(first_shard, ShardId(0));
        assert_eq!(second_shard, ShardId(1));
    }

    #[test]
    fn remove_shard_purges_only_its_entries() {
        let mut buffer = RecordBuffer::new();
        buffer.push(record("001"), ShardId(0));
        buffer.push(record("002"), ShardId(1));
        buffer.remove_shard(ShardId(0));

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.pop().unwrap().1, ShardId(1));
    }

    #[quickcheck_macros::quickcheck]
    fn pop_order_matches_sorted_push_order(mut seqs: Vec<u32>) -> bool {
        seqs.truncate(64);
        let mut buffer = RecordBuffer::new();
        for s in &seqs {
            buffer.push(record(&format!("{:010}", s)), ShardId(0));
        }
        seqs.sort_unstable();

        let mut popped = Vec::new();
        while let Some((record, _)) = buffer.pop() {
            popped.push(record.meta.sequence_number.parse::<u32>().unwrap());
        }
        popped == seqs
    }
}
