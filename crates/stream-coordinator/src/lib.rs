//! Merges a change-data-capture stream's dynamically-splitting shard forest into one
//! ordered record sequence.
//!
//! A stream is a forest of shards that split as they fill; this crate tracks that
//! forest, polls each open shard fairly, and merges their records into a single
//! sequence ordered by `(sequence_number, arrival order)`. Decoding record bodies,
//! choosing when to call [`Coordinator::heartbeat`], and persisting the checkpoint
//! token are all left to the caller.
//!
//! ```no_run
//! use stream_coordinator::{Coordinator, Position, Session};
//! # async fn run<C: stream_coordinator::StreamClient>(client: C) -> stream_coordinator::Result<()> {
//! let mut coordinator = Coordinator::new(Session::new(client), "arn:aws:dynamodb:...:stream/1");
//! coordinator.move_to(Position::TrimHorizon).await?;
//!
//! while let Some(record) = coordinator.next().await? {
//!     // handle `record`
//! }
//! # Ok(())
//! # }
//! ```

mod buffer;
mod coordinator;
mod error;
mod position;
mod session;
mod shard;
mod token;

pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use position::Position;
pub use session::{
    DescribeStreamResponse, ErrorClass, GetRecordsResponse, IteratorType, Record, RecordMeta,
    RetryPolicy, SequenceNumberRange, Session, ShardDescriptor, StreamClient,
};
pub use token::{ShardSnapshot, Token};
