//! Owns the shard forest, the active set, and the merge buffer; drives shard
//! promotion and seeking.
//!
//! The forest is stored as a flat arena (`Vec<Shard>`) addressed by [`ShardId`]
//! rather than parent/child object references — this sidesteps the cyclic-looking
//! parent/child relationship entirely and keeps every mutation going through one
//! owner, matching a single-threaded cooperative model.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::buffer::RecordBuffer;
use crate::error::{Error, Result};
use crate::position::Position;
use crate::session::{IteratorType, Record, Session, ShardDescriptor, StreamClient};
use crate::shard::{Shard, ShardId};
use crate::token::{ShardSnapshot, Token};

pub struct Coordinator<C: StreamClient> {
    stream_arn: String,
    session: Session<C>,
    arena: Vec<Shard>,
    roots: Vec<ShardId>,
    active: Vec<ShardId>,
    buffer: RecordBuffer,
}

impl<C: StreamClient> std::fmt::Debug for Coordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Coordinator[{}]", self.stream_arn)
    }
}

impl<C: StreamClient> Coordinator<C> {
    pub fn new(session: Session<C>, stream_arn: impl Into<String>) -> Self {
        Coordinator {
            stream_arn: stream_arn.into(),
            session,
            arena: Vec::new(),
            roots: Vec::new(),
            active: Vec::new(),
            buffer: RecordBuffer::new(),
        }
    }

    pub fn stream_arn(&self) -> &str {
        &self.stream_arn
    }

    /// Pops the next available record, pulling from the active shards if the
    /// buffer is empty. Returns `Ok(None)` when no record is available right now —
    /// that is not terminal, the caller should simply call again later.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if self.buffer.is_empty() {
            self.advance_shards().await?;
        }

        let Some((record, origin)) = self.buffer.pop() else {
            return Ok(None);
        };

        self.arena[origin.0].checkpoint(record.meta.sequence_number.clone());
        Ok(Some(record))
    }

    /// Refills the buffer from every active shard, in insertion order, then
    /// promotes any shard that became exhausted. A no-op when the buffer is
    /// already non-empty.
    pub async fn advance_shards(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            return Ok(());
        }

        for idx in self.active.clone() {
            let records = self.arena[idx.0].next(&self.session, &self.stream_arn).await?;
            for record in records {
                self.buffer.push(record, idx);
            }
        }

        self.handle_exhausted().await
    }

    /// Keeps active shards with an open-ended iterator (`trim_horizon`/`latest`)
    /// alive, converting them to `after_sequence` before the provider's idle window
    /// expires them.
    pub async fn heartbeat(&mut self) -> Result<()> {
        for idx in self.active.clone() {
            if self.arena[idx.0].sequence_number.is_none() {
                let records = self.arena[idx.0].next(&self.session, &self.stream_arn).await?;
                for record in records {
                    self.buffer.push(record, idx);
                }
            }
        }

        self.handle_exhausted().await
    }

    async fn handle_exhausted(&mut self) -> Result<()> {
        let exhausted: Vec<ShardId> = self
            .active
            .iter()
            .copied()
            .filter(|&idx| self.arena[idx.0].exhausted())
            .collect();

        for idx in exhausted {
            self.load_children(idx).await?;
            let children = self.arena[idx.0].children.clone();
            self.remove_shard(idx);
            for child in children {
                self.arena[child.0]
                    .jump_to(&self.session, &self.stream_arn, IteratorType::TrimHorizon, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Removes `shard` from `roots`/`active` (wherever it currently is) and
    /// promotes its children into the same role. Purges any buffered entry whose
    /// origin was `shard`.
    fn remove_shard(&mut self, idx: ShardId) {
        let children = self.arena[idx.0].children.clone();

        if let Some(pos) = self.roots.iter().position(|&r| r == idx) {
            self.roots.remove(pos);
            self.roots.extend(children.iter().copied());
        }
        if let Some(pos) = self.active.iter().position(|&a| a == idx) {
            self.active.remove(pos);
            self.active.extend(children.iter().copied());
        }

        self.buffer.remove_shard(idx);
    }

    /// No-op if `shard`'s children are already known. Otherwise fetches descriptors
    /// scoped to `shard_id` and attaches any whose `ParentShardId` matches. The
    /// service may report zero children: `shard` is a leaf of the current topology.
    async fn load_children(&mut self, idx: ShardId) -> Result<()> {
        if self.arena[idx.0].children_loaded {
            return Ok(());
        }

        let shard_id = self.arena[idx.0].shard_id.clone();
        let resp = self
            .session
            .describe_stream(&self.stream_arn, Some(&shard_id))
            .await?;

        for descriptor in resp.shards {
            if descriptor.parent_shard_id.as_deref() == Some(shard_id.as_str()) {
                let child = self.push_shard(descriptor.shard_id, Some(idx));
                self.arena[idx.0].children.push(child);
            }
        }
        self.arena[idx.0].children_loaded = true;
        Ok(())
    }

    /// Preorder walk of `root` and all its descendants.
    fn walk_tree(&self, root: ShardId) -> Vec<ShardId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            out.push(idx);
            for &child in self.arena[idx.0].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    fn push_shard(&mut self, shard_id: String, parent: Option<ShardId>) -> ShardId {
        let idx = ShardId(self.arena.len());
        self.arena.push(Shard::new(shard_id, parent));
        idx
    }

    /// Builds the opaque checkpoint: stream arn, active shard ids, and every shard
    /// reachable from `roots`.
    pub fn token(&self) -> Token {
        let mut shards = Vec::new();
        for &root in &self.roots {
            for idx in self.walk_tree(root) {
                let shard = &self.arena[idx.0];
                let parent_id = shard.parent.map(|p| self.arena[p.0].shard_id.clone());
                shards.push(ShardSnapshot {
                    shard_id: shard.shard_id.clone(),
                    parent_id,
                    iterator_type: shard.iterator_type,
                    sequence_number: shard.sequence_number.clone(),
                });
            }
        }

        Token {
            stream_arn: self.stream_arn.clone(),
            active: self
                .active
                .iter()
                .map(|&idx| self.arena[idx.0].shard_id.clone())
                .collect(),
            shards,
        }
    }

    /// Dispatches on the resolved shape of `position`.
    pub async fn move_to(&mut self, position: Position) -> Result<()> {
        match position {
            Position::TrimHorizon => self.move_to_endpoint(IteratorType::TrimHorizon).await,
            Position::Latest => self.move_to_endpoint(IteratorType::Latest).await,
            Position::AtTime(time) => self.move_to_time(time).await,
            Position::FromToken(token) => self.move_to_token(token).await,
        }
    }

    async fn move_to_endpoint(&mut self, kind: IteratorType) -> Result<()> {
        self.roots.clear();
        self.active.clear();
        self.buffer.clear();
        self.arena.clear();

        let resp = self.session.describe_stream(&self.stream_arn, None).await?;
        self.roots = self.build_forest(resp.shards);

        match kind {
            IteratorType::TrimHorizon => {
                for idx in self.roots.clone() {
                    self.arena[idx.0]
                        .jump_to(&self.session, &self.stream_arn, IteratorType::TrimHorizon, None)
                        .await?;
                }
                self.active = self.roots.clone();
            }
            IteratorType::Latest => {
                let mut active = Vec::new();
                for root in self.roots.clone() {
                    for idx in self.walk_tree(root) {
                        if self.arena[idx.0].children.is_empty() {
                            self.arena[idx.0]
                                .jump_to(&self.session, &self.stream_arn, IteratorType::Latest, None)
                                .await?;
                            active.push(idx);
                        }
                    }
                }
                self.active = active;
            }
            _ => unreachable!("move_to_endpoint is only called with TrimHorizon/Latest"),
        }
        Ok(())
    }

    /// Naive linear scan: seed at `trim_horizon`, then breadth-first search the
    /// forest for the first record at or after `time` on each branch.
    async fn move_to_time(&mut self, time: time::OffsetDateTime) -> Result<()> {
        if time > time::OffsetDateTime::now_utc() {
            return self.move_to_endpoint(IteratorType::Latest).await;
        }

        self.move_to_endpoint(IteratorType::TrimHorizon).await?;

        let mut queue: VecDeque<ShardId> = self.roots.clone().into();
        while let Some(idx) = queue.pop_front() {
            let records = self.arena[idx.0].seek_to(&self.session, &self.stream_arn, time).await?;
            if !records.is_empty() {
                for record in records {
                    self.buffer.push(record, idx);
                }
            } else if self.arena[idx.0].exhausted() {
                let children = self.arena[idx.0].children.clone();
                self.remove_shard(idx);
                queue.extend(children);
            }
        }
        Ok(())
    }

    /// Restores the forest from a token, then intersects it with the live stream
    /// topology.
    async fn move_to_token(&mut self, token: Token) -> Result<()> {
        self.stream_arn = token.stream_arn.clone();
        self.roots.clear();
        self.active.clear();
        self.buffer.clear();
        self.arena.clear();

        let mut by_id: HashMap<String, ShardId> = HashMap::new();
        for snapshot in &token.shards {
            let idx = self.push_shard(snapshot.shard_id.clone(), None);
            self.arena[idx.0].iterator_type = snapshot.iterator_type;
            self.arena[idx.0].sequence_number = snapshot.sequence_number.clone();
            by_id.insert(snapshot.shard_id.clone(), idx);
        }
        for snapshot in &token.shards {
            if let Some(parent_id) = &snapshot.parent_id {
                if let Some(&parent_idx) = by_id.get(parent_id) {
                    let idx = by_id[&snapshot.shard_id];
                    self.arena[idx.0].parent = Some(parent_idx);
                    self.arena[parent_idx.0].children.push(idx);
                }
            }
        }
        self.roots = by_id
            .values()
            .copied()
            .filter(|&idx| self.arena[idx.0].parent.is_none())
            .collect();
        self.active = token
            .active
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect();

        let live = self.session.describe_stream(&self.stream_arn, None).await?;
        let live_ids: HashSet<String> = live.shards.into_iter().map(|d| d.shard_id).collect();

        let mut unverified: VecDeque<ShardId> = self.roots.clone().into();
        while let Some(idx) = unverified.pop_front() {
            if !live_ids.contains(&self.arena[idx.0].shard_id) {
                tracing::warn!(shard = %self.arena[idx.0].shard_id, "token shard not found on live stream, pruning");
                let children = self.arena[idx.0].children.clone();
                self.remove_shard(idx);
                unverified.extend(children);
            }
        }

        if self.roots.is_empty() {
            return Err(Error::InvalidStream);
        }

        for idx in self.active.clone() {
            let iterator_type = self.arena[idx.0].iterator_type.unwrap_or(IteratorType::TrimHorizon);
            let sequence_number = self.arena[idx.0].sequence_number.clone();

            match self
                .arena[idx.0]
                .jump_to(&self.session, &self.stream_arn, iterator_type, sequence_number)
                .await
            {
                Ok(()) => {}
                Err(Error::RecordsExpired) => {
                    self.arena[idx.0]
                        .jump_to(&self.session, &self.stream_arn, IteratorType::TrimHorizon, None)
                        .await?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Builds a fresh forest from a `DescribeStream` listing, returning its roots.
    fn build_forest(&mut self, descriptors: Vec<ShardDescriptor>) -> Vec<ShardId> {
        let mut by_id: HashMap<String, ShardId> = HashMap::new();
        for descriptor in &descriptors {
            let idx = self.push_shard(descriptor.shard_id.clone(), None);
            by_id.insert(descriptor.shard_id.clone(), idx);
        }
        for descriptor in &descriptors {
            if let Some(parent_id) = &descriptor.parent_shard_id {
                if let Some(&parent_idx) = by_id.get(parent_id) {
                    let idx = by_id[&descriptor.shard_id];
                    self.arena[idx.0].parent = Some(parent_idx);
                    self.arena[parent_idx.0].children.push(idx);
                }
            }
        }
        // A full-topology DescribeStream tells us everything: every shard's
        // children (possibly zero) are now known.
        for idx in by_id.values() {
            self.arena[idx.0].children_loaded = true;
        }

        by_id
            .values()
            .copied()
            .filter(|&idx| self.arena[idx.0].parent.is_none())
            .collect()
    }
}
