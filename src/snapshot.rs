// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Sparse snapshot index. Snapshots are appended in file order while
//! indexing, at roughly fixed byte intervals, and binary searched by time
//! when a query arrives.

use crate::state::StateImage;

/// Full signal state at a `(time, file_offset)` boundary. Replaying the
/// trace from `file_offset` on top of `state` applies exactly the value
/// changes with timestamp `>= time`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub time: u64,
    pub file_offset: u64,
    pub(crate) state: StateImage,
}

/// Tells a driver where to seek before feeding query chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryPlan {
    pub file_offset: u64,
    pub snapshot_time: u64,
    pub snapshot_index: usize,
}

#[derive(Debug, Default)]
pub struct SnapshotIndex {
    snapshots: Vec<Snapshot>,
}

impl SnapshotIndex {
    /// Appends a snapshot. Appends are strictly monotonic in `file_offset`
    /// and non-decreasing in `time`; anything else is dropped so that the
    /// lookup invariant holds even for traces with decreasing timestamps.
    pub fn push(&mut self, time: u64, file_offset: u64, state: StateImage) {
        if let Some(last) = self.snapshots.last() {
            if time < last.time || file_offset <= last.file_offset {
                return;
            }
        }
        self.snapshots.push(Snapshot {
            time,
            file_offset,
            state,
        });
    }

    /// Index of the latest snapshot with `time <= start_time`, clamped to 0.
    pub fn lookup(&self, start_time: u64) -> usize {
        let after = self.snapshots.partition_point(|s| s.time <= start_time);
        after.saturating_sub(1)
    }

    pub fn plan(&self, start_time: u64) -> QueryPlan {
        if self.snapshots.is_empty() {
            return QueryPlan {
                file_offset: 0,
                snapshot_time: 0,
                snapshot_index: 0,
            };
        }
        let idx = self.lookup(start_time);
        let snap = &self.snapshots[idx];
        QueryPlan {
            file_offset: snap.file_offset,
            snapshot_time: snap.time,
            snapshot_index: idx,
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> &Snapshot {
        &self.snapshots[index]
    }

    #[inline]
    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.snapshots.capacity() * std::mem::size_of::<Snapshot>()
            + self
                .snapshots
                .iter()
                .map(|s| s.state.size_in_memory())
                .sum::<usize>()
    }
}
