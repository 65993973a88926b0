// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Per-node protocol state, guarded by one mutex and condition variable as
//! required by the protocol's concurrency model: every field a node's own
//! `Receiver` dispatch and its own request loop touch lives here, behind a
//! single lock, so the two threads never race on `grants_sent`,
//! `grants_received`, `queue` or `in_CS`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Condvar, Mutex};

use crate::message::{NodeId, Priority};

/// Pending peer requests ordered by priority, with O(log n) removal by
/// `src` (a plain binary heap cannot do this; see DESIGN.md).
#[derive(Debug, Default)]
pub struct RequestQueue {
    by_priority: BTreeSet<Priority>,
    ts_by_src: HashMap<NodeId, u64>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_priority.is_empty()
    }

    /// Inserts `(ts, src)`. A peer may only have one outstanding entry.
    pub fn push(&mut self, priority: Priority) {
        let (ts, src) = priority;
        if let Some(&old_ts) = self.ts_by_src.get(&src) {
            self.by_priority.remove(&(old_ts, src));
        }
        self.by_priority.insert(priority);
        self.ts_by_src.insert(src, ts);
    }

    /// Removes and returns the highest-priority (lexicographically
    /// smallest) entry.
    pub fn pop_highest_priority(&mut self) -> Option<Priority> {
        let priority = *self.by_priority.iter().next()?;
        self.by_priority.remove(&priority);
        self.ts_by_src.remove(&priority.1);
        Some(priority)
    }

    /// Purges any queued entry belonging to `src`, regardless of its `ts`.
    pub fn remove_src(&mut self, src: NodeId) {
        if let Some(ts) = self.ts_by_src.remove(&src) {
            self.by_priority.remove(&(ts, src));
        }
    }
}

/// Every field in §3's invariants, owned exclusively by one node.
pub struct NodeStateInner {
    pub lamport_ts: u64,
    pub queue: RequestQueue,
    pub grants_sent: Option<Priority>,
    pub grants_received: HashSet<NodeId>,
    pub yielded: bool,
    pub failed: bool,
    pub in_cs: bool,
    pub iterations_done: u32,
}

impl NodeStateInner {
    fn new() -> Self {
        NodeStateInner {
            lamport_ts: 0,
            queue: RequestQueue::new(),
            grants_sent: None,
            grants_received: HashSet::new(),
            yielded: false,
            failed: false,
            in_cs: false,
            iterations_done: 0,
        }
    }

    /// `lamport_ts <- lamport_ts + 1`, returning the new value to stamp an
    /// outgoing message with.
    pub fn tick(&mut self) -> u64 {
        self.lamport_ts += 1;
        self.lamport_ts
    }

    /// `lamport_ts <- max(lamport_ts, ts) + 1`, the receive-side clock rule.
    pub fn merge(&mut self, ts: u64) {
        self.lamport_ts = self.lamport_ts.max(ts) + 1;
    }
}

/// A node's identity, quorum and mutex-guarded mutable state.
pub struct NodeState {
    pub id: NodeId,
    pub colleagues: Vec<NodeId>,
    inner: Mutex<NodeStateInner>,
    condvar: Condvar,
}

impl NodeState {
    pub fn new(id: NodeId, colleagues: Vec<NodeId>) -> Self {
        NodeState {
            id,
            colleagues,
            inner: Mutex::new(NodeStateInner::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn quorum_size(&self) -> usize {
        self.colleagues.len() + 1
    }

    /// Runs `f` with the state locked, notifying the condvar afterwards if
    /// `f` returns `true`.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut NodeStateInner) -> (R, bool)) -> R {
        let mut guard = self.inner.lock().expect("node mutex poisoned");
        let (result, should_notify) = f(&mut guard);
        if should_notify {
            self.condvar.notify_one();
        }
        result
    }

    /// Blocks the calling thread until `grants_received` covers the whole
    /// quorum (self included), then marks `in_CS` and returns.
    pub fn wait_for_quorum(&self) {
        let quorum_size = self.quorum_size();
        let mut guard = self.inner.lock().expect("node mutex poisoned");
        while guard.grants_received.len() < quorum_size {
            guard = self.condvar.wait(guard).expect("node mutex poisoned");
        }
        guard.in_cs = true;
    }
}

/// Process-wide one-shot termination barrier. Per REDESIGN FLAGS §9, this
/// is an explicit collaborator rather than global mutable state, scoped to
/// a single run and shared via `Arc`.
pub struct Barrier {
    total: u32,
    state: Mutex<u32>,
    condvar: Condvar,
}

impl Barrier {
    pub fn new(total: u32) -> Self {
        Barrier {
            total,
            state: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Registers arrival and blocks until every participant has arrived.
    pub fn wait(&self) {
        let mut count = self.state.lock().expect("barrier mutex poisoned");
        *count += 1;
        if *count == self.total {
            self.condvar.notify_all();
        } else {
            while *count < self.total {
                count = self.condvar.wait(count).expect("barrier mutex poisoned");
            }
        }
    }
}
