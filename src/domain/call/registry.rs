//! Live call registry
//!
//! Owns every [`Call`] known to the phone, keyed by the stack-assigned
//! [`CallId`]. A single coarse lock serializes insertion, removal, mutation
//! and iteration, so every snapshot handed out is consistent and events for
//! one identifier are applied strictly one after another.
//!
//! Closures passed to the `*_with` methods run while the lock is held. They
//! must not block and must not call back into the registry.

use crate::domain::call::aggregate::{Call, CallSummary};
use crate::domain::call::value_object::CallState;
use crate::domain::shared::value_objects::CallId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Result of applying a stack state report to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No call with that identifier is registered
    UnknownCall,
    /// The call already was in the reported state
    Unchanged,
    /// The state changed; `reaped` is set when the call left the registry
    Changed { previous: CallState, reaped: bool },
}

struct Entry {
    seq: u64,
    call: Call,
}

#[derive(Default)]
struct Inner {
    calls: HashMap<CallId, Entry>,
    next_seq: u64,
}

impl Inner {
    fn ordered_ids(&self) -> Vec<CallId> {
        let mut ids: Vec<(u64, CallId)> = self
            .calls
            .iter()
            .map(|(id, entry)| (entry.seq, *id))
            .collect();
        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id).collect()
    }
}

/// Registry of live calls
#[derive(Default)]
pub struct CallRegistry {
    inner: Mutex<Inner>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new call; fails if its identifier is already registered
    pub fn add(&self, call: Call) -> bool {
        self.add_with(call, |_| {})
    }

    /// Insert a new call and run `on_added` before any other event for the
    /// same identifier can be applied
    pub fn add_with(&self, call: Call, on_added: impl FnOnce(&Call)) -> bool {
        let mut inner = self.inner.lock();
        let id = call.id();
        if inner.calls.contains_key(&id) {
            return false;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = inner.calls.entry(id).or_insert(Entry { seq, call });
        on_added(&entry.call);
        true
    }

    /// Snapshot of one call
    pub fn get(&self, id: CallId) -> Option<Call> {
        self.inner.lock().calls.get(&id).map(|e| e.call.clone())
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.inner.lock().calls.contains_key(&id)
    }

    /// Detach a call, handing ownership back to the caller
    pub fn remove(&self, id: CallId) -> Option<Call> {
        self.inner.lock().calls.remove(&id).map(|e| e.call)
    }

    /// Insertion-ordered summaries of every live call
    pub fn list(&self) -> Vec<CallSummary> {
        let inner = self.inner.lock();
        inner
            .ordered_ids()
            .into_iter()
            .filter_map(|id| inner.calls.get(&id))
            .map(|e| e.call.summary())
            .collect()
    }

    /// Remove every call without further processing
    pub fn clear(&self) -> Vec<Call> {
        self.drain_with(|_| {})
    }

    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-modify-write a single call under the registry lock
    pub fn update<R>(&self, id: CallId, f: impl FnOnce(&mut Call) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.calls.get_mut(&id).map(|e| f(&mut e.call))
    }

    /// Apply a state report, run `on_change` for a real change, then reap
    /// the call if the new state is terminal. All three steps happen in one
    /// critical section so no reader observes a terminal call still listed
    /// after its notification went out.
    pub fn transition(
        &self,
        id: CallId,
        state: CallState,
        last_status: Option<u16>,
        on_change: impl FnOnce(&Call, CallState),
    ) -> Transition {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.calls.get_mut(&id) else {
            return Transition::UnknownCall;
        };

        let Some(previous) = entry.call.apply_state(state, last_status) else {
            return Transition::Unchanged;
        };

        on_change(&entry.call, previous);

        let reaped = state.is_terminal();
        if reaped {
            inner.calls.remove(&id);
        }

        Transition::Changed { previous, reaped }
    }

    /// Run `f` on one call, then remove it
    pub fn reap_with(&self, id: CallId, f: impl FnOnce(&mut Call)) -> Option<Call> {
        let mut inner = self.inner.lock();
        let mut entry = inner.calls.remove(&id)?;
        f(&mut entry.call);
        Some(entry.call)
    }

    /// Run `f` on every call in insertion order, then empty the registry
    pub fn drain_with(&self, mut f: impl FnMut(&mut Call)) -> Vec<Call> {
        let mut inner = self.inner.lock();
        let ids = inner.ordered_ids();
        let mut drained = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut entry) = inner.calls.remove(&id) {
                f(&mut entry.call);
                drained.push(entry.call);
            }
        }
        drained
    }
}
