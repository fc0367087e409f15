//! Per-scope instance storage and instantiation policy.
//!
//! Transient beans never reach this module's storage. Lazy singletons own one
//! slot each, moving `Pending -> Constructing -> Ready`. The thread that moves
//! a slot to `Constructing` holds exclusive construction rights; other threads
//! block on a condition variable until the slot is `Ready` (or falls back to
//! `Pending` after a failed construction, in which case one of them retries).

use super::Instance;
use crate::error::{BeanstalkError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};

/// Completion state of a lazy singleton.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
)]
pub enum InstanceState {
    Pending,
    Constructing,
    Ready,
}

/// A constructed lazy singleton bound to its descriptor.
#[derive(Clone)]
pub struct ScopeInstance {
    descriptor: usize,
    instance: Instance,
    sequence: u64,
    constructed_at: DateTime<Utc>,
}

impl ScopeInstance {
    pub(crate) fn descriptor(&self) -> usize {
        self.descriptor
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Construction order across the whole container, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn constructed_at(&self) -> DateTime<Utc> {
        self.constructed_at
    }
}

impl fmt::Debug for ScopeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeInstance")
            .field("descriptor", &self.descriptor)
            .field("sequence", &self.sequence)
            .field("constructed_at", &self.constructed_at)
            .finish()
    }
}

enum Slot {
    Constructing { owner: ThreadId },
    Ready(ScopeInstance),
}

/// Outcome of [`ScopeManager::get_or_create`].
pub(crate) enum Obtained {
    Ready(Instance),
    /// The singleton is under construction by this thread's own resolution
    /// chain (or by a thread waiting on this one); the caller must break the
    /// cycle, typically with a lazy proxy.
    InProgress,
}

#[derive(Default)]
struct ScopeState {
    slots: HashMap<usize, Slot>,
    waiting: HashMap<ThreadId, usize>,
    last_sequence: u64,
    closed: bool,
}

impl ScopeState {
    /// Walks the wait-for chain starting at `owner`. Returns true when it leads
    /// back to `me`, i.e. blocking would deadlock.
    fn closes_wait_cycle(&self, mut owner: ThreadId, me: ThreadId) -> bool {
        for _ in 0..=self.waiting.len() {
            let Some(&awaited) = self.waiting.get(&owner) else {
                return false;
            };
            match self.slots.get(&awaited) {
                Some(Slot::Constructing { owner: next }) if *next == me => return true,
                Some(Slot::Constructing { owner: next }) => owner = *next,
                _ => return false,
            }
        }
        false
    }
}

pub(crate) struct ScopeManager {
    state: Mutex<ScopeState>,
    ready: Condvar,
}

impl ScopeManager {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ScopeState::default()),
            ready: Condvar::new(),
        }
    }

    /// Returns the singleton for descriptor `index`, running `construct` if
    /// this thread wins the right to build it.
    ///
    /// A failed or panicking `construct` reverts the slot to `Pending` so the
    /// next lookup retries.
    pub(crate) fn get_or_create<F>(&self, index: usize, construct: F) -> Result<Obtained>
    where
        F: FnOnce() -> Result<Instance>,
    {
        let me = thread::current().id();
        {
            let mut state = self.state.lock();
            loop {
                if state.closed {
                    return Err(BeanstalkError::NotRunning);
                }
                let owner = match state.slots.get(&index) {
                    Some(Slot::Ready(ready)) => return Ok(Obtained::Ready(ready.instance.clone())),
                    Some(Slot::Constructing { owner }) => *owner,
                    None => break,
                };
                if owner == me {
                    return Ok(Obtained::InProgress);
                }
                if state.closes_wait_cycle(owner, me) {
                    tracing::debug!(
                        "Bean #{} is being built by a thread waiting on this one; treating as a cycle",
                        index
                    );
                    return Ok(Obtained::InProgress);
                }
                state.waiting.insert(me, index);
                self.ready.wait(&mut state);
                state.waiting.remove(&me);
            }
            state.slots.insert(index, Slot::Constructing { owner: me });
        }

        let guard = ConstructionGuard {
            scopes: self,
            index,
            armed: true,
        };
        let instance = construct()?;
        guard.complete(instance.clone());
        Ok(Obtained::Ready(instance))
    }

    /// State and, once `Ready`, the constructed instance, read under one lock.
    pub(crate) fn snapshot(&self, index: usize) -> (InstanceState, Option<ScopeInstance>) {
        match self.state.lock().slots.get(&index) {
            Some(Slot::Ready(ready)) => (InstanceState::Ready, Some(ready.clone())),
            Some(Slot::Constructing { .. }) => (InstanceState::Constructing, None),
            None => (InstanceState::Pending, None),
        }
    }

    /// Closes the store and hands back every `Ready` instance in descending
    /// construction order. Subsequent `get_or_create` calls fail.
    pub(crate) fn drain(&self) -> Vec<ScopeInstance> {
        let mut instances: Vec<ScopeInstance> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.waiting.clear();
            state
                .slots
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Ready(ready) => Some(ready),
                    Slot::Constructing { .. } => None,
                })
                .collect()
        };
        self.ready.notify_all();
        instances.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        instances
    }
}

struct ConstructionGuard<'a> {
    scopes: &'a ScopeManager,
    index: usize,
    armed: bool,
}

impl ConstructionGuard<'_> {
    fn complete(mut self, instance: Instance) {
        self.armed = false;
        {
            let mut state = self.scopes.state.lock();
            state.last_sequence += 1;
            let ready = ScopeInstance {
                descriptor: self.index,
                instance,
                sequence: state.last_sequence,
                constructed_at: Utc::now(),
            };
            state.slots.insert(self.index, Slot::Ready(ready));
        }
        self.scopes.ready.notify_all();
    }
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.scopes.state.lock();
            if matches!(state.slots.get(&self.index), Some(Slot::Constructing { .. })) {
                state.slots.remove(&self.index);
            }
        }
        self.scopes.ready.notify_all();
    }
}
