//! Call Registry Module
//!
//! ID counter plus the map of in-flight calls. The registry itself is not
//! synchronized; the client keeps it behind the connection lock together with
//! the subscription router and the write half of the transport.

use std::collections::{BTreeSet, HashMap};

use crate::call::{CallResult, CompletionWaiter, PendingCall};
use crate::protocol::Request;

/// Timed-out IDs remembered so their late responses can be dropped quietly
const MAX_DISCARDED: usize = 4096;

/// In-flight calls keyed by correlation ID
#[derive(Debug)]
pub struct CallRegistry {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
    discarded: BTreeSet<u64>,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            discarded: BTreeSet::new(),
        }
    }

    /// Assign the next ID to `request` and register a pending call for it
    pub fn register(&mut self, request: &mut Request) -> CompletionWaiter<CallResult> {
        let id = self.next_id;
        self.next_id += 1;
        request.id = id;

        let (call, waiter) = PendingCall::new(request.clone());
        self.pending.insert(id, call);
        waiter
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingCall> {
        self.pending.remove(&id)
    }

    /// Drop a timed-out call and remember its ID. Returns `false` when the
    /// call was already resolved by someone else.
    pub fn discard(&mut self, id: u64) -> bool {
        if self.pending.remove(&id).is_none() {
            return false;
        }
        if self.discarded.len() >= MAX_DISCARDED {
            self.discarded.pop_first();
        }
        self.discarded.insert(id);
        true
    }

    /// Consume a discarded ID; `true` if `id` belonged to a timed-out call
    pub fn take_discarded(&mut self, id: u64) -> bool {
        self.discarded.remove(&id)
    }

    /// Remove every pending call
    pub fn drain(&mut self) -> Vec<PendingCall> {
        self.pending.drain().map(|(_, call)| call).collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// ID the next registration will receive
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}
