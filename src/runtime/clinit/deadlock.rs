use std::collections::{HashMap, HashSet};

use crate::runtime::{
    CctorExecutionRegistry, InitResult, MethodId, ThreadId, TranslationDependencyTracker,
    WaitTicket,
};

/// Point-in-time copy of the wait-for graph around one waited method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitGraph {
    holder: Option<ThreadId>,
    wait_tops: HashMap<ThreadId, MethodId>,
    translators: HashMap<MethodId, ThreadId>,
}

impl WaitGraph {
    /// Whether the chain of holders starting at the waited method leads back to
    /// `waiting`.
    pub fn closes_cycle(&self, waiting: ThreadId) -> bool {
        let Some(mut current) = self.holder else {
            return false;
        };
        let mut visited = HashSet::new();
        loop {
            if current == waiting {
                return true;
            }
            // a loop that does not pass through `waiting` is someone else's cycle
            if !visited.insert(current) {
                return false;
            }
            let Some(method) = self.wait_tops.get(&current) else {
                return false;
            };
            let Some(translator) = self.translators.get(method) else {
                return false;
            };
            current = *translator;
        }
    }
}

#[derive(Debug)]
pub enum WaitDecision<'a> {
    /// No cycle: the caller is registered as waiting and may block.
    Wait(WaitTicket<'a>),
    /// Blocking would close a cycle; the caller must continue without waiting.
    Relaxed,
}

/// Decides whether a thread may block on a method without closing a cycle in the
/// wait-for graph. Locks are only held while copying the graph, never while walking it.
#[derive(Clone, Copy)]
pub struct DeadlockDetector<'a> {
    tracker: &'a TranslationDependencyTracker,
    registry: &'a CctorExecutionRegistry,
}

impl<'a> DeadlockDetector<'a> {
    pub fn new(tracker: &'a TranslationDependencyTracker, registry: &'a CctorExecutionRegistry) -> Self {
        Self { tracker, registry }
    }

    pub fn would_deadlock(&self, waiting: ThreadId, method: MethodId) -> bool {
        self.snapshot(method, None).closes_cycle(waiting)
    }

    /// Registers `waiting` as blocked on `method` unless that would deadlock.
    ///
    /// Registration happens in the same critical section as the snapshot, so of two
    /// threads racing into a cycle the later one always sees the earlier one's wait.
    pub fn declare_waiting(&self, waiting: ThreadId, method: MethodId) -> InitResult<WaitDecision<'a>> {
        let graph = self.snapshot(method, Some(waiting));
        let ticket = WaitTicket::registered(self.tracker, waiting, method);

        if graph.closes_cycle(waiting) {
            ticket.release()?;
            tracing::debug!(thread = %waiting, ?method, "waiting would deadlock");
            return Ok(WaitDecision::Relaxed);
        }
        Ok(WaitDecision::Wait(ticket))
    }

    fn snapshot(&self, method: MethodId, register: Option<ThreadId>) -> WaitGraph {
        // lock order: waits -> translators -> cctor records
        let mut waits = self.tracker.lock_waits();
        let translators = self.tracker.lock_translators();
        let records = self.registry.lock_records();

        let holder = match records.get(&method) {
            Some(record) => Some(record.owner()),
            None => translators.get(&method).copied(),
        };
        if let Some(thread) = register {
            waits.entry(thread).or_default().push(method);
        }

        WaitGraph {
            holder,
            wait_tops: waits
                .iter()
                .filter_map(|(thread, stack)| stack.last().map(|top| (*thread, *top)))
                .collect(),
            translators: translators.clone(),
        }
    }
}
