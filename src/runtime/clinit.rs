use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::runtime::{InitError, InitResult, MethodId, MethodRef, ThreadId};

pub use deadlock::*;
pub use tracker::*;

mod deadlock;
mod tracker;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CctorState {
    Pending,
    Running,
    Done,
}

/// Execution record of one static constructor. The owner is the thread that
/// created the record and is the only one allowed to start the body.
pub struct CctorRecord {
    method: MethodRef,
    owner: ThreadId,
    state: Mutex<CctorState>,
    done: Condvar,
}

impl fmt::Debug for CctorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CctorRecord")
            .field("method", &self.method.name())
            .field("owner", &self.owner)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl CctorRecord {
    fn new(method: MethodRef, owner: ThreadId) -> Self {
        Self {
            method,
            owner,
            state: Mutex::new(CctorState::Pending),
            done: Condvar::new(),
        }
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn state(&self) -> CctorState {
        *self.state.lock()
    }

    pub fn is_done(&self) -> bool {
        *self.state.lock() == CctorState::Done
    }

    /// Moves the record from `Pending` to `Running` on behalf of its owner.
    ///
    /// Returns `None` when the body is already running or done. The returned ticket
    /// finishes the record when it is completed or dropped.
    pub fn begin_run(self: &Arc<Self>, thread: ThreadId) -> InitResult<Option<RunTicket>> {
        if thread != self.owner {
            return Err(InitError::invariant(format!(
                "{thread} tried to run `{}` owned by {}",
                self.method.name(),
                self.owner
            )));
        }

        let mut state = self.state.lock();
        if *state != CctorState::Pending {
            return Ok(None);
        }
        *state = CctorState::Running;

        Ok(Some(RunTicket {
            record: Arc::clone(self),
        }))
    }

    /// Runs `body` if the record is still pending; otherwise does nothing.
    /// The record is done afterwards even if `body` fails.
    pub fn run_if_owner(
        self: &Arc<Self>,
        thread: ThreadId,
        body: impl FnOnce() -> InitResult<()>,
    ) -> InitResult<()> {
        match self.begin_run(thread)? {
            Some(ticket) => ticket.complete_with(body),
            None => Ok(()),
        }
    }

    pub fn wait_until_done(&self) {
        let mut state = self.state.lock();
        while *state != CctorState::Done {
            self.done.wait(&mut state);
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, CctorState::Running);
        *state = CctorState::Done;
        self.done.notify_all();
    }
}

/// The right to finish a running cctor. Finishing happens exactly once, on
/// `complete`/`complete_with` or on drop.
#[must_use]
pub struct RunTicket {
    record: Arc<CctorRecord>,
}

impl RunTicket {
    pub fn record(&self) -> &Arc<CctorRecord> {
        &self.record
    }

    pub fn complete(self) {
        drop(self)
    }

    pub fn complete_with<T>(self, body: impl FnOnce() -> T) -> T {
        let result = body();
        self.complete();
        result
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.record.finish();
    }
}

impl fmt::Debug for RunTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RunTicket").field(&self.record).finish()
    }
}

#[derive(Default)]
pub struct CctorExecutionRegistry {
    records: Mutex<HashMap<MethodId, Arc<CctorRecord>>>,
}

impl CctorExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record of `method`, creating it with `thread` as owner if there is
    /// none. The flag tells whether the caller just became the owner.
    pub fn claim_or_observe(&self, method: &MethodRef, thread: ThreadId) -> (Arc<CctorRecord>, bool) {
        let mut records = self.records.lock();
        if let Some(record) = records.get(&method.id()) {
            return (Arc::clone(record), false);
        }

        let record = Arc::new(CctorRecord::new(Arc::clone(method), thread));
        records.insert(method.id(), Arc::clone(&record));
        tracing::trace!(method = %method.name(), owner = %thread, "claimed cctor");
        (record, true)
    }

    pub fn get(&self, method: MethodId) -> Option<Arc<CctorRecord>> {
        self.records.lock().get(&method).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub(in crate::runtime) fn lock_records(&self) -> MutexGuard<'_, HashMap<MethodId, Arc<CctorRecord>>> {
        self.records.lock()
    }
}
