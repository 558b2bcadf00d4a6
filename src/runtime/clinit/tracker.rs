//! Translator and waiter bookkeeping shared with the compilation pipeline.

use std::{collections::HashMap, fmt};

use parking_lot::{Mutex, MutexGuard};

use crate::runtime::{InitError, InitResult, MethodId, ThreadId};

pub(in crate::runtime) type WaitMap = HashMap<ThreadId, Vec<MethodId>>;
pub(in crate::runtime) type TranslatorMap = HashMap<MethodId, ThreadId>;

/// Records which thread translates (or runs) which method, and which methods each
/// thread is blocked on.
///
/// When both maps are needed at once they are locked waits first, then translators.
#[derive(Default)]
pub struct TranslationDependencyTracker {
    waits: Mutex<WaitMap>,
    translators: Mutex<TranslatorMap>,
}

impl TranslationDependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_waiting(&self, thread: ThreadId, method: MethodId) {
        self.waits.lock().entry(thread).or_default().push(method);
    }

    /// Pops the innermost wait of `thread`.
    pub fn unregister_waiting(&self, thread: ThreadId) -> InitResult<MethodId> {
        let mut waits = self.waits.lock();
        let Some(stack) = waits.get_mut(&thread) else {
            return Err(InitError::invariant(format!(
                "{thread} stopped waiting without waiting for anything"
            )));
        };
        // an entry is dropped as soon as its stack empties, so depth is at least 1 here
        let Some(method) = stack.pop() else {
            return Err(InitError::invariant(format!(
                "{thread} has an empty wait stack"
            )));
        };
        if stack.is_empty() {
            waits.remove(&thread);
        }
        Ok(method)
    }

    /// Returns true if `thread` is now the translator of `method`.
    pub fn claim_translator(&self, method: MethodId, thread: ThreadId) -> bool {
        let mut translators = self.translators.lock();
        if translators.contains_key(&method) {
            return false;
        }
        translators.insert(method, thread);
        true
    }

    pub fn release_translator(&self, method: MethodId, thread: ThreadId) -> InitResult<()> {
        let mut translators = self.translators.lock();
        match translators.get(&method) {
            Some(translator) if *translator == thread => {
                translators.remove(&method);
                Ok(())
            }
            Some(translator) => Err(InitError::invariant(format!(
                "{thread} released {method:?} claimed by {translator}"
            ))),
            None => Err(InitError::invariant(format!(
                "{thread} released {method:?} which has no translator"
            ))),
        }
    }

    pub fn translator_of(&self, method: MethodId) -> Option<ThreadId> {
        self.translators.lock().get(&method).copied()
    }

    pub fn wait_top_of(&self, thread: ThreadId) -> Option<MethodId> {
        self.waits
            .lock()
            .get(&thread)
            .and_then(|stack| stack.last().copied())
    }

    pub fn is_thread_translating(&self, thread: ThreadId, method: MethodId) -> bool {
        self.translator_of(method) == Some(thread)
    }

    pub fn translator_count(&self) -> usize {
        self.translators.lock().len()
    }

    pub fn waiting_thread_count(&self) -> usize {
        self.waits.lock().len()
    }

    pub fn clear(&self) {
        self.waits.lock().clear();
        self.translators.lock().clear();
    }

    pub(in crate::runtime) fn lock_waits(&self) -> MutexGuard<'_, WaitMap> {
        self.waits.lock()
    }

    pub(in crate::runtime) fn lock_translators(&self) -> MutexGuard<'_, TranslatorMap> {
        self.translators.lock()
    }
}

/// A registered wait. Dropping the ticket pops it again; use `release` to observe
/// bookkeeping errors instead of only logging them.
#[must_use]
pub struct WaitTicket<'a> {
    tracker: &'a TranslationDependencyTracker,
    thread: ThreadId,
    method: MethodId,
    armed: bool,
}

impl<'a> WaitTicket<'a> {
    // the caller has already pushed `method` on `thread`'s stack
    pub(in crate::runtime) fn registered(
        tracker: &'a TranslationDependencyTracker,
        thread: ThreadId,
        method: MethodId,
    ) -> Self {
        Self {
            tracker,
            thread,
            method,
            armed: true,
        }
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn release(mut self) -> InitResult<()> {
        self.armed = false;
        let popped = self.tracker.unregister_waiting(self.thread)?;
        if popped != self.method {
            return Err(InitError::invariant(format!(
                "{} stopped waiting for {popped:?} while waiting for {:?}",
                self.thread, self.method
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for WaitTicket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitTicket")
            .field("thread", &self.thread)
            .field("method", &self.method)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.tracker.unregister_waiting(self.thread) {
            tracing::error!(%err, thread = %self.thread, "cannot release wait ticket");
        }
    }
}
