use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::runtime::{
    CctorExecutionRegistry, CctorRecord, DeadlockDetector, InitBehavior, InitConfig, InitError,
    InitResult, MethodId, MethodRef, MethodState, ObjectHandle, RunTicket, RuntimeEnv,
    StaticMemoryDescriptor, StaticObjectStore, StaticSymbolTable, SymbolId, SymbolKind, ThreadId,
    TranslationDependencyTracker, TypeRef, WaitDecision,
};

/// Sizes of the coordinator's tables, plus how often a wait was skipped to break a
/// cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InitStats {
    pub static_objects: usize,
    pub static_symbols: usize,
    pub cctor_records: usize,
    pub translators: usize,
    pub waiting_threads: usize,
    pub cached_constructors: usize,
    pub relaxed_waits: usize,
}

/// A cctor whose run was started but whose body waits in the batch queue. The
/// deferring thread keeps the translator entry, so waiters can still trace the
/// cctor back to it.
struct DeferredCctor {
    cctor: MethodRef,
    ticket: RunTicket,
    claimed_by: Option<ThreadId>,
}

/// Releases a translator claim when the cctor body is left, however it is left.
struct TranslatorClaim<'a> {
    tracker: &'a TranslationDependencyTracker,
    method: MethodId,
    thread: ThreadId,
}

impl Drop for TranslatorClaim<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.tracker.release_translator(self.method, self.thread) {
            tracing::error!(%err, "cannot release cctor translator");
        }
    }
}

/// Entry point of static initialization: hands out static objects and makes sure
/// every static constructor runs once before its type is used.
pub struct StaticInitCoordinator {
    env: RuntimeEnv,
    config: InitConfig,
    store: Arc<StaticObjectStore>,
    symbols: Arc<StaticSymbolTable>,
    registry: CctorExecutionRegistry,
    tracker: TranslationDependencyTracker,
    caching: AtomicBool,
    cached: Mutex<VecDeque<DeferredCctor>>,
    relaxed_waits: AtomicUsize,
}

impl StaticInitCoordinator {
    pub fn new(env: RuntimeEnv, config: InitConfig) -> Self {
        let store = Arc::new(StaticObjectStore::new(Arc::clone(&env.gc)));
        let symbols = Arc::new(StaticSymbolTable::new(Arc::clone(&store)));
        env.symbols
            .register_symbol_manager(SymbolKind::StaticObject, symbols.clone());
        let caching = config.behavior.contains(InitBehavior::CACHE_CONSTRUCTORS);

        tracing::debug!(?config, "static initialization coordinator ready");
        Self {
            env,
            config,
            store,
            symbols,
            registry: CctorExecutionRegistry::new(),
            tracker: TranslationDependencyTracker::new(),
            caching: AtomicBool::new(caching),
            cached: Mutex::new(VecDeque::new()),
            relaxed_waits: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &InitConfig {
        &self.config
    }

    pub fn registry(&self) -> &CctorExecutionRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &TranslationDependencyTracker {
        &self.tracker
    }

    pub fn static_objects(&self) -> &StaticObjectStore {
        &self.store
    }

    pub fn detector(&self) -> DeadlockDetector<'_> {
        DeadlockDetector::new(&self.tracker, &self.registry)
    }

    /// Returns the static object of `ty`. When `requester` is given and `ty` has a
    /// cctor, the cctor inherits the requester's execution probability and is
    /// recorded as a cctor the requester must call.
    #[tracing::instrument(level = "trace", skip_all, fields(ty = %ty.complete_name()))]
    pub fn fetch_static_object(
        &self,
        ty: &TypeRef,
        requester: Option<&MethodRef>,
    ) -> InitResult<ObjectHandle> {
        let object = self.store.get_or_create(ty)?;
        if let Some(requester) = requester {
            Self::note_cctor_to_call(ty, requester);
        }
        Ok(object)
    }

    /// Like `fetch_static_object`, but returns the symbol standing for the static
    /// object in generated code.
    #[tracing::instrument(level = "trace", skip_all, fields(ty = %ty.complete_name()))]
    pub fn fetch_static_object_symbol(
        &self,
        ty: &TypeRef,
        requester: Option<&MethodRef>,
    ) -> InitResult<SymbolId> {
        let symbol = self.symbols.fetch_symbol(ty, self.env.symbols.as_ref())?;
        if let Some(requester) = requester {
            Self::note_cctor_to_call(ty, requester);
        }
        Ok(symbol)
    }

    pub fn static_memory_descriptor(&self, symbol: SymbolId) -> Option<Arc<StaticMemoryDescriptor>> {
        self.symbols.descriptor(symbol)
    }

    fn note_cctor_to_call(ty: &TypeRef, requester: &MethodRef) {
        let Some(cctor) = ty.cctor() else {
            return;
        };
        if cctor.id() != requester.id() {
            let probability = requester.profile().lock().execution_probability;
            let mut profile = cctor.profile().lock();
            if profile.execution_probability < 0.0 || profile.execution_probability < probability {
                profile.execution_probability = probability;
            }
        }
        requester.add_cctor_to_call(cctor);
    }

    /// Compiles `cctor` synchronously, then runs or waits for it.
    pub fn call_cctor_method(&self, cctor: &MethodRef, thread: ThreadId) -> InitResult<()> {
        self.env
            .pipeline
            .synch_insert_method(cctor, self.config.cctor_priority)
            .map_err(|source| InitError::Compilation {
                method: cctor.name(),
                source,
            })?;
        self.call_static_constructor_if_needed(cctor, thread)
    }

    pub fn call_static_constructors(&self, cctors: &[MethodRef], thread: ThreadId) -> InitResult<()> {
        if !self.config.static_constructors_enabled() {
            return Ok(());
        }
        for cctor in cctors {
            self.call_static_constructor_if_needed(cctor, thread)?;
        }
        Ok(())
    }

    /// Makes sure the body of `cctor` has run, unless waiting for it would close an
    /// initialization cycle; in that case it returns while the body may still be
    /// running elsewhere.
    #[tracing::instrument(level = "debug", skip(self, cctor), fields(cctor = %cctor.name()))]
    pub fn call_static_constructor_if_needed(
        &self,
        cctor: &MethodRef,
        thread: ThreadId,
    ) -> InitResult<()> {
        let (record, _) = self.registry.claim_or_observe(cctor, thread);
        if record.is_done() {
            return Ok(());
        }

        if record.owner() == thread {
            if let Some(ticket) = record.begin_run(thread)? {
                return self.run_or_defer(cctor, thread, ticket);
            }
        }
        // not ours, or ours and already running further up this thread's stack
        self.wait_for(&record, thread)
    }

    fn run_or_defer(&self, cctor: &MethodRef, thread: ThreadId, ticket: RunTicket) -> InitResult<()> {
        if self.caching.load(Ordering::Acquire) {
            let claimed_by = self
                .tracker
                .claim_translator(cctor.id(), thread)
                .then_some(thread);
            let mut cached = self.cached.lock();
            debug_assert!(cached.iter().all(|deferred| deferred.cctor.id() != cctor.id()));
            tracing::trace!(cctor = %cctor.name(), "deferring static constructor");
            cached.push_back(DeferredCctor {
                cctor: Arc::clone(cctor),
                ticket,
                claimed_by,
            });
            return Ok(());
        }
        ticket.complete_with(|| self.run_cctor_body(cctor, thread))
    }

    fn run_cctor_body(&self, cctor: &MethodRef, thread: ThreadId) -> InitResult<()> {
        let _claim = self
            .tracker
            .claim_translator(cctor.id(), thread)
            .then(|| TranslatorClaim {
                tracker: &self.tracker,
                method: cctor.id(),
                thread,
            });

        let ty = cctor.owner_type();
        let object = self.store.get_or_create(&ty)?;
        if !self.config.execution_enabled() {
            tracing::debug!(cctor = %cctor.name(), "execution disabled, skipping body");
            return Ok(());
        }

        tracing::debug!(cctor = %cctor.name(), %thread, "running static constructor");
        self.env
            .engine
            .run(cctor, &[object])
            .map_err(|source| InitError::Execution {
                method: cctor.name(),
                source,
            })
    }

    fn wait_for(&self, record: &CctorRecord, thread: ThreadId) -> InitResult<()> {
        match self.detector().declare_waiting(thread, record.method().id())? {
            WaitDecision::Relaxed => {
                self.relaxed_waits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    cctor = %record.method().name(),
                    %thread,
                    owner = %record.owner(),
                    "initialization cycle, continuing without waiting"
                );
                Ok(())
            }
            WaitDecision::Wait(ticket) => {
                self.env.pipeline.declare_waiting_cctor();
                record.wait_until_done();
                self.env.pipeline.declare_waiting_cctor_done();
                ticket.release()
            }
        }
    }

    /// Claims every unclaimed cctor of `cctors` for `thread` and queues it for
    /// compilation. Cctors claimed by someone else are left to their owner.
    pub fn make_static_constructors_executable(
        &self,
        cctors: &[MethodRef],
        priority: f32,
        thread: ThreadId,
    ) -> InitResult<()> {
        if !self.config.static_constructors_enabled() {
            return Ok(());
        }
        for cctor in cctors {
            let (_, is_new_owner) = self.registry.claim_or_observe(cctor, thread);
            if !is_new_owner {
                continue;
            }
            self.env
                .pipeline
                .insert_method(cctor, priority)
                .map_err(|source| InitError::Compilation {
                    method: cctor.name(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn are_static_constructors_executable(&self, cctors: &[MethodRef]) -> bool {
        self.config.static_constructors_enabled()
            && cctors
                .iter()
                .all(|cctor| cctor.profile().lock().state == MethodState::Executable)
    }

    pub fn cache_constructors_to_call(&self) {
        self.caching.store(true, Ordering::Release);
    }

    pub fn stop_caching_constructors(&self) {
        self.caching.store(false, Ordering::Release);
    }

    pub fn is_caching_constructors(&self) -> bool {
        self.caching.load(Ordering::Acquire)
    }

    /// Drops every deferred cctor without running it. Their records still become
    /// done. Returns how many were dropped.
    pub fn flush_cached_constructors(&self) -> usize {
        let flushed: Vec<_> = self.cached.lock().drain(..).collect();
        let count = flushed.len();
        for DeferredCctor {
            cctor,
            ticket,
            claimed_by,
        } in flushed
        {
            let _claim = self.deferred_claim(&cctor, claimed_by);
            ticket.complete();
        }
        tracing::debug!(count, "flushed cached static constructors");
        count
    }

    /// Runs deferred cctors in the order they were deferred, including any deferred
    /// while this call is running, until the queue is empty. Returns how many ran,
    /// or the first body failure once everything has run.
    pub fn call_cached_constructors(&self, thread: ThreadId) -> InitResult<usize> {
        if !self.config.static_constructors_enabled() {
            self.flush_cached_constructors();
            return Ok(0);
        }
        let mut called = 0;
        let mut first_error = None;
        loop {
            let Some(DeferredCctor {
                cctor,
                ticket,
                claimed_by,
            }) = self.cached.lock().pop_front()
            else {
                break;
            };
            let _claim = self.deferred_claim(&cctor, claimed_by);
            let result = ticket.complete_with(|| self.run_cctor_body(&cctor, thread));
            called += 1;
            if let Err(err) = result {
                tracing::warn!(%err, cctor = %cctor.name(), "cached static constructor failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(called),
        }
    }

    fn deferred_claim(&self, cctor: &MethodRef, claimed_by: Option<ThreadId>) -> Option<TranslatorClaim<'_>> {
        claimed_by.map(|thread| TranslatorClaim {
            tracker: &self.tracker,
            method: cctor.id(),
            thread,
        })
    }

    pub fn register_translator(&self, method: MethodId, thread: ThreadId) -> bool {
        self.tracker.claim_translator(method, thread)
    }

    pub fn unregister_translator(&self, method: MethodId, thread: ThreadId) -> InitResult<()> {
        self.tracker.release_translator(method, thread)
    }

    pub fn is_thread_translating_method(&self, thread: ThreadId, method: MethodId) -> bool {
        self.tracker.is_thread_translating(thread, method)
    }

    pub fn register_compilation_needed(&self, thread: ThreadId, method: MethodId) {
        self.tracker.register_waiting(thread, method);
    }

    pub fn register_compilation_done(&self, thread: ThreadId) -> InitResult<()> {
        self.tracker.unregister_waiting(thread).map(drop)
    }

    pub fn compilation_leads_to_deadlock(&self, thread: ThreadId, method: MethodId) -> bool {
        self.detector().would_deadlock(thread, method)
    }

    pub fn stats(&self) -> InitStats {
        InitStats {
            static_objects: self.store.len(),
            static_symbols: self.symbols.len(),
            cctor_records: self.registry.len(),
            translators: self.tracker.translator_count(),
            waiting_threads: self.tracker.waiting_thread_count(),
            cached_constructors: self.cached.lock().len(),
            relaxed_waits: self.relaxed_waits.load(Ordering::Relaxed),
        }
    }

    /// Frees all static objects and forgets every record. No other thread may use
    /// the coordinator meanwhile; afterwards it starts from scratch.
    pub fn shutdown(&self) {
        let flushed = self.flush_cached_constructors();
        let freed = self.store.shutdown();
        self.symbols.clear();
        self.registry.clear();
        self.tracker.clear();
        self.caching.store(
            self.config.behavior.contains(InitBehavior::CACHE_CONSTRUCTORS),
            Ordering::Release,
        );
        self.relaxed_waits.store(0, Ordering::Relaxed);
        tracing::debug!(freed, flushed, "static initialization state shut down");
    }
}
