//! In-memory collaborators for unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::runtime::{
    BoxError, ExecutionEngine, GarbageCollector, InitConfig, Method, MethodId, MethodProfile,
    MethodRef, MethodState, ObjectHandle, RuntimeEnv, StaticInitCoordinator, SymbolId, SymbolKind,
    SymbolManager, SymbolTable, TranslationPipeline, TypeDescriptor, TypeKey, TypeRef,
};

static NEXT_TYPE_KEY: AtomicU64 = AtomicU64::new(1);
static NEXT_METHOD_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) const LOG_VAR: &str = "TYPEINIT_LOG";

/// Installs a test-writer subscriber filtered by `TYPEINIT_LOG`, once per process.
pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env(LOG_VAR))
        .with_test_writer()
        .try_init();
}

#[derive(Debug)]
pub(crate) struct TestType {
    key: TypeKey,
    name: Arc<str>,
    size: usize,
    cctor: OnceLock<MethodRef>,
}

impl TestType {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::with_size(name, 8)
    }

    pub(crate) fn with_size(name: &str, size: usize) -> Arc<Self> {
        Arc::new(Self {
            key: TypeKey(NEXT_TYPE_KEY.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            size,
            cctor: OnceLock::new(),
        })
    }

    /// A type together with its static constructor. The cctor only holds a weak
    /// reference back, so keep the type alive while the cctor may run.
    pub(crate) fn with_cctor(name: &str) -> (TypeRef, MethodRef) {
        let ty = Self::new(name);
        let cctor: MethodRef = TestMethod::new(&format!("{name}::.cctor"), &ty);
        ty.cctor
            .set(Arc::clone(&cctor))
            .expect("fresh type has no cctor");
        (ty as TypeRef, cctor)
    }
}

impl TypeDescriptor for TestType {
    fn key(&self) -> TypeKey {
        self.key
    }

    fn complete_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    fn cctor(&self) -> Option<MethodRef> {
        self.cctor.get().cloned()
    }

    fn static_size(&self) -> usize {
        self.size
    }
}

#[derive(Debug)]
pub(crate) struct TestMethod {
    id: MethodId,
    name: Arc<str>,
    owner: Weak<TestType>,
    profile: Mutex<MethodProfile>,
    cctors_to_call: Mutex<Vec<MethodRef>>,
}

impl TestMethod {
    pub(crate) fn new(name: &str, owner: &Arc<TestType>) -> Arc<Self> {
        Arc::new(Self {
            id: MethodId(NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            owner: Arc::downgrade(owner),
            profile: Mutex::new(MethodProfile::default()),
            cctors_to_call: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_probability(name: &str, owner: &Arc<TestType>, probability: f32) -> Arc<Self> {
        let method = Self::new(name, owner);
        method.profile.lock().execution_probability = probability;
        method
    }

    pub(crate) fn cctors_to_call(&self) -> Vec<MethodRef> {
        self.cctors_to_call.lock().clone()
    }
}

impl Method for TestMethod {
    fn id(&self) -> MethodId {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    fn owner_type(&self) -> TypeRef {
        self.owner.upgrade().expect("owner type dropped")
    }

    fn profile(&self) -> &Mutex<MethodProfile> {
        &self.profile
    }

    fn add_cctor_to_call(&self, cctor: MethodRef) {
        self.cctors_to_call.lock().push(cctor);
    }
}

pub(crate) struct MockGc {
    next_object: AtomicU32,
    fail: AtomicBool,
    allocations: Mutex<Vec<TypeKey>>,
    freed: Mutex<Vec<ObjectHandle>>,
    fields: DashMap<ObjectHandle, i64>,
}

impl MockGc {
    pub(crate) fn new() -> Self {
        Self {
            next_object: AtomicU32::new(1),
            fail: AtomicBool::new(false),
            allocations: Mutex::new(Vec::new()),
            freed: Mutex::new(Vec::new()),
            fields: DashMap::new(),
        }
    }

    pub(crate) fn fail_allocations(&self) {
        self.fail.store(true, Ordering::Relaxed);
    }

    pub(crate) fn allocations_of(&self, key: TypeKey) -> usize {
        self.allocations.lock().iter().filter(|k| **k == key).count()
    }

    pub(crate) fn freed(&self) -> Vec<ObjectHandle> {
        self.freed.lock().clone()
    }

    pub(crate) fn field(&self, object: ObjectHandle) -> i64 {
        self.fields.get(&object).map(|v| *v).unwrap_or_default()
    }

    pub(crate) fn set_field(&self, object: ObjectHandle, value: i64) {
        self.fields.insert(object, value);
    }
}

impl GarbageCollector for MockGc {
    fn alloc_static_object(&self, ty: &dyn TypeDescriptor, _extra_bytes: usize) -> Option<ObjectHandle> {
        if self.fail.load(Ordering::Relaxed) {
            return None;
        }
        // widen the window for racing allocators
        std::thread::yield_now();
        let object = ObjectHandle::new(self.next_object.fetch_add(1, Ordering::Relaxed))?;
        self.allocations.lock().push(ty.key());
        self.fields.insert(object, 0);
        Some(object)
    }

    fn free_object(&self, object: ObjectHandle) {
        self.fields.remove(&object);
        self.freed.lock().push(object);
    }
}

#[derive(Default)]
pub(crate) struct MockPipeline {
    fail: AtomicBool,
    synch_compiles: Mutex<Vec<MethodId>>,
    submissions: Mutex<Vec<MethodId>>,
    waits_declared: AtomicUsize,
    waits_done: AtomicUsize,
}

impl MockPipeline {
    pub(crate) fn fail_compilations(&self) {
        self.fail.store(true, Ordering::Relaxed);
    }

    pub(crate) fn synch_compiles_of(&self, method: MethodId) -> usize {
        self.synch_compiles.lock().iter().filter(|m| **m == method).count()
    }

    pub(crate) fn submissions_of(&self, method: MethodId) -> usize {
        self.submissions.lock().iter().filter(|m| **m == method).count()
    }

    pub(crate) fn waits_declared(&self) -> usize {
        self.waits_declared.load(Ordering::SeqCst)
    }

    pub(crate) fn waits_in_progress(&self) -> usize {
        self.waits_declared() - self.waits_done.load(Ordering::SeqCst)
    }

    fn compile(&self, method: &MethodRef) -> Result<(), BoxError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(format!("cannot compile {}", method.name()).into());
        }
        method.profile().lock().state = MethodState::Executable;
        Ok(())
    }
}

impl TranslationPipeline for MockPipeline {
    fn synch_insert_method(&self, method: &MethodRef, _priority: f32) -> Result<(), BoxError> {
        self.synch_compiles.lock().push(method.id());
        self.compile(method)
    }

    fn insert_method(&self, method: &MethodRef, _priority: f32) -> Result<(), BoxError> {
        self.submissions.lock().push(method.id());
        self.compile(method)
    }

    fn declare_waiting_cctor(&self) {
        self.waits_declared.fetch_add(1, Ordering::SeqCst);
    }

    fn declare_waiting_cctor_done(&self) {
        self.waits_done.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) type Body = Arc<dyn Fn(ObjectHandle) -> Result<(), BoxError> + Send + Sync>;

/// Runs registered closures in place of cctor bodies. Methods without a body succeed.
#[derive(Default)]
pub(crate) struct MockEngine {
    bodies: DashMap<MethodId, Body>,
    runs: Mutex<Vec<MethodId>>,
}

impl MockEngine {
    pub(crate) fn set_body(
        &self,
        method: &MethodRef,
        body: impl Fn(ObjectHandle) -> Result<(), BoxError> + Send + Sync + 'static,
    ) {
        self.bodies.insert(method.id(), Arc::new(body));
    }

    /// Methods in the order their bodies started.
    pub(crate) fn runs(&self) -> Vec<MethodId> {
        self.runs.lock().clone()
    }

    pub(crate) fn runs_of(&self, method: MethodId) -> usize {
        self.runs.lock().iter().filter(|m| **m == method).count()
    }
}

impl ExecutionEngine for MockEngine {
    fn run(&self, method: &MethodRef, args: &[ObjectHandle]) -> Result<(), BoxError> {
        self.runs.lock().push(method.id());
        // cloned out so the body may register or run other bodies
        let body = self.bodies.get(&method.id()).map(|b| Arc::clone(b.value()));
        match (body, args.first()) {
            (Some(body), Some(object)) => body(*object),
            (Some(_), None) => Err(format!("{} called without its static object", method.name()).into()),
            (None, _) => Ok(()),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockSymbols {
    next_symbol: AtomicU32,
    symbols: Mutex<HashMap<(SymbolKind, TypeKey), SymbolId>>,
    types: Mutex<HashMap<SymbolId, (SymbolKind, TypeRef)>>,
    managers: Mutex<HashMap<SymbolKind, Arc<dyn SymbolManager>>>,
}

impl MockSymbols {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn has_manager(&self, kind: SymbolKind) -> bool {
        self.managers.lock().contains_key(&kind)
    }
}

impl SymbolTable for MockSymbols {
    fn create_symbol(&self, kind: SymbolKind, ty: &TypeRef) -> SymbolId {
        let mut symbols = self.symbols.lock();
        *symbols.entry((kind, ty.key())).or_insert_with(|| {
            let symbol = SymbolId(self.next_symbol.fetch_add(1, Ordering::Relaxed) + 1);
            self.types.lock().insert(symbol, (kind, Arc::clone(ty)));
            symbol
        })
    }

    fn resolve_type_symbol(&self, symbol: SymbolId) -> Option<TypeRef> {
        match self.types.lock().get(&symbol) {
            Some((SymbolKind::TypeDescriptor, ty)) => Some(Arc::clone(ty)),
            _ => None,
        }
    }

    fn register_symbol_manager(&self, kind: SymbolKind, manager: Arc<dyn SymbolManager>) {
        self.managers.lock().insert(kind, manager);
    }
}

pub(crate) struct Harness {
    pub(crate) gc: Arc<MockGc>,
    pub(crate) pipeline: Arc<MockPipeline>,
    pub(crate) engine: Arc<MockEngine>,
    pub(crate) symbols: Arc<MockSymbols>,
    pub(crate) coordinator: StaticInitCoordinator,
}

pub(crate) fn harness() -> Harness {
    harness_with(InitConfig::default())
}

pub(crate) fn harness_with(config: InitConfig) -> Harness {
    init_logging();
    let gc = Arc::new(MockGc::new());
    let pipeline = Arc::new(MockPipeline::default());
    let engine = Arc::new(MockEngine::default());
    let symbols = Arc::new(MockSymbols::new());
    let env = RuntimeEnv {
        gc: gc.clone(),
        pipeline: pipeline.clone(),
        engine: engine.clone(),
        symbols: symbols.clone(),
    };

    Harness {
        coordinator: StaticInitCoordinator::new(env, config),
        gc,
        pipeline,
        engine,
        symbols,
    }
}
