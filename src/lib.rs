pub mod runtime;

pub use runtime::{
    CctorExecutionRegistry, CctorRecord, CctorState, DeadlockDetector, ExecutionEngine,
    GarbageCollector, InitBehavior, InitConfig, InitError, InitResult, InitStats, Method,
    MethodId, MethodProfile, MethodRef, MethodState, ObjectHandle, RuntimeEnv,
    StaticInitCoordinator, StaticMemoryDescriptor, StaticObjectStore, SymbolId, SymbolKind,
    SymbolManager, SymbolTable, ThreadId, TranslationDependencyTracker, TranslationPipeline,
    TypeDescriptor, TypeKey, TypeRef,
};
