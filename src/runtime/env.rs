use std::{fmt, fmt::Debug, sync::Arc};

use parking_lot::Mutex;

use crate::runtime::{
    BoxError, InitResult, MethodId, MethodProfile, ObjectHandle, SymbolId, TypeKey,
};

pub type TypeRef = Arc<dyn TypeDescriptor>;
pub type MethodRef = Arc<dyn Method>;

/// A type as seen by the type system. Identity is `key`, never pointer equality.
pub trait TypeDescriptor: Debug + Send + Sync {
    fn key(&self) -> TypeKey;
    fn complete_name(&self) -> Arc<str>;
    fn cctor(&self) -> Option<MethodRef>;
    // bytes of static storage, as laid out by the type system
    fn static_size(&self) -> usize;
}

pub trait Method: Debug + Send + Sync {
    fn id(&self) -> MethodId;
    fn name(&self) -> Arc<str>;
    fn owner_type(&self) -> TypeRef;
    /// The method's lock; state and execution probability are only read or written
    /// while holding it.
    fn profile(&self) -> &Mutex<MethodProfile>;
    /// Records that `cctor` must have run before this method touches static state.
    fn add_cctor_to_call(&self, cctor: MethodRef);
}

pub trait GarbageCollector: Send + Sync {
    fn alloc_static_object(&self, ty: &dyn TypeDescriptor, extra_bytes: usize)
    -> Option<ObjectHandle>;
    fn free_object(&self, object: ObjectHandle);
}

pub trait TranslationPipeline: Send + Sync {
    /// Compiles `method` and returns once it is executable.
    fn synch_insert_method(&self, method: &MethodRef, priority: f32) -> Result<(), BoxError>;
    /// Queues `method` for compilation without waiting for it.
    fn insert_method(&self, method: &MethodRef, priority: f32) -> Result<(), BoxError>;
    fn declare_waiting_cctor(&self) {}
    fn declare_waiting_cctor_done(&self) {}
}

pub trait ExecutionEngine: Send + Sync {
    fn run(&self, method: &MethodRef, args: &[ObjectHandle]) -> Result<(), BoxError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    TypeDescriptor,
    StaticObject,
}

pub trait SymbolTable: Send + Sync {
    /// Same `(kind, ty)` always yields the same symbol.
    fn create_symbol(&self, kind: SymbolKind, ty: &TypeRef) -> SymbolId;
    /// Loads a `TypeDescriptor` symbol and resolves it back to its type.
    fn resolve_type_symbol(&self, symbol: SymbolId) -> Option<TypeRef>;
    fn register_symbol_manager(&self, kind: SymbolKind, manager: Arc<dyn SymbolManager>);
}

/// Per-kind hooks the symbol table calls to resolve and persist symbols it does not
/// understand itself.
pub trait SymbolManager: Send + Sync {
    fn resolve(&self, ty: &TypeRef) -> InitResult<ObjectHandle>;
    fn serialize(&self, ty: &TypeRef, symbols: &dyn SymbolTable) -> Vec<u8>;
    fn dump(&self, ty: &TypeRef, out: &mut dyn fmt::Write) -> fmt::Result;
    fn deserialize(&self, bytes: &[u8], symbols: &dyn SymbolTable) -> InitResult<SymbolId>;
}

/// Collaborators the coordinator is constructed with.
#[derive(Clone)]
pub struct RuntimeEnv {
    pub gc: Arc<dyn GarbageCollector>,
    pub pipeline: Arc<dyn TranslationPipeline>,
    pub engine: Arc<dyn ExecutionEngine>,
    pub symbols: Arc<dyn SymbolTable>,
}

impl Debug for RuntimeEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeEnv").finish_non_exhaustive()
    }
}
