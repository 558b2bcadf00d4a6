use std::{
    fmt::{self, Display},
    num::NonZeroU32,
    sync::atomic::{AtomicU64, Ordering},
};

pub use error::*;

mod error;

/// Highest compile priority a method can be submitted with.
pub const MAX_METHOD_PRIORITY: f32 = 1.0;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_THREAD: ThreadId = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
}

/// Opaque identity of a thread taking part in static initialization.
///
/// Values are never reused within a process, so a `ThreadId` stays a valid map key
/// after its thread exits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Id of the calling OS thread, assigned on first use.
    pub fn current() -> Self {
        CURRENT_THREAD.with(|id| *id)
    }

    pub const fn from_u64(id: u64) -> Self {
        ThreadId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Handle of a GC-owned object. Zero is reserved for "no object".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle(NonZeroU32);

impl ObjectHandle {
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(ObjectHandle)
    }

    pub fn id(self) -> u32 {
        self.0.get()
    }
}

/// Compilation stage of a method, as reported by the translation pipeline.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum MethodState {
    #[default]
    Cil,
    Ir,
    MachineCode,
    Executable,
}

/// The mutable part of a method handle, guarded by the method's own lock.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MethodProfile {
    pub state: MethodState,
    // negative means unknown
    pub execution_probability: f32,
}

impl Default for MethodProfile {
    fn default() -> Self {
        Self {
            state: MethodState::default(),
            execution_probability: -1.0,
        }
    }
}
