use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::runtime::{GarbageCollector, InitError, InitResult, ObjectHandle, TypeKey, TypeRef};

pub use static_symbol::*;

mod static_symbol;

/// One static object per type, allocated on first request.
pub struct StaticObjectStore {
    gc: Arc<dyn GarbageCollector>,
    objects: DashMap<TypeKey, Arc<OnceCell<ObjectHandle>>>,
}

impl StaticObjectStore {
    pub fn new(gc: Arc<dyn GarbageCollector>) -> Self {
        Self {
            gc,
            objects: DashMap::new(),
        }
    }

    /// Returns the static object of `ty`, allocating it if this is the first request.
    ///
    /// Concurrent callers for the same type share one allocation; the table shard is
    /// only held long enough to fetch the type's cell.
    pub fn get_or_create(&self, ty: &TypeRef) -> InitResult<ObjectHandle> {
        let cell = Arc::clone(self.objects.entry(ty.key()).or_default().value());

        let object = cell.get_or_try_init(|| {
            let Some(object) = self.gc.alloc_static_object(ty.as_ref(), 0) else {
                let type_name = ty.complete_name();
                tracing::error!(%type_name, "gc returned no static object");
                return Err(InitError::AllocationFailure { type_name });
            };
            tracing::debug!(type_name = %ty.complete_name(), object = object.id(), "allocated static object");
            Ok(object)
        })?;

        Ok(*object)
    }

    pub fn get(&self, key: TypeKey) -> Option<ObjectHandle> {
        self.objects
            .get(&key)
            .and_then(|cell| cell.value().get().copied())
    }

    pub fn len(&self) -> usize {
        self.objects
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frees every static object through the GC and forgets all types.
    /// Returns how many objects were freed.
    pub fn shutdown(&self) -> usize {
        let mut freed = 0;
        self.objects.retain(|_, cell| {
            if let Some(object) = cell.get() {
                self.gc.free_object(*object);
                freed += 1;
            }
            false
        });
        freed
    }
}
