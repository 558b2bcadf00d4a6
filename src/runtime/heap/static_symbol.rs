use std::{fmt, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use nom::{IResult, combinator::eof};

use crate::runtime::{
    InitError, InitResult, ObjectHandle, StaticObjectStore, SymbolId, SymbolKind, SymbolManager,
    SymbolTable, TypeRef,
};

/// Static storage of one type, as handed to ahead-of-time consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMemoryDescriptor {
    pub symbol: SymbolId,
    pub storage: ObjectHandle,
    pub name: Arc<str>,
    pub size: usize,
}

/// Cache of `StaticObject` symbols and the symbol manager behind them.
pub struct StaticSymbolTable {
    store: Arc<StaticObjectStore>,
    descriptors: DashMap<SymbolId, Arc<StaticMemoryDescriptor>>,
}

impl StaticSymbolTable {
    pub fn new(store: Arc<StaticObjectStore>) -> Self {
        Self {
            store,
            descriptors: DashMap::new(),
        }
    }

    pub fn fetch_symbol(&self, ty: &TypeRef, symbols: &dyn SymbolTable) -> InitResult<SymbolId> {
        let symbol = symbols.create_symbol(SymbolKind::StaticObject, ty);

        if let Entry::Vacant(entry) = self.descriptors.entry(symbol) {
            let storage = self.store.get_or_create(ty)?;
            let descriptor = StaticMemoryDescriptor {
                symbol,
                storage,
                name: ty.complete_name(),
                size: ty.static_size(),
            };
            tracing::trace!(?descriptor, "new static memory descriptor");
            entry.insert(Arc::new(descriptor));
        }

        Ok(symbol)
    }

    pub fn descriptor(&self, symbol: SymbolId) -> Option<Arc<StaticMemoryDescriptor>> {
        self.descriptors
            .get(&symbol)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn clear(&self) {
        self.descriptors.clear();
    }
}

impl SymbolManager for StaticSymbolTable {
    fn resolve(&self, ty: &TypeRef) -> InitResult<ObjectHandle> {
        self.store.get_or_create(ty)
    }

    // the type symbol id as decimal text
    fn serialize(&self, ty: &TypeRef, symbols: &dyn SymbolTable) -> Vec<u8> {
        let type_symbol = symbols.create_symbol(SymbolKind::TypeDescriptor, ty);
        type_symbol.0.to_string().into_bytes()
    }

    fn dump(&self, ty: &TypeRef, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "Static Object of {}", ty.complete_name())
    }

    fn deserialize(&self, bytes: &[u8], symbols: &dyn SymbolTable) -> InitResult<SymbolId> {
        let (_, type_symbol) = parse_type_symbol(bytes)
            .map_err(|err| InitError::MalformedSymbol(format!("{err:?}")))?;
        let Some(ty) = symbols.resolve_type_symbol(SymbolId(type_symbol)) else {
            return Err(InitError::MalformedSymbol(format!(
                "unknown type symbol {type_symbol}"
            )));
        };
        self.fetch_symbol(&ty, symbols)
    }
}

fn parse_type_symbol(input: &[u8]) -> IResult<&[u8], u32> {
    let (input, id) = nom::character::complete::u32(input)?;
    let (input, _) = eof(input)?;
    Ok((input, id))
}
