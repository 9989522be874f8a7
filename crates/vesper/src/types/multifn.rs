//! Multimethods and protocols.

use ahash::AHashMap;

use crate::{
    env::VarId,
    intern::{StringId, SymbolId},
    value::{TypeKw, Value},
};

/// A multimethod: user-programmable dispatch layered over value equality and
/// the global `isa?` hierarchy.
#[derive(Debug, Clone)]
pub(crate) struct MultiFn {
    pub name: SymbolId,
    pub dispatch_fn: Value,
    /// `(dispatch value, method fn)` in registration order.
    pub methods: Vec<(Value, Value)>,
    /// `(winner, loser)` pairs from `prefer-method`, breaking hierarchy ties.
    pub prefers: Vec<(Value, Value)>,
}

impl MultiFn {
    pub fn new(name: SymbolId, dispatch_fn: Value) -> Self {
        Self {
            name,
            dispatch_fn,
            methods: Vec::new(),
            prefers: Vec::new(),
        }
    }
}

/// A protocol: named method signatures plus per-type implementations.
#[derive(Debug, Clone)]
pub(crate) struct Protocol {
    pub name: SymbolId,
    /// `(method name, arity)` signatures from `defprotocol`.
    pub sigs: Vec<(StringId, u8)>,
    /// Implementations installed by `extend-type`, keyed by the receiver's
    /// type keyword, then by method name.
    pub impls: AHashMap<TypeKw, AHashMap<StringId, Value>>,
}

impl Protocol {
    pub fn new(name: SymbolId, sigs: Vec<(StringId, u8)>) -> Self {
        Self {
            name,
            sigs,
            impls: AHashMap::new(),
        }
    }

    /// Looks up the implementation of `method` for a receiver type.
    pub fn lookup(&self, type_kw: TypeKw, method: StringId) -> Option<Value> {
        self.impls.get(&type_kw)?.get(&method).copied()
    }
}

/// The callable installed in a protocol method's var; dispatches on the type
/// keyword of its first argument.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProtocolFn {
    /// Var holding the protocol value.
    pub protocol_var: VarId,
    pub method: StringId,
}
