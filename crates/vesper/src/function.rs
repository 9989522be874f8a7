//! Function definitions and the function registry.
//!
//! The analyzer extracts every `fn` form into an [`FnDef`] stored in the
//! [`FnRegistry`]; the node tree refers to it by [`FnId`]. This keeps closure
//! creation cheap (a slot copy, no body clone) and gives both backends a
//! shared home for per-function artifacts: the tree walker reads the arity
//! bodies, the compiler memoizes one `FnProto` per arity next to the
//! definition. Registry entries are reclaimed by the same mark-sweep pass
//! that collects the persistent heap.

use std::rc::Rc;

use crate::{heap::HeapId, intern::SymbolId, node::Node, value::Value};

/// Index of a function definition in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FnId(u32);

impl FnId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("function registry overflow"))
    }
}

/// One arity of a function.
#[derive(Debug)]
pub(crate) struct FnArity {
    /// Parameter names in order. For variadic arities the last entry is the
    /// rest parameter.
    pub params: Vec<SymbolId>,
    pub variadic: bool,
    /// Total slot count of an invocation frame: captures, the self slot for
    /// named fns, parameters, and body locals.
    pub slot_count: u16,
    pub body: Node,
}

impl FnArity {
    /// Number of fixed (non-rest) parameters.
    pub fn fixed_arity(&self) -> usize {
        if self.variadic {
            self.params.len() - 1
        } else {
            self.params.len()
        }
    }
}

/// A function definition shared by every closure created from one `fn` form.
#[derive(Debug)]
pub(crate) struct FnDef {
    /// The fn's own name (`(fn f [x] ...)` or the `defn` name), if any.
    pub name: Option<SymbolId>,
    /// Namespace the definition was analyzed in, for callstack frames.
    pub ns_name: Option<SymbolId>,
    pub arities: Vec<FnArity>,
    /// Number of creating-frame slots a closure copies at construction.
    pub capture_count: u16,
    /// Named fns reserve one extra closure slot, written with the closure
    /// itself after construction, so the body can recurse by name.
    pub has_self_slot: bool,
}

impl FnDef {
    /// Selects the arity matching `argc` actual arguments.
    ///
    /// Fixed arities match exactly; a variadic arity matches any count at or
    /// above its fixed parameter count. Exact matches win over variadic ones.
    pub fn select_arity(&self, argc: usize) -> Option<usize> {
        let mut variadic: Option<usize> = None;
        for (i, arity) in self.arities.iter().enumerate() {
            if arity.variadic {
                if argc >= arity.fixed_arity() {
                    variadic = Some(i);
                }
            } else if arity.params.len() == argc {
                return Some(i);
            }
        }
        variadic
    }

    /// First closure slot that holds a parameter.
    pub fn param_base(&self) -> u16 {
        self.capture_count + u16::from(self.has_self_slot)
    }
}

/// A closure: a function definition plus captured slot values.
///
/// Captures are a prefix copy of the creating frame's slots
/// (`def.capture_count` of them), followed by the self slot for named fns.
#[derive(Debug, Clone)]
pub(crate) struct Closure {
    pub fn_id: FnId,
    pub captures: Vec<Value>,
}

/// A partial application: stored arguments are prepended on call.
#[derive(Debug, Clone)]
pub(crate) struct PartialFn {
    pub f: Value,
    pub args: Vec<Value>,
}

/// A function composition; `fns` are applied right-to-left.
#[derive(Debug, Clone)]
pub(crate) struct CompFn {
    pub fns: Vec<Value>,
}

#[derive(Debug)]
struct FnEntry {
    def: Rc<FnDef>,
    /// Compiled `FnProto` heap ids, one per arity, filled in lazily by the
    /// bytecode compiler.
    compiled: Option<Vec<HeapId>>,
}

/// Registry of all live function definitions.
#[derive(Debug, Default)]
pub(crate) struct FnRegistry {
    entries: Vec<Option<FnEntry>>,
    free: Vec<u32>,
}

impl FnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: FnDef) -> FnId {
        let entry = FnEntry {
            def: Rc::new(def),
            compiled: None,
        };
        if let Some(index) = self.free.pop() {
            self.entries[index as usize] = Some(entry);
            FnId(index)
        } else {
            let id = FnId::from_index(self.entries.len());
            self.entries.push(Some(entry));
            id
        }
    }

    /// Returns a shared handle to a definition.
    ///
    /// # Panics
    /// Panics if the id refers to a collected definition; the GC only sweeps
    /// definitions unreachable from any live value.
    pub fn get(&self, id: FnId) -> Rc<FnDef> {
        Rc::clone(
            &self.entries[id.index()]
                .as_ref()
                .expect("function definition accessed after collection")
                .def,
        )
    }

    pub fn compiled(&self, id: FnId) -> Option<&[HeapId]> {
        self.entries[id.index()]
            .as_ref()
            .expect("function definition accessed after collection")
            .compiled
            .as_deref()
    }

    pub fn set_compiled(&mut self, id: FnId, protos: Vec<HeapId>) {
        self.entries[id.index()]
            .as_mut()
            .expect("function definition accessed after collection")
            .compiled = Some(protos);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_live(&self, id: FnId) -> bool {
        self.entries
            .get(id.index())
            .is_some_and(std::option::Option::is_some)
    }

    /// Drops every definition whose index is not marked. Returns the number
    /// of definitions swept.
    pub fn sweep(&mut self, marked: &[bool]) -> usize {
        let mut swept = 0;
        for (index, slot) in self.entries.iter_mut().enumerate() {
            if slot.is_some() && !marked.get(index).copied().unwrap_or(false) {
                *slot = None;
                self.free.push(u32::try_from(index).expect("registry index fits u32"));
                swept += 1;
            }
        }
        swept
    }
}
