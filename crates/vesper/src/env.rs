//! Namespaces, vars, and the process-wide environment.
//!
//! All name resolution roots in the [`Env`]: a registry of namespaces, a
//! central var table, the dynamic-binding frame stack, the `isa?` hierarchy
//! backing multimethod dispatch, and the reader's feature set and data
//! readers. The environment is passed by explicit reference throughout; the
//! only task-local state (the binding stack) lives here rather than in a
//! hidden global.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    intern::{Interns, KeywordId, StringId, SymbolId},
    value::Value,
};

/// Index into the central var table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VarId(u32);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into the namespace registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NsId(u32);

impl NsId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named, mutable cell owned by a namespace.
#[derive(Debug)]
pub(crate) struct Var {
    /// The var's unqualified name symbol.
    pub symbol: SymbolId,
    /// Name of the owning namespace.
    pub ns_name: StringId,
    pub root: Value,
    pub dynamic: bool,
    pub is_macro: bool,
    pub private: bool,
    pub doc: Option<StringId>,
    pub arglists: Option<Value>,
    pub meta: Option<Value>,
    /// `(key, fn)` watch pairs; currently only populated through var metadata.
    pub watches: Vec<(Value, Value)>,
}

/// A namespace: mappings it owns, plus aliases and refers it consumes.
#[derive(Debug)]
pub(crate) struct Namespace {
    pub name: StringId,
    /// Vars interned in this namespace, by unqualified name.
    pub mappings: IndexMap<StringId, VarId>,
    /// Namespace aliases usable as qualifier prefixes.
    pub aliases: IndexMap<StringId, NsId>,
    /// Vars referred from other namespaces, by unqualified name.
    pub refers: IndexMap<StringId, VarId>,
}

/// One frame of the dynamic-binding stack.
#[derive(Debug, Default)]
pub(crate) struct BindingFrame {
    pub entries: Vec<(VarId, Value)>,
}

/// Name of the bootstrap namespace holding every builtin.
pub(crate) const CORE_NS: &str = "vesper.core";

/// The process-wide environment.
#[derive(Debug)]
pub(crate) struct Env {
    vars: Vec<Var>,
    namespaces: Vec<Namespace>,
    ns_ids: AHashMap<StringId, NsId>,
    pub current_ns: NsId,
    core_ns: NsId,
    /// Feature keywords consulted by `#?(...)` reader conditionals.
    pub features: Vec<KeywordId>,
    /// Tagged-literal readers: tag symbol -> reader fn.
    pub data_readers: AHashMap<SymbolId, Value>,
    /// Fallback `(tag form)` reader for unknown tags.
    pub default_data_reader: Option<Value>,
    /// Dynamic binding frames, innermost last.
    binding_stack: Vec<BindingFrame>,
    /// Global `isa?` edges: `(child tag, parent tag)`.
    pub hierarchy: Vec<(Value, Value)>,
}

impl Env {
    /// Creates the environment with the core and `user` namespaces and the
    /// default reader features.
    pub fn new(interns: &mut Interns) -> Self {
        let mut env = Self {
            vars: Vec::new(),
            namespaces: Vec::new(),
            ns_ids: AHashMap::new(),
            current_ns: NsId(0),
            core_ns: NsId(0),
            features: Vec::new(),
            data_readers: AHashMap::new(),
            default_data_reader: None,
            binding_stack: Vec::new(),
            hierarchy: Vec::new(),
        };
        let core = env.ensure_ns(interns.intern_str(CORE_NS));
        env.core_ns = core;
        let user = env.ensure_ns(interns.intern_str("user"));
        env.current_ns = user;
        env.features.push(interns.intern_keyword(None, "vesper"));
        env.features.push(interns.intern_keyword(None, "default"));
        env
    }

    pub fn core_ns(&self) -> NsId {
        self.core_ns
    }

    /// Finds or creates a namespace by name.
    pub fn ensure_ns(&mut self, name: StringId) -> NsId {
        if let Some(id) = self.ns_ids.get(&name) {
            return *id;
        }
        let id = NsId(u32::try_from(self.namespaces.len()).expect("namespace registry overflow"));
        self.namespaces.push(Namespace {
            name,
            mappings: IndexMap::new(),
            aliases: IndexMap::new(),
            refers: IndexMap::new(),
        });
        self.ns_ids.insert(name, id);
        id
    }

    pub fn find_ns(&self, name: StringId) -> Option<NsId> {
        self.ns_ids.get(&name).copied()
    }

    pub fn ns(&self, id: NsId) -> &Namespace {
        &self.namespaces[id.index()]
    }

    pub fn ns_mut(&mut self, id: NsId) -> &mut Namespace {
        &mut self.namespaces[id.index()]
    }

    pub fn all_ns(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }

    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.index()]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Var {
        &mut self.vars[id.index()]
    }

    /// Interns a var in a namespace. Idempotent: a second intern of the same
    /// name returns the existing var untouched.
    pub fn intern_var(&mut self, ns: NsId, name: SymbolId, interns: &Interns) -> VarId {
        let name_str = interns.symbol(name).name;
        if let Some(existing) = self.namespaces[ns.index()].mappings.get(&name_str) {
            return *existing;
        }
        let ns_name = self.namespaces[ns.index()].name;
        let id = VarId(u32::try_from(self.vars.len()).expect("var table overflow"));
        // Construct and populate before publishing into the mappings.
        self.vars.push(Var {
            symbol: name,
            ns_name,
            root: Value::Nil,
            dynamic: false,
            is_macro: false,
            private: false,
            doc: None,
            arglists: None,
            meta: None,
            watches: Vec::new(),
        });
        self.namespaces[ns.index()].mappings.insert(name_str, id);
        id
    }

    /// Resolves a symbol to a var.
    ///
    /// Unqualified: current namespace mappings, then refers, then the core
    /// namespace. Qualified: alias expansion first, then the named namespace's
    /// mappings.
    pub fn resolve(&self, symbol: SymbolId, interns: &Interns) -> Option<VarId> {
        let parts = interns.symbol(symbol);
        let current = &self.namespaces[self.current_ns.index()];
        match parts.ns {
            None => current
                .mappings
                .get(&parts.name)
                .or_else(|| current.refers.get(&parts.name))
                .or_else(|| self.namespaces[self.core_ns.index()].mappings.get(&parts.name))
                .copied(),
            Some(ns_name) => {
                let ns_id = current
                    .aliases
                    .get(&ns_name)
                    .copied()
                    .or_else(|| self.ns_ids.get(&ns_name).copied())?;
                let target = &self.namespaces[ns_id.index()];
                let var = target.mappings.get(&parts.name).copied()?;
                // Private vars are visible only inside their own namespace.
                if self.vars[var.index()].private && ns_id != self.current_ns {
                    return None;
                }
                Some(var)
            }
        }
    }

    /// Dereferences a var: dynamic vars consult the binding stack top-down,
    /// everything else returns the root directly.
    pub fn deref_var(&self, id: VarId) -> Value {
        let var = &self.vars[id.index()];
        if var.dynamic {
            for frame in self.binding_stack.iter().rev() {
                for &(bound, value) in &frame.entries {
                    if bound == id {
                        return value;
                    }
                }
            }
        }
        var.root
    }

    /// Rebinds the innermost dynamic binding of `id`, or the root when no
    /// frame binds it.
    pub fn set_var(&mut self, id: VarId, value: Value) {
        if self.vars[id.index()].dynamic {
            for frame in self.binding_stack.iter_mut().rev() {
                for entry in &mut frame.entries {
                    if entry.0 == id {
                        entry.1 = value;
                        return;
                    }
                }
            }
        }
        self.vars[id.index()].root = value;
    }

    pub fn push_binding_frame(&mut self, frame: BindingFrame) {
        self.binding_stack.push(frame);
    }

    pub fn pop_binding_frame(&mut self) -> Option<BindingFrame> {
        self.binding_stack.pop()
    }

    /// Current binding stack depth; checked at top-level boundaries.
    pub fn binding_depth(&self) -> usize {
        self.binding_stack.len()
    }

    /// Adds an `isa?` edge.
    pub fn derive(&mut self, child: Value, parent: Value) {
        self.hierarchy.push((child, parent));
    }

    /// All GC roots reachable from the environment.
    pub fn iter_roots(&self) -> impl Iterator<Item = Value> + '_ {
        let var_values = self.vars.iter().flat_map(|var| {
            [var.root, var.meta.unwrap_or(Value::Nil), var.arglists.unwrap_or(Value::Nil)]
                .into_iter()
                .chain(var.watches.iter().flat_map(|&(k, w)| [k, w]))
                .collect::<Vec<_>>()
        });
        let binding_values = self
            .binding_stack
            .iter()
            .flat_map(|frame| frame.entries.iter().map(|&(_, v)| v));
        let hierarchy_values = self.hierarchy.iter().flat_map(|&(a, b)| [a, b]);
        let reader_values = self
            .data_readers
            .values()
            .copied()
            .chain(self.default_data_reader);
        var_values
            .chain(binding_values)
            .chain(hierarchy_values)
            .chain(reader_values)
    }
}
