//! The two-zone heap: persistent arena + scratch arena, with mark-sweep GC.
//!
//! Every heap value is allocated in one of two zones, encoded in the high bit
//! of its [`HeapId`]:
//!
//! - **scratch** — reset wholesale between top-level expressions. Evaluation
//!   intermediates live here.
//! - **persistent** — backs everything that outlives a top-level expression:
//!   var roots, escaped closures, protocol/multimethod tables, compiled
//!   function protos. Reclaimed by [`collect_garbage`], a mark-sweep pass
//!   that runs between top-level expressions when enough bytes have been
//!   allocated since the last collection.
//!
//! Values escape scratch exclusively through [`Heap::deep_clone_persistent`],
//! which copies a value graph into the persistent zone (cycle-safe via an
//! old-id -> new-id memo). After `reset_scratch`, no persistent object holds
//! a scratch id; `debug_validate` checks exactly that and backs the arena
//! safety tests.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::{
    bytecode::FnProto,
    env::Env,
    error::RunResult,
    function::{Closure, CompFn, FnId, FnRegistry, PartialFn},
    regex::{MatcherState, Pattern},
    resource::ResourceTracker,
    types::{
        Atom, Delay, DelayState, LazySeq, List, MapColl, MultiFn, Promise, Protocol, ProtocolFn,
        SetColl, Transient, Vector, Volatile,
    },
    value::Value,
};

const PERSISTENT_BIT: u32 = 1 << 31;

/// Identifier of a heap slot; the high bit selects the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(u32);

impl HeapId {
    #[inline]
    pub fn is_persistent(self) -> bool {
        self.0 & PERSISTENT_BIT != 0
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & !PERSISTENT_BIT) as usize
    }

    fn scratch(index: usize) -> Self {
        let raw = u32::try_from(index).expect("scratch heap overflow");
        assert!(raw & PERSISTENT_BIT == 0, "scratch heap overflow");
        Self(raw)
    }

    fn persistent(index: usize) -> Self {
        let raw = u32::try_from(index).expect("persistent heap overflow");
        assert!(raw & PERSISTENT_BIT == 0, "persistent heap overflow");
        Self(raw | PERSISTENT_BIT)
    }
}

/// Every runtime value that lives behind a `Value::Ref`.
#[derive(Debug, Clone)]
pub(crate) enum HeapData {
    Str(String),
    List(List),
    Vector(Vector),
    Map(MapColl),
    Set(SetColl),
    Fn(Closure),
    Partial(PartialFn),
    Comp(CompFn),
    MultiFn(MultiFn),
    Protocol(Protocol),
    ProtocolFn(ProtocolFn),
    /// A compiled function body (bytecode backend).
    FnProto(FnProto),
    LazySeq(LazySeq),
    Atom(Atom),
    Delay(Delay),
    Volatile(Volatile),
    Promise(Promise),
    Reduced(Value),
    Transient(Transient),
    Pattern(Pattern),
    Matcher(MatcherState),
}

impl HeapData {
    /// Rough payload size in bytes, for resource accounting and GC pressure.
    fn estimate_size(&self) -> usize {
        let value = size_of::<Value>();
        let base = size_of::<Self>();
        base + match self {
            Self::Str(s) => s.len(),
            Self::List(_) => 0,
            Self::Vector(v) => v.items.len() * value,
            Self::Map(m) => m.entries.len() * (8 + 2 * value),
            Self::Set(s) => s.entries.len() * (8 + value),
            Self::Fn(c) => c.captures.len() * value,
            Self::Partial(p) => p.args.len() * value,
            Self::Comp(c) => c.fns.len() * value,
            Self::MultiFn(m) => m.methods.len() * 2 * value,
            Self::Protocol(p) => p.impls.len() * 32,
            Self::FnProto(p) => p.code.len() * 4 + p.constants.len() * value,
            Self::LazySeq(_) | Self::ProtocolFn(_) => 0,
            Self::Atom(a) => a.watches.len() * 2 * value,
            Self::Delay(_) | Self::Volatile(_) | Self::Promise(_) | Self::Reduced(_) => 0,
            Self::Transient(Transient::Vector(v)) => v.len() * value,
            Self::Transient(Transient::Map(m)) => m.len() * (8 + 2 * value),
            Self::Transient(Transient::Set(s)) => s.len() * (8 + value),
            Self::Transient(Transient::Spent) => 0,
            Self::Pattern(p) => p.source.len() * 4,
            Self::Matcher(m) => m.subject.len() + m.pattern.source.len() * 4,
        }
    }

    /// Variant name for statistics.
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::List(_) => "List",
            Self::Vector(_) => "Vector",
            Self::Map(_) => "Map",
            Self::Set(_) => "Set",
            Self::Fn(_) => "Fn",
            Self::Partial(_) => "Partial",
            Self::Comp(_) => "Comp",
            Self::MultiFn(_) => "MultiFn",
            Self::Protocol(_) => "Protocol",
            Self::ProtocolFn(_) => "ProtocolFn",
            Self::FnProto(_) => "FnProto",
            Self::LazySeq(_) => "LazySeq",
            Self::Atom(_) => "Atom",
            Self::Delay(_) => "Delay",
            Self::Volatile(_) => "Volatile",
            Self::Promise(_) => "Promise",
            Self::Reduced(_) => "Reduced",
            Self::Transient(_) => "Transient",
            Self::Pattern(_) => "Pattern",
            Self::Matcher(_) => "Matcher",
        }
    }

    /// Visits every `Value` directly held by this object.
    fn for_each_value(&self, mut f: impl FnMut(Value)) {
        match self {
            Self::Str(_) | Self::Pattern(_) | Self::Matcher(_) | Self::ProtocolFn(_) => {}
            Self::List(List::Empty) => {}
            Self::List(List::Cons { first, rest, .. }) => {
                f(*first);
                f(*rest);
            }
            Self::Vector(v) => v.items.iter().copied().for_each(f),
            Self::Map(m) => {
                for &(_, k, v) in &m.entries {
                    f(k);
                    f(v);
                }
            }
            Self::Set(s) => {
                for &(_, e) in &s.entries {
                    f(e);
                }
            }
            Self::Fn(c) => c.captures.iter().copied().for_each(f),
            Self::Partial(p) => {
                f(p.f);
                p.args.iter().copied().for_each(f);
            }
            Self::Comp(c) => c.fns.iter().copied().for_each(f),
            Self::MultiFn(m) => {
                f(m.dispatch_fn);
                for &(k, v) in &m.methods {
                    f(k);
                    f(v);
                }
                for &(a, b) in &m.prefers {
                    f(a);
                    f(b);
                }
            }
            Self::Protocol(p) => {
                for methods in p.impls.values() {
                    for &v in methods.values() {
                        f(v);
                    }
                }
            }
            Self::FnProto(p) => p.constants.iter().copied().for_each(f),
            Self::LazySeq(seq) => match seq {
                LazySeq::Thunk { f: thunk } => f(*thunk),
                LazySeq::Realized { seq } => f(*seq),
                LazySeq::Cons { head, tail } => {
                    f(*head);
                    f(*tail);
                }
                LazySeq::Map { f: func, source, .. } => {
                    f(*func);
                    f(*source);
                }
                LazySeq::Filter { pred, source, .. } => {
                    f(*pred);
                    f(*source);
                }
                LazySeq::Concat { sources } => sources.iter().copied().for_each(f),
                LazySeq::Iterate { f: func, current } => {
                    f(*func);
                    f(*current);
                }
                LazySeq::Repeat { value, .. } => f(*value),
                LazySeq::Cycle { source, .. } => f(*source),
                LazySeq::Range { .. } => {}
                LazySeq::Take { source, .. } => f(*source),
                LazySeq::Indexed { coll, .. } => f(*coll),
            },
            Self::Atom(a) => {
                f(a.value);
                for &(k, w) in &a.watches {
                    f(k);
                    f(w);
                }
            }
            Self::Delay(d) => match &d.state {
                DelayState::Pending(thunk) => f(*thunk),
                DelayState::Realized(v) => f(*v),
            },
            Self::Volatile(v) => f(v.value),
            Self::Promise(p) => {
                if let Some(v) = p.value {
                    f(v);
                }
            }
            Self::Reduced(v) => f(*v),
            Self::Transient(Transient::Vector(items)) => items.iter().copied().for_each(f),
            Self::Transient(Transient::Map(entries)) => {
                for &(_, k, v) in entries {
                    f(k);
                    f(v);
                }
            }
            Self::Transient(Transient::Set(entries)) => {
                for &(_, e) in entries {
                    f(e);
                }
            }
            Self::Transient(Transient::Spent) => {}
        }
    }

    /// Rewrites every directly held `Value` through `f`; used by deep cloning.
    fn rewrite_values(&mut self, mut f: impl FnMut(Value) -> RunResult<Value>) -> RunResult<()> {
        match self {
            Self::Str(_) | Self::Pattern(_) | Self::Matcher(_) | Self::ProtocolFn(_) => {}
            Self::List(List::Empty) => {}
            Self::List(List::Cons { first, rest, .. }) => {
                *first = f(*first)?;
                *rest = f(*rest)?;
            }
            Self::Vector(v) => {
                for item in &mut v.items {
                    *item = f(*item)?;
                }
            }
            Self::Map(m) => {
                for (_, k, v) in &mut m.entries {
                    *k = f(*k)?;
                    *v = f(*v)?;
                }
            }
            Self::Set(s) => {
                for (_, e) in &mut s.entries {
                    *e = f(*e)?;
                }
            }
            Self::Fn(c) => {
                for capture in &mut c.captures {
                    *capture = f(*capture)?;
                }
            }
            Self::Partial(p) => {
                p.f = f(p.f)?;
                for arg in &mut p.args {
                    *arg = f(*arg)?;
                }
            }
            Self::Comp(c) => {
                for g in &mut c.fns {
                    *g = f(*g)?;
                }
            }
            Self::MultiFn(m) => {
                m.dispatch_fn = f(m.dispatch_fn)?;
                for (k, v) in &mut m.methods {
                    *k = f(*k)?;
                    *v = f(*v)?;
                }
                for (a, b) in &mut m.prefers {
                    *a = f(*a)?;
                    *b = f(*b)?;
                }
            }
            Self::Protocol(p) => {
                for methods in p.impls.values_mut() {
                    for v in methods.values_mut() {
                        *v = f(*v)?;
                    }
                }
            }
            Self::FnProto(p) => {
                for constant in &mut p.constants {
                    *constant = f(*constant)?;
                }
            }
            Self::LazySeq(seq) => match seq {
                LazySeq::Thunk { f: thunk } => *thunk = f(*thunk)?,
                LazySeq::Realized { seq } => *seq = f(*seq)?,
                LazySeq::Cons { head, tail } => {
                    *head = f(*head)?;
                    *tail = f(*tail)?;
                }
                LazySeq::Map { f: func, source, .. } => {
                    *func = f(*func)?;
                    *source = f(*source)?;
                }
                LazySeq::Filter { pred, source, .. } => {
                    *pred = f(*pred)?;
                    *source = f(*source)?;
                }
                LazySeq::Concat { sources } => {
                    for s in sources {
                        *s = f(*s)?;
                    }
                }
                LazySeq::Iterate { f: func, current } => {
                    *func = f(*func)?;
                    *current = f(*current)?;
                }
                LazySeq::Repeat { value, .. } => *value = f(*value)?,
                LazySeq::Cycle { source, .. } => *source = f(*source)?,
                LazySeq::Range { .. } => {}
                LazySeq::Take { source, .. } => *source = f(*source)?,
                LazySeq::Indexed { coll, .. } => *coll = f(*coll)?,
            },
            Self::Atom(a) => {
                a.value = f(a.value)?;
                for (k, w) in &mut a.watches {
                    *k = f(*k)?;
                    *w = f(*w)?;
                }
            }
            Self::Delay(d) => match &mut d.state {
                DelayState::Pending(thunk) => *thunk = f(*thunk)?,
                DelayState::Realized(v) => *v = f(*v)?,
            },
            Self::Volatile(v) => v.value = f(v.value)?,
            Self::Promise(p) => {
                if let Some(v) = &mut p.value {
                    *v = f(*v)?;
                }
            }
            Self::Reduced(v) => *v = f(*v)?,
            Self::Transient(Transient::Vector(items)) => {
                for item in items {
                    *item = f(*item)?;
                }
            }
            Self::Transient(Transient::Map(entries)) => {
                for (_, k, v) in entries {
                    *k = f(*k)?;
                    *v = f(*v)?;
                }
            }
            Self::Transient(Transient::Set(entries)) => {
                for (_, e) in entries {
                    *e = f(*e)?;
                }
            }
            Self::Transient(Transient::Spent) => {}
        }
        Ok(())
    }
}

/// Counts of live objects, for embedder introspection and tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub live_scratch: usize,
    pub live_persistent: usize,
    pub free_persistent_slots: usize,
    /// Live persistent objects by variant name, deterministic order.
    pub by_type: BTreeMap<&'static str, usize>,
}

/// The two-zone heap.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    scratch: Vec<HeapData>,
    persistent: Vec<Option<HeapData>>,
    free_persistent: Vec<u32>,
    tracker: T,
    /// Bytes allocated into the persistent zone since the last collection.
    gc_pressure: usize,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            scratch: Vec::with_capacity(256),
            persistent: Vec::with_capacity(256),
            free_persistent: Vec::new(),
            tracker,
            gc_pressure: 0,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates into the scratch zone.
    pub fn alloc(&mut self, data: HeapData) -> RunResult<HeapId> {
        self.tracker.on_allocate(data.estimate_size())?;
        let id = HeapId::scratch(self.scratch.len());
        self.scratch.push(data);
        Ok(id)
    }

    /// Allocates into the persistent zone.
    pub fn alloc_persistent(&mut self, data: HeapData) -> RunResult<HeapId> {
        let size = data.estimate_size();
        self.tracker.on_allocate(size)?;
        self.gc_pressure += size;
        if let Some(index) = self.free_persistent.pop() {
            self.persistent[index as usize] = Some(data);
            Ok(HeapId::persistent(index as usize))
        } else {
            let id = HeapId::persistent(self.persistent.len());
            self.persistent.push(Some(data));
            Ok(id)
        }
    }

    /// # Panics
    /// Panics when the id points at a reset scratch slot or a swept
    /// persistent slot; reaching either is an engine bug.
    pub fn get(&self, id: HeapId) -> &HeapData {
        if id.is_persistent() {
            self.persistent[id.index()]
                .as_ref()
                .expect("persistent object accessed after sweep")
        } else {
            &self.scratch[id.index()]
        }
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        if id.is_persistent() {
            self.persistent[id.index()]
                .as_mut()
                .expect("persistent object accessed after sweep")
        } else {
            &mut self.scratch[id.index()]
        }
    }

    /// Swaps the slot content with a placeholder, for in-place rebuilds.
    pub fn take(&mut self, id: HeapId) -> HeapData {
        std::mem::replace(self.get_mut(id), HeapData::Transient(Transient::Spent))
    }

    pub fn put_back(&mut self, id: HeapId, data: HeapData) {
        *self.get_mut(id) = data;
    }

    /// Drops the entire scratch zone. Runs between top-level expressions.
    pub fn reset_scratch(&mut self) {
        for data in &self.scratch {
            self.tracker.on_free(data.estimate_size());
        }
        self.scratch.clear();
    }

    /// Bytes allocated persistently since the last collection.
    pub fn gc_pressure(&self) -> usize {
        self.gc_pressure
    }

    pub fn stats(&self) -> HeapStats {
        let mut by_type = BTreeMap::new();
        for slot in self.persistent.iter().flatten() {
            *by_type.entry(slot.variant_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_scratch: self.scratch.len(),
            live_persistent: self.persistent.iter().flatten().count(),
            free_persistent_slots: self.free_persistent.len(),
            by_type,
        }
    }

    /// Deep-clones a value graph into the persistent zone.
    ///
    /// Persistent refs are returned unchanged (the persistent zone never
    /// points into scratch, so their subgraphs are already safe). Scratch
    /// refs are copied recursively; `memo` maps old ids to new ids so shared
    /// structure and cycles (mutually recursive closures) clone once.
    pub fn deep_clone_persistent(
        &mut self,
        value: Value,
        memo: &mut AHashMap<HeapId, HeapId>,
    ) -> RunResult<Value> {
        let Value::Ref(id) = value else {
            return Ok(value);
        };
        if id.is_persistent() {
            return Ok(value);
        }
        if let Some(new_id) = memo.get(&id) {
            return Ok(Value::Ref(*new_id));
        }
        let mut data = self.get(id).clone();
        // Reserve the slot before rewriting children so cycles resolve to it.
        let new_id = self.alloc_persistent(HeapData::Transient(Transient::Spent))?;
        memo.insert(id, new_id);
        data.rewrite_values(|child| self.deep_clone_persistent(child, memo))?;
        self.put_back(new_id, data);
        Ok(Value::Ref(new_id))
    }

    /// Checks that no persistent object references the scratch zone.
    ///
    /// Called by the arena-safety tests after `reset_scratch`.
    pub fn debug_validate(&self) -> Result<(), String> {
        for (index, slot) in self.persistent.iter().enumerate() {
            let Some(data) = slot else { continue };
            let mut bad = None;
            data.for_each_value(|v| {
                if let Value::Ref(child) = v
                    && !child.is_persistent()
                    && bad.is_none()
                {
                    bad = Some(child);
                }
            });
            if let Some(child) = bad {
                return Err(format!(
                    "persistent object {index} ({}) holds scratch ref {child:?}",
                    data.variant_name()
                ));
            }
        }
        Ok(())
    }
}

/// Mark-sweep collection over the persistent zone and the function registry.
///
/// Roots are every value reachable from the environment: var roots, dynamic
/// binding frames, the `isa?` hierarchy, and data readers. Marking traverses
/// heap children, closure captures (which pull in their function definitions,
/// whose node-tree constants and compiled protos are traced in turn).
///
/// Returns the number of swept heap slots.
pub(crate) fn collect_garbage<T: ResourceTracker>(
    heap: &mut Heap<T>,
    env: &Env,
    fns: &mut FnRegistry,
) -> usize {
    let mut heap_marks = vec![false; heap.persistent.len()];
    let mut fn_marks = vec![false; fns.len()];
    let mut worklist: Vec<Value> = env.iter_roots().collect();

    while let Some(value) = worklist.pop() {
        match value {
            Value::Ref(id) => {
                if !id.is_persistent() {
                    // Scratch is reset before collection; nothing to trace.
                    continue;
                }
                if heap_marks[id.index()] {
                    continue;
                }
                heap_marks[id.index()] = true;
                let data = heap.persistent[id.index()]
                    .as_ref()
                    .expect("marked slot is live");
                data.for_each_value(|child| worklist.push(child));
                if let HeapData::Fn(closure) = data {
                    mark_fn(closure.fn_id, &mut fn_marks, fns, &mut worklist);
                }
            }
            Value::Var(id) => {
                let var = env.var(id);
                worklist.push(var.root);
                if let Some(meta) = var.meta {
                    worklist.push(meta);
                }
                if let Some(arglists) = var.arglists {
                    worklist.push(arglists);
                }
                for &(k, w) in &var.watches {
                    worklist.push(k);
                    worklist.push(w);
                }
            }
            _ => {}
        }
    }

    let mut swept = 0;
    for index in 0..heap.persistent.len() {
        if heap.persistent[index].is_some() && !heap_marks[index] {
            let data = heap.persistent[index].take().expect("slot is live");
            heap.tracker.on_free(data.estimate_size());
            heap.free_persistent
                .push(u32::try_from(index).expect("heap index fits u32"));
            swept += 1;
        }
    }
    fns.sweep(&fn_marks);
    heap.gc_pressure = 0;
    swept
}

fn mark_fn(id: FnId, fn_marks: &mut Vec<bool>, fns: &FnRegistry, worklist: &mut Vec<Value>) {
    if fn_marks.get(id.index()).copied().unwrap_or(true) {
        return;
    }
    fn_marks[id.index()] = true;
    let def = fns.get(id);
    for arity in &def.arities {
        arity.body.for_each_constant(&mut |v| worklist.push(v));
        arity.body.for_each_fn_id(&mut |nested| {
            mark_fn(nested, fn_marks, fns, worklist);
        });
    }
    if let Some(protos) = fns.compiled(id) {
        for &proto in protos {
            worklist.push(Value::Ref(proto));
        }
    }
}
