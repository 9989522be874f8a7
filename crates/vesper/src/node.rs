//! The analyzed node tree.
//!
//! Nodes are resolved and scope-checked: symbols have become `VarRef`s or
//! slot-indexed `LocalRef`s, macros are expanded, destructuring is desugared
//! into `Let` chains, and every `fn` body has been extracted into the
//! function registry. Slot indices are absolute within the enclosing
//! function (or top-level) frame.

use crate::{
    env::VarId,
    form::Loc,
    function::FnId,
    intern::{StringId, SymbolId},
    value::{TypeKw, Value},
};

/// One `let`/`loop` binding: target slot, source name, init expression.
#[derive(Debug)]
pub(crate) struct Binding {
    pub slot: u16,
    pub name: SymbolId,
    pub init: Node,
}

/// A `catch` clause: the slot the thrown value binds to, and the handler body.
#[derive(Debug)]
pub(crate) struct CatchClause {
    pub slot: u16,
    pub name: SymbolId,
    pub body: Box<Node>,
}

/// An analyzed expression.
#[derive(Debug)]
pub(crate) enum Node {
    Constant(Value),
    VarRef { var: VarId, loc: Loc },
    LocalRef { name: SymbolId, index: u16, loc: Loc },
    If {
        test: Box<Node>,
        then: Box<Node>,
        els: Option<Box<Node>>,
    },
    Do { stmts: Vec<Node> },
    Let { bindings: Vec<Binding>, body: Box<Node> },
    Letfn {
        /// `(slot, name, fn)` for each mutually recursive binding.
        bindings: Vec<(u16, SymbolId, FnId)>,
        body: Box<Node>,
    },
    Loop {
        bindings: Vec<Binding>,
        body: Box<Node>,
    },
    Recur {
        args: Vec<Node>,
        /// First slot of the recur target's bindings.
        slot_base: u16,
        loc: Loc,
    },
    Fn { fn_id: FnId },
    Call {
        f: Box<Node>,
        args: Vec<Node>,
        loc: Loc,
    },
    Def {
        var: VarId,
        init: Option<Box<Node>>,
        is_macro: bool,
    },
    Quote { value: Value },
    Throw { expr: Box<Node>, loc: Loc },
    Try {
        body: Box<Node>,
        catch: Option<CatchClause>,
        finally: Option<Box<Node>>,
    },
    Defmulti {
        var: VarId,
        name: SymbolId,
        dispatch: Box<Node>,
    },
    Defmethod {
        var: VarId,
        dispatch_val: Box<Node>,
        method: Box<Node>,
        loc: Loc,
    },
    Defprotocol {
        var: VarId,
        name: SymbolId,
        /// `(method name, arity)` signatures.
        sigs: Vec<(StringId, u8)>,
        /// One var per method, holding the dispatching `ProtocolFn`.
        method_vars: Vec<VarId>,
    },
    ExtendType {
        type_kw: TypeKw,
        /// Per protocol: the protocol's var and its `(method name, fn)` impls.
        extensions: Vec<(VarId, Vec<(StringId, Node)>)>,
        loc: Loc,
    },
    LazySeq {
        /// Nullary fn wrapping the body.
        fn_id: FnId,
    },
}

impl Node {
    /// Visits every constant `Value` embedded in this tree (not descending
    /// into function bodies; those are traced through the registry).
    pub fn for_each_constant(&self, f: &mut dyn FnMut(Value)) {
        self.walk(&mut |node| match node {
            Self::Constant(v) | Self::Quote { value: v } => f(*v),
            _ => {}
        });
    }

    /// Visits every function id referenced by this tree.
    pub fn for_each_fn_id(&self, f: &mut dyn FnMut(FnId)) {
        self.walk(&mut |node| match node {
            Self::Fn { fn_id } | Self::LazySeq { fn_id } => f(*fn_id),
            Self::Letfn { bindings, .. } => {
                for &(_, _, fn_id) in bindings {
                    f(fn_id);
                }
            }
            _ => {}
        });
    }

    fn walk(&self, f: &mut dyn FnMut(&Self)) {
        f(self);
        match self {
            Self::Constant(_)
            | Self::VarRef { .. }
            | Self::LocalRef { .. }
            | Self::Quote { .. }
            | Self::Fn { .. }
            | Self::LazySeq { .. } => {}
            Self::If { test, then, els } => {
                test.walk(f);
                then.walk(f);
                if let Some(els) = els {
                    els.walk(f);
                }
            }
            Self::Do { stmts } => {
                for stmt in stmts {
                    stmt.walk(f);
                }
            }
            Self::Let { bindings, body } | Self::Loop { bindings, body } => {
                for binding in bindings {
                    binding.init.walk(f);
                }
                body.walk(f);
            }
            Self::Letfn { body, .. } => body.walk(f),
            Self::Recur { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            Self::Call { f: callee, args, .. } => {
                callee.walk(f);
                for arg in args {
                    arg.walk(f);
                }
            }
            Self::Def { init, .. } => {
                if let Some(init) = init {
                    init.walk(f);
                }
            }
            Self::Throw { expr, .. } => expr.walk(f),
            Self::Try { body, catch, finally } => {
                body.walk(f);
                if let Some(catch) = catch {
                    catch.body.walk(f);
                }
                if let Some(finally) = finally {
                    finally.walk(f);
                }
            }
            Self::Defmulti { dispatch, .. } => dispatch.walk(f),
            Self::Defmethod {
                dispatch_val, method, ..
            } => {
                dispatch_val.walk(f);
                method.walk(f);
            }
            Self::Defprotocol { .. } => {}
            Self::ExtendType { extensions, .. } => {
                for (_, methods) in extensions {
                    for (_, node) in methods {
                        node.walk(f);
                    }
                }
            }
        }
    }
}
