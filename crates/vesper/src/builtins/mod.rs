//! The builtin catalog and call dispatch.
//!
//! Builtins are enum variants dispatched through [`Builtin::call`] with a
//! narrow context: the [`EvalCtx`] bundle (heap, interns, env, function
//! registry, print writer, tracer) and a [`Caller`] — the active backend's
//! hook for invoking user closures. This is the whole interface between the
//! evaluator and the host function library; adding a builtin never touches
//! either backend.
//!
//! [`call_any`] is the shared call protocol: it resolves every callable
//! shape (builtin, closure, partial, comp, keyword, collection, multimethod,
//! protocol fn, var) down to either a builtin invocation or a closure call
//! delegated to the backend.

mod arith;
pub(crate) mod coll;
mod macros;
mod nsops;
pub(crate) mod poly;
mod printing;
mod re;
mod refs;
pub(crate) mod seqs;
pub(crate) mod strings;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    env::Env,
    error::{ErrorKind, RunError, RunResult},
    function::FnRegistry,
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::{EvalTracer, TraceEvent},
    value::{Value, value_eq, value_hash},
};

/// Everything a builtin may touch.
pub(crate) struct EvalCtx<'a, T: ResourceTracker> {
    pub heap: &'a mut Heap<T>,
    pub interns: &'a mut Interns,
    pub env: &'a mut Env,
    pub fns: &'a mut FnRegistry,
    pub print: &'a mut dyn PrintWriter,
    pub tracer: &'a mut dyn EvalTracer,
}

/// The active backend's closure-invocation hook.
///
/// Builtins like `map` and `swap!` call user functions through this without
/// knowing whether the tree walker or the VM is running.
pub(crate) trait Caller<T: ResourceTracker> {
    fn call_closure(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        closure: HeapId,
        args: &[Value],
    ) -> RunResult<Value>;
}

/// Every builtin function and native macro expander.
///
/// The strum serialization is the name interned into the core namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub(crate) enum Builtin {
    // --- arithmetic and comparison ---
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "mod")]
    Mod,
    #[strum(serialize = "quot")]
    Quot,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "inc")]
    Inc,
    #[strum(serialize = "dec")]
    Dec,
    #[strum(serialize = "max")]
    Max,
    #[strum(serialize = "min")]
    Min,
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "not=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "compare")]
    Compare,

    // --- predicates ---
    #[strum(serialize = "nil?")]
    IsNil,
    #[strum(serialize = "some?")]
    IsSome,
    #[strum(serialize = "true?")]
    IsTrue,
    #[strum(serialize = "false?")]
    IsFalse,
    #[strum(serialize = "number?")]
    IsNumber,
    #[strum(serialize = "int?")]
    IsInt,
    #[strum(serialize = "integer?")]
    IsInteger,
    #[strum(serialize = "float?")]
    IsFloat,
    #[strum(serialize = "string?")]
    IsString,
    #[strum(serialize = "keyword?")]
    IsKeyword,
    #[strum(serialize = "symbol?")]
    IsSymbol,
    #[strum(serialize = "char?")]
    IsChar,
    #[strum(serialize = "boolean?")]
    IsBoolean,
    #[strum(serialize = "fn?")]
    IsFn,
    #[strum(serialize = "list?")]
    IsList,
    #[strum(serialize = "vector?")]
    IsVector,
    #[strum(serialize = "map?")]
    IsMap,
    #[strum(serialize = "set?")]
    IsSet,
    #[strum(serialize = "coll?")]
    IsColl,
    #[strum(serialize = "seq?")]
    IsSeq,
    #[strum(serialize = "empty?")]
    IsEmpty,
    #[strum(serialize = "contains?")]
    Contains,
    #[strum(serialize = "zero?")]
    IsZero,
    #[strum(serialize = "pos?")]
    IsPos,
    #[strum(serialize = "neg?")]
    IsNeg,
    #[strum(serialize = "even?")]
    IsEven,
    #[strum(serialize = "odd?")]
    IsOdd,

    // --- collections ---
    #[strum(serialize = "count")]
    Count,
    #[strum(serialize = "nth")]
    Nth,
    #[strum(serialize = "get")]
    Get,
    #[strum(serialize = "assoc")]
    Assoc,
    #[strum(serialize = "dissoc")]
    Dissoc,
    #[strum(serialize = "conj")]
    Conj,
    #[strum(serialize = "disj")]
    Disj,
    #[strum(serialize = "cons")]
    Cons,
    #[strum(serialize = "first")]
    First,
    #[strum(serialize = "rest")]
    Rest,
    #[strum(serialize = "next")]
    Next,
    #[strum(serialize = "seq")]
    Seq,
    #[strum(serialize = "keys")]
    Keys,
    #[strum(serialize = "vals")]
    Vals,
    #[strum(serialize = "peek")]
    Peek,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "vector")]
    Vector,
    #[strum(serialize = "hash-map")]
    HashMap,
    #[strum(serialize = "hash-set")]
    HashSet,
    #[strum(serialize = "vec")]
    Vec,
    #[strum(serialize = "set")]
    Set,
    #[strum(serialize = "into")]
    Into,
    #[strum(serialize = "reverse")]
    Reverse,
    #[strum(serialize = "sort")]
    Sort,
    #[strum(serialize = "subvec")]
    Subvec,

    // --- transients ---
    #[strum(serialize = "transient")]
    Transient,
    #[strum(serialize = "persistent!")]
    PersistentBang,
    #[strum(serialize = "conj!")]
    ConjBang,
    #[strum(serialize = "assoc!")]
    AssocBang,
    #[strum(serialize = "dissoc!")]
    DissocBang,
    #[strum(serialize = "disj!")]
    DisjBang,

    // --- sequences ---
    #[strum(serialize = "map")]
    MapFn,
    #[strum(serialize = "filter")]
    Filter,
    #[strum(serialize = "remove")]
    Remove,
    #[strum(serialize = "reduce")]
    Reduce,
    #[strum(serialize = "reduce-kv")]
    ReduceKv,
    #[strum(serialize = "take")]
    Take,
    #[strum(serialize = "drop")]
    Drop,
    #[strum(serialize = "range")]
    Range,
    #[strum(serialize = "iterate")]
    Iterate,
    #[strum(serialize = "repeat")]
    Repeat,
    #[strum(serialize = "cycle")]
    Cycle,
    #[strum(serialize = "concat")]
    Concat,
    #[strum(serialize = "doall")]
    Doall,
    #[strum(serialize = "dorun")]
    Dorun,
    #[strum(serialize = "apply")]
    Apply,
    #[strum(serialize = "partial")]
    Partial,
    #[strum(serialize = "comp")]
    Comp,
    #[strum(serialize = "interleave")]
    Interleave,
    #[strum(serialize = "distinct")]
    Distinct,
    #[strum(serialize = "last")]
    Last,
    #[strum(serialize = "butlast")]
    Butlast,

    // --- strings ---
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "pr-str")]
    PrStr,
    #[strum(serialize = "subs")]
    Subs,
    #[strum(serialize = "name")]
    Name,
    #[strum(serialize = "namespace")]
    NamespaceOf,
    #[strum(serialize = "keyword")]
    Keyword,
    #[strum(serialize = "symbol")]
    Symbol,
    #[strum(serialize = "upper-case")]
    UpperCase,
    #[strum(serialize = "lower-case")]
    LowerCase,
    #[strum(serialize = "trim")]
    Trim,
    #[strum(serialize = "split")]
    Split,
    #[strum(serialize = "join")]
    Join,
    #[strum(serialize = "replace")]
    Replace,
    #[strum(serialize = "includes?")]
    Includes,

    // --- reference cells ---
    #[strum(serialize = "atom")]
    Atom,
    #[strum(serialize = "deref")]
    Deref,
    #[strum(serialize = "reset!")]
    ResetBang,
    #[strum(serialize = "swap!")]
    SwapBang,
    #[strum(serialize = "add-watch")]
    AddWatch,
    #[strum(serialize = "remove-watch")]
    RemoveWatch,
    #[strum(serialize = "delay*")]
    DelayStar,
    #[strum(serialize = "force")]
    Force,
    #[strum(serialize = "realized?")]
    IsRealized,
    #[strum(serialize = "volatile!")]
    VolatileBang,
    #[strum(serialize = "vreset!")]
    VresetBang,
    #[strum(serialize = "vswap!")]
    VswapBang,
    #[strum(serialize = "promise")]
    Promise,
    #[strum(serialize = "deliver")]
    Deliver,
    #[strum(serialize = "reduced")]
    Reduced,
    #[strum(serialize = "reduced?")]
    IsReduced,

    // --- regex ---
    #[strum(serialize = "re-pattern")]
    RePattern,
    #[strum(serialize = "re-find")]
    ReFind,
    #[strum(serialize = "re-matches")]
    ReMatches,
    #[strum(serialize = "re-seq")]
    ReSeq,
    #[strum(serialize = "re-matcher")]
    ReMatcher,
    #[strum(serialize = "re-groups")]
    ReGroups,

    // --- polymorphism ---
    #[strum(serialize = "isa?")]
    Isa,
    #[strum(serialize = "derive")]
    Derive,
    #[strum(serialize = "type")]
    Type,
    #[strum(serialize = "satisfies?")]
    Satisfies,
    #[strum(serialize = "extends?")]
    Extends,
    #[strum(serialize = "methods")]
    Methods,
    #[strum(serialize = "prefer-method")]
    PreferMethod,

    // --- namespaces and vars ---
    #[strum(serialize = "in-ns")]
    InNs,
    #[strum(serialize = "create-ns")]
    CreateNs,
    #[strum(serialize = "find-ns")]
    FindNs,
    #[strum(serialize = "ns-name")]
    NsNameOf,
    #[strum(serialize = "all-ns")]
    AllNs,
    #[strum(serialize = "alias")]
    Alias,
    #[strum(serialize = "intern")]
    Intern,
    #[strum(serialize = "resolve")]
    Resolve,
    #[strum(serialize = "push-thread-bindings")]
    PushThreadBindings,
    #[strum(serialize = "pop-thread-bindings")]
    PopThreadBindings,

    // --- printing and misc ---
    #[strum(serialize = "print")]
    Print,
    #[strum(serialize = "println")]
    Println,
    #[strum(serialize = "pr")]
    Pr,
    #[strum(serialize = "prn")]
    Prn,
    #[strum(serialize = "newline")]
    Newline,
    #[strum(serialize = "hash")]
    Hash,
    #[strum(serialize = "identity")]
    Identity,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "boolean")]
    Boolean,
    #[strum(serialize = "gensym")]
    Gensym,
    #[strum(serialize = "macroexpand")]
    Macroexpand,
    #[strum(serialize = "macroexpand-1")]
    Macroexpand1,
    #[strum(serialize = "read-string")]
    ReadString,
    #[strum(serialize = "meta")]
    Meta,
    #[strum(serialize = "with-meta")]
    WithMeta,
    #[strum(serialize = "assert")]
    Assert,

    // --- native macros ---
    #[strum(serialize = "defn")]
    MacroDefn,
    #[strum(serialize = "when")]
    MacroWhen,
    #[strum(serialize = "when-not")]
    MacroWhenNot,
    #[strum(serialize = "if-not")]
    MacroIfNot,
    #[strum(serialize = "and")]
    MacroAnd,
    #[strum(serialize = "or")]
    MacroOr,
    #[strum(serialize = "cond")]
    MacroCond,
    #[strum(serialize = "binding")]
    MacroBinding,
    #[strum(serialize = "dotimes")]
    MacroDotimes,
    #[strum(serialize = "->")]
    MacroThreadFirst,
    #[strum(serialize = "->>")]
    MacroThreadLast,
    #[strum(serialize = "delay")]
    MacroDelay,
}

impl Builtin {
    /// The name interned into the core namespace.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Native macros expand forms during analysis instead of being called
    /// with evaluated arguments.
    pub fn is_macro(self) -> bool {
        matches!(
            self,
            Self::MacroDefn
                | Self::MacroWhen
                | Self::MacroWhenNot
                | Self::MacroIfNot
                | Self::MacroAnd
                | Self::MacroOr
                | Self::MacroCond
                | Self::MacroBinding
                | Self::MacroDotimes
                | Self::MacroThreadFirst
                | Self::MacroThreadLast
                | Self::MacroDelay
        )
    }

    /// Every variant, for namespace bootstrap.
    pub fn all() -> &'static [Self] {
        use Builtin::*;
        &[
            Add, Sub, Mul, Div, Mod, Quot, Rem, Inc, Dec, Max, Min, Eq, NotEq, Lt, Le, Gt, Ge,
            Compare, IsNil, IsSome, IsTrue, IsFalse, IsNumber, IsInt, IsInteger, IsFloat, IsString,
            IsKeyword, IsSymbol, IsChar, IsBoolean, IsFn, IsList, IsVector, IsMap, IsSet, IsColl,
            IsSeq, IsEmpty, Contains, IsZero, IsPos, IsNeg, IsEven, IsOdd, Count, Nth, Get, Assoc,
            Dissoc, Conj, Disj, Cons, First, Rest, Next, Seq, Keys, Vals, Peek, Pop, List, Vector,
            HashMap, HashSet, Vec, Set, Into, Reverse, Sort, Subvec, Transient, PersistentBang,
            ConjBang, AssocBang, DissocBang, DisjBang, MapFn, Filter, Remove, Reduce, ReduceKv,
            Take, Drop, Range, Iterate, Repeat, Cycle, Concat, Doall, Dorun, Apply, Partial, Comp,
            Interleave, Distinct, Last, Butlast, Str, PrStr, Subs, Name, NamespaceOf, Keyword,
            Symbol, UpperCase, LowerCase, Trim, Split, Join, Replace, Includes, Atom, Deref,
            ResetBang, SwapBang, AddWatch, RemoveWatch, DelayStar, Force, IsRealized, VolatileBang,
            VresetBang, VswapBang, Promise, Deliver, Reduced, IsReduced, RePattern, ReFind,
            ReMatches, ReSeq, ReMatcher, ReGroups, Isa, Derive, Type, Satisfies, Extends, Methods,
            PreferMethod, InNs, CreateNs, FindNs, NsNameOf, AllNs, Alias, Intern, Resolve,
            PushThreadBindings, PopThreadBindings, Print, Println, Pr, Prn, Newline, Hash,
            Identity, Not, Boolean, Gensym, Macroexpand, Macroexpand1, ReadString, Meta, WithMeta,
            Assert, MacroDefn, MacroWhen, MacroWhenNot, MacroIfNot, MacroAnd, MacroOr, MacroCond,
            MacroBinding, MacroDotimes, MacroThreadFirst, MacroThreadLast, MacroDelay,
        ]
    }

    /// Calls this builtin with evaluated arguments (or, for native macros,
    /// with unevaluated forms-as-values during macro expansion).
    pub fn call<T: ResourceTracker>(
        self,
        ctx: &mut EvalCtx<'_, T>,
        caller: &mut dyn Caller<T>,
        args: &[Value],
    ) -> RunResult<Value> {
        use Builtin::*;
        match self {
            Add | Sub | Mul | Div | Mod | Quot | Rem | Inc | Dec | Max | Min | Lt | Le | Gt
            | Ge | Compare | IsZero | IsPos | IsNeg | IsEven | IsOdd => {
                arith::call(self, ctx, args)
            }
            Eq | NotEq => arith::call_equality(self, ctx, caller, args),
            IsNil | IsSome | IsTrue | IsFalse | IsNumber | IsInt | IsInteger | IsFloat
            | IsString | IsKeyword | IsSymbol | IsChar | IsBoolean | IsFn | IsList | IsVector
            | IsMap | IsSet | IsColl | IsSeq | IsEmpty | Contains => {
                coll::call_predicate(self, ctx, caller, args)
            }
            Count | Nth | Get | Assoc | Dissoc | Conj | Disj | Keys | Vals | Peek | Pop | List
            | Vector | HashMap | HashSet | Vec | Set | Into | Reverse | Sort | Subvec
            | Transient | PersistentBang | ConjBang | AssocBang | DissocBang | DisjBang => {
                coll::call(self, ctx, caller, args)
            }
            Cons | First | Rest | Next | Seq | MapFn | Filter | Remove | Reduce | ReduceKv
            | Take | Drop | Range | Iterate | Repeat | Cycle | Concat | Doall | Dorun | Apply
            | Partial | Comp | Interleave | Distinct | Last | Butlast => {
                seqs::call(self, ctx, caller, args)
            }
            Str | PrStr | Subs | Name | NamespaceOf | Keyword | Symbol | UpperCase | LowerCase
            | Trim | Split | Join | Replace | Includes => strings::call(self, ctx, caller, args),
            Atom | Deref | ResetBang | SwapBang | AddWatch | RemoveWatch | DelayStar | Force
            | IsRealized | VolatileBang | VresetBang | VswapBang | Promise | Deliver | Reduced
            | IsReduced => refs::call(self, ctx, caller, args),
            RePattern | ReFind | ReMatches | ReSeq | ReMatcher | ReGroups => {
                re::call(self, ctx, args)
            }
            Isa | Derive | Type | Satisfies | Extends | Methods | PreferMethod => {
                poly::call(self, ctx, caller, args)
            }
            InNs | CreateNs | FindNs | NsNameOf | AllNs | Alias | Intern | Resolve
            | PushThreadBindings | PopThreadBindings => nsops::call(self, ctx, args),
            Print | Println | Pr | Prn | Newline | Hash | Identity | Not | Boolean | Gensym
            | Macroexpand | Macroexpand1 | ReadString | Meta | WithMeta | Assert => {
                printing::call(self, ctx, caller, args)
            }
            MacroDefn | MacroWhen | MacroWhenNot | MacroIfNot | MacroAnd | MacroOr | MacroCond
            | MacroBinding | MacroDotimes | MacroThreadFirst | MacroThreadLast | MacroDelay => {
                macros::expand(self, ctx, args)
            }
        }
    }
}

/// Checks an argument count against an inclusive range (`None` = unbounded).
pub(crate) fn check_arity(
    name: &str,
    args: &[Value],
    min: usize,
    max: Option<usize>,
) -> RunResult<()> {
    let ok = args.len() >= min && max.is_none_or(|m| args.len() <= m);
    if ok {
        Ok(())
    } else {
        Err(RunError::arity_error(format!(
            "wrong number of args ({}) passed to {name}",
            args.len()
        )))
    }
}

/// The shared call protocol over every callable value shape.
pub(crate) fn call_any<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    f: Value,
    args: &[Value],
) -> RunResult<Value> {
    ctx.tracer.trace(TraceEvent::Call);
    match f {
        Value::Builtin(builtin) => {
            if builtin.is_macro() {
                return Err(RunError::type_error(format!(
                    "can't take the value of macro {}",
                    builtin.name()
                )));
            }
            builtin.call(ctx, caller, args).map_err(|mut err| {
                if err.frames.is_empty() {
                    err.push_frame(crate::error::RawFrame {
                        fn_name: builtin.name().to_owned(),
                        ns: Some(crate::env::CORE_NS.to_owned()),
                        loc: None,
                        is_builtin: true,
                    });
                }
                err
            })
        }
        Value::Keyword(_) => {
            check_arity("keyword lookup", args, 1, Some(2))?;
            let default = args.get(1).copied().unwrap_or(Value::Nil);
            lookup_in(ctx, args[0], f, default)
        }
        Value::Var(id) => {
            let target = ctx.env.deref_var(id);
            call_any(ctx, caller, target, args)
        }
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Fn(_) => caller.call_closure(ctx, id, args),
            HeapData::Partial(partial) => {
                let inner = partial.f;
                let mut combined = partial.args.clone();
                combined.extend_from_slice(args);
                call_any(ctx, caller, inner, &combined)
            }
            HeapData::Comp(comp) => {
                let fns = comp.fns.clone();
                let Some((last, rest)) = fns.split_last() else {
                    // (comp) is identity.
                    check_arity("comp", args, 1, Some(1))?;
                    return Ok(args[0]);
                };
                let mut value = call_any(ctx, caller, *last, args)?;
                for g in rest.iter().rev() {
                    value = call_any(ctx, caller, *g, &[value])?;
                }
                Ok(value)
            }
            HeapData::MultiFn(_) => poly::call_multifn(ctx, caller, id, args),
            HeapData::ProtocolFn(_) => poly::call_protocol_fn(ctx, caller, id, args),
            HeapData::Map(_) | HeapData::Set(_) => {
                check_arity("collection lookup", args, 1, Some(2))?;
                let default = args.get(1).copied().unwrap_or(Value::Nil);
                lookup_in(ctx, f, args[0], default)
            }
            HeapData::Vector(_) => {
                check_arity("vector lookup", args, 1, Some(1))?;
                coll::nth_value(ctx, f, args[0], None)
            }
            _ => Err(RunError::type_error(format!(
                "{} is not callable",
                f.describe(ctx.heap)
            ))),
        },
        _ => Err(RunError::type_error(format!(
            "{} is not callable",
            f.describe(ctx.heap)
        ))),
    }
}

/// Keyword/map/set lookup shared by keyword calls and collection calls.
pub(crate) fn lookup_in<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    key: Value,
    default: Value,
) -> RunResult<Value> {
    match coll {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Map(map) => {
                let hash = value_hash(key, ctx.heap, ctx.interns);
                let Some(start) = map.hash_start(hash) else {
                    return Ok(default);
                };
                for &(h, k, v) in &map.entries[start..] {
                    if h != hash {
                        break;
                    }
                    if value_eq(k, key, ctx.heap, ctx.interns) {
                        return Ok(v);
                    }
                }
                Ok(default)
            }
            HeapData::Set(set) => {
                let hash = value_hash(key, ctx.heap, ctx.interns);
                let Some(start) = set.hash_start(hash) else {
                    return Ok(default);
                };
                for &(h, e) in &set.entries[start..] {
                    if h != hash {
                        break;
                    }
                    if value_eq(e, key, ctx.heap, ctx.interns) {
                        return Ok(e);
                    }
                }
                Ok(default)
            }
            _ => Ok(default),
        },
        _ => Ok(default),
    }
}

/// Converts an internal error into the error-info map delivered to `catch`
/// scopes: `{:type <kind keyword>, :message <string>}`.
pub(crate) fn error_to_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    err: &RunError,
) -> RunResult<Value> {
    if err.kind == ErrorKind::UserException {
        return Ok(err.payload.unwrap_or(Value::Nil));
    }
    let type_kw = ctx.interns.intern_keyword(None, &err.kind.to_string());
    let message_kw = ctx.interns.intern_keyword(None, "message");
    let kw_type = ctx.interns.intern_keyword(None, "type");
    let message_id = ctx.heap.alloc(HeapData::Str(err.message.clone()))?;
    coll::map_from_pairs(
        ctx,
        &[
            (Value::Keyword(kw_type), Value::Keyword(type_kw)),
            (Value::Keyword(message_kw), Value::Ref(message_id)),
        ],
    )
}
