//! Multimethods, protocols, and the `isa?` hierarchy.
//!
//! Installation helpers here are shared by both backends: the tree walker
//! calls them from `Defmulti`/`Defmethod`/`Defprotocol`/`ExtendType` nodes
//! and the VM from the corresponding opcodes.

use ahash::AHashMap;

use super::{Builtin, Caller, EvalCtx, call_any, check_arity, coll};
use crate::{
    env::VarId,
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StringId, SymbolId},
    resource::ResourceTracker,
    types::{MultiFn, Protocol, ProtocolFn},
    value::{TypeKw, Value, value_eq},
};

pub(super) fn call<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Isa => {
            check_arity(name, args, 2, Some(2))?;
            Ok(Value::Bool(isa(ctx, args[0], args[1])))
        }
        Builtin::Derive => {
            check_arity(name, args, 2, Some(2))?;
            let mut memo = AHashMap::new();
            let child = ctx.heap.deep_clone_persistent(args[0], &mut memo)?;
            let parent = ctx.heap.deep_clone_persistent(args[1], &mut memo)?;
            ctx.env.derive(child, parent);
            Ok(Value::Nil)
        }
        Builtin::Type => {
            check_arity(name, args, 1, Some(1))?;
            let kw: &'static str = args[0].type_keyword(ctx.heap).into();
            Ok(Value::Keyword(ctx.interns.intern_keyword(None, kw)))
        }
        Builtin::Satisfies => {
            check_arity(name, args, 2, Some(2))?;
            let protocol_id = protocol_id(ctx, args[0])?;
            let type_kw = args[1].type_keyword(ctx.heap);
            let HeapData::Protocol(protocol) = ctx.heap.get(protocol_id) else {
                return Err(RunError::internal("protocol_id returned a non-protocol"));
            };
            Ok(Value::Bool(protocol.impls.contains_key(&type_kw)))
        }
        Builtin::Extends => {
            check_arity(name, args, 2, Some(2))?;
            let protocol_id = protocol_id(ctx, args[0])?;
            let type_kw = type_kw_arg(ctx, args[1])?;
            let HeapData::Protocol(protocol) = ctx.heap.get(protocol_id) else {
                return Err(RunError::internal("protocol_id returned a non-protocol"));
            };
            Ok(Value::Bool(protocol.impls.contains_key(&type_kw)))
        }
        Builtin::Methods => {
            check_arity(name, args, 1, Some(1))?;
            let id = multifn_id(ctx, args[0])?;
            let HeapData::MultiFn(multi) = ctx.heap.get(id) else {
                return Err(RunError::internal("multifn_id returned a non-multifn"));
            };
            let pairs: Vec<(Value, Value)> = multi.methods.clone();
            coll::map_from_pairs(ctx, &pairs)
        }
        Builtin::PreferMethod => {
            check_arity(name, args, 3, Some(3))?;
            let id = multifn_id(ctx, args[0])?;
            let mut memo = AHashMap::new();
            let winner = ctx.heap.deep_clone_persistent(args[1], &mut memo)?;
            let loser = ctx.heap.deep_clone_persistent(args[2], &mut memo)?;
            let HeapData::MultiFn(multi) = ctx.heap.get_mut(id) else {
                return Err(RunError::internal("multifn_id returned a non-multifn"));
            };
            multi.prefers.push((winner, loser));
            Ok(Value::Nil)
        }
        _ => {
            let _ = caller;
            Err(RunError::internal(format!("{name} routed to poly::call")))
        }
    }
}

/// Transitive `isa?`: equality, or a hierarchy path from child to parent.
pub(crate) fn isa<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, child: Value, parent: Value) -> bool {
    if value_eq(child, parent, ctx.heap, ctx.interns) {
        return true;
    }
    let mut frontier = vec![child];
    let mut steps = 0;
    while let Some(current) = frontier.pop() {
        steps += 1;
        if steps > 10_000 {
            // Cyclic hierarchies terminate rather than loop.
            return false;
        }
        for &(edge_child, edge_parent) in &ctx.env.hierarchy {
            if value_eq(edge_child, current, ctx.heap, ctx.interns) {
                if value_eq(edge_parent, parent, ctx.heap, ctx.interns) {
                    return true;
                }
                frontier.push(edge_parent);
            }
        }
    }
    false
}

fn multifn_id<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> RunResult<HeapId> {
    let value = match value {
        Value::Var(var) => ctx.env.deref_var(var),
        other => other,
    };
    match value {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::MultiFn(_)) => Ok(id),
        other => Err(RunError::type_error(format!(
            "expected a multimethod, found {}",
            other.describe(ctx.heap)
        ))),
    }
}

fn protocol_id<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> RunResult<HeapId> {
    let value = match value {
        Value::Var(var) => ctx.env.deref_var(var),
        other => other,
    };
    match value {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Protocol(_)) => Ok(id),
        other => Err(RunError::type_error(format!(
            "expected a protocol, found {}",
            other.describe(ctx.heap)
        ))),
    }
}

fn type_kw_arg<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> RunResult<TypeKw> {
    let name = match value {
        Value::Symbol(id) => ctx.interns.symbol_name(id).to_owned(),
        Value::Keyword(id) => ctx.interns.keyword_name(id).to_owned(),
        other => {
            return Err(RunError::type_error(format!(
                "expected a type name, found {}",
                other.describe(ctx.heap)
            )));
        }
    };
    TypeKw::from_type_name(&name)
        .ok_or_else(|| RunError::type_error(format!("unknown type name {name}")))
}

/// Calls a multimethod: dispatch fn, then exact match, hierarchy walk with
/// preference tie-breaking, then `:default`.
pub(crate) fn call_multifn<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    id: HeapId,
    args: &[Value],
) -> RunResult<Value> {
    let HeapData::MultiFn(multi) = ctx.heap.get(id) else {
        return Err(RunError::internal("call_multifn on a non-multifn"));
    };
    let dispatch_fn = multi.dispatch_fn;
    let methods = multi.methods.clone();
    let prefers = multi.prefers.clone();
    let multi_name = ctx.interns.symbol_text(multi.name);

    let dispatch_value = call_any(ctx, caller, dispatch_fn, args)?;

    // 1. Exact match on the dispatch value.
    for &(key, method) in &methods {
        if value_eq(key, dispatch_value, ctx.heap, ctx.interns) {
            return call_any(ctx, caller, method, args);
        }
    }

    // 2. Hierarchy matches, tie-broken by the preference table.
    let mut candidates: Vec<(Value, Value)> = methods
        .iter()
        .filter(|&&(key, _)| isa(ctx, dispatch_value, key))
        .copied()
        .collect();
    if candidates.len() > 1 {
        let all = candidates.clone();
        candidates.retain(|&(key, _)| {
            all.iter().all(|&(other, _)| {
                value_eq(key, other, ctx.heap, ctx.interns)
                    || prefers
                        .iter()
                        .any(|&(winner, loser)| {
                            value_eq(winner, key, ctx.heap, ctx.interns)
                                && value_eq(loser, other, ctx.heap, ctx.interns)
                        })
                    || !isa(ctx, dispatch_value, other)
            })
        });
    }
    match candidates.len() {
        1 => {
            let (_, method) = candidates[0];
            return call_any(ctx, caller, method, args);
        }
        n if n > 1 => {
            return Err(RunError::type_error(format!(
                "multiple methods in multimethod '{multi_name}' match dispatch value"
            )));
        }
        _ => {}
    }

    // 3. The :default method.
    let default_kw = Value::Keyword(ctx.interns.intern_keyword(None, "default"));
    for &(key, method) in &methods {
        if value_eq(key, default_kw, ctx.heap, ctx.interns) {
            return call_any(ctx, caller, method, args);
        }
    }
    Err(RunError::type_error(format!(
        "no method in multimethod '{multi_name}' for dispatch value"
    )))
}

/// Calls a protocol method: dispatch on the first argument's type keyword.
pub(crate) fn call_protocol_fn<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    id: HeapId,
    args: &[Value],
) -> RunResult<Value> {
    let HeapData::ProtocolFn(pfn) = ctx.heap.get(id) else {
        return Err(RunError::internal("call_protocol_fn on a non-protocol-fn"));
    };
    let (protocol_var, method) = (pfn.protocol_var, pfn.method);
    let method_name = ctx.interns.get_str(method).to_owned();
    if args.is_empty() {
        return Err(RunError::arity_error(format!(
            "protocol method {method_name} requires at least a receiver"
        )));
    }
    let protocol_value = ctx.env.deref_var(protocol_var);
    let Value::Ref(protocol_id) = protocol_value else {
        return Err(RunError::type_error(format!(
            "protocol var for {method_name} no longer holds a protocol"
        )));
    };
    let HeapData::Protocol(protocol) = ctx.heap.get(protocol_id) else {
        return Err(RunError::type_error(format!(
            "protocol var for {method_name} no longer holds a protocol"
        )));
    };
    let type_kw = args[0].type_keyword(ctx.heap);
    let Some(implementation) = protocol.lookup(type_kw, method) else {
        let protocol_name = ctx.interns.symbol_text(protocol.name);
        let type_name: &'static str = type_kw.into();
        return Err(RunError::type_error(format!(
            "no implementation of method {method_name} of protocol {protocol_name} for type {type_name}"
        )));
    };
    call_any(ctx, caller, implementation, args)
}

// --- installation helpers shared by both backends ---

/// `defmulti`: installs a fresh multimethod in the var.
pub(crate) fn install_multifn<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    var: VarId,
    name: SymbolId,
    dispatch_fn: Value,
) -> RunResult<Value> {
    let mut memo = AHashMap::new();
    let dispatch_fn = ctx.heap.deep_clone_persistent(dispatch_fn, &mut memo)?;
    let multi = ctx
        .heap
        .alloc_persistent(HeapData::MultiFn(MultiFn::new(name, dispatch_fn)))?;
    ctx.env.var_mut(var).root = Value::Ref(multi);
    Ok(Value::Var(var))
}

/// `defmethod`: registers (or replaces) one method of an existing multimethod.
pub(crate) fn install_method<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    var: VarId,
    dispatch_value: Value,
    method: Value,
) -> RunResult<Value> {
    let root = ctx.env.deref_var(var);
    let id = multifn_id(ctx, root)?;
    let mut memo = AHashMap::new();
    let dispatch_value = ctx.heap.deep_clone_persistent(dispatch_value, &mut memo)?;
    let method = ctx.heap.deep_clone_persistent(method, &mut memo)?;
    let HeapData::MultiFn(multi) = ctx.heap.get(id) else {
        return Err(RunError::internal("multifn vanished during defmethod"));
    };
    let existing = multi
        .methods
        .iter()
        .position(|&(key, _)| value_eq(key, dispatch_value, ctx.heap, ctx.interns));
    let HeapData::MultiFn(multi) = ctx.heap.get_mut(id) else {
        return Err(RunError::internal("multifn vanished during defmethod"));
    };
    match existing {
        Some(index) => multi.methods[index] = (dispatch_value, method),
        None => multi.methods.push((dispatch_value, method)),
    }
    Ok(root)
}

/// `defprotocol`: installs the protocol value and one dispatching var per
/// method signature.
pub(crate) fn install_protocol<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    var: VarId,
    name: SymbolId,
    sigs: &[(StringId, u8)],
    method_vars: &[VarId],
) -> RunResult<Value> {
    let protocol = ctx
        .heap
        .alloc_persistent(HeapData::Protocol(Protocol::new(name, sigs.to_vec())))?;
    ctx.env.var_mut(var).root = Value::Ref(protocol);
    for (&(method_name, _), &method_var) in sigs.iter().zip(method_vars) {
        let pfn = ctx.heap.alloc_persistent(HeapData::ProtocolFn(ProtocolFn {
            protocol_var: var,
            method: method_name,
        }))?;
        ctx.env.var_mut(method_var).root = Value::Ref(pfn);
    }
    Ok(Value::Ref(protocol))
}

/// `extend-type`: installs one method implementation for a type.
pub(crate) fn extend_type_method<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    protocol_var: VarId,
    type_kw: TypeKw,
    method_name: StringId,
    method: Value,
) -> RunResult<()> {
    let root = ctx.env.deref_var(protocol_var);
    let id = protocol_id(ctx, root)?;
    let mut memo = AHashMap::new();
    let method = ctx.heap.deep_clone_persistent(method, &mut memo)?;
    let HeapData::Protocol(protocol) = ctx.heap.get_mut(id) else {
        return Err(RunError::internal("protocol vanished during extend-type"));
    };
    protocol
        .impls
        .entry(type_kw)
        .or_default()
        .insert(method_name, method);
    Ok(())
}

/// Resolves a type name symbol in `extend-type` position.
pub(crate) fn resolve_type_name<T: ResourceTracker>(
    ctx: &EvalCtx<'_, T>,
    value: Value,
) -> RunResult<TypeKw> {
    type_kw_arg(ctx, value)
}
