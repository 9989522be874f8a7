//! Reference-cell builtins: atoms, delays, volatiles, promises, reduced.

use ahash::AHashMap;

use super::{Builtin, Caller, EvalCtx, call_any, check_arity};
use crate::{
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    resource::ResourceTracker,
    types::{Atom, Delay, DelayState, LazySeq, Promise, Volatile},
    value::{Value, value_eq},
};

pub(super) fn call<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Atom => {
            check_arity(name, args, 1, Some(1))?;
            let atom = ctx.heap.alloc(HeapData::Atom(Atom {
                value: args[0],
                watches: Vec::new(),
            }))?;
            Ok(Value::Ref(atom))
        }
        Builtin::Deref => {
            check_arity(name, args, 1, Some(1))?;
            deref_value(ctx, caller, args[0])
        }
        Builtin::ResetBang => {
            check_arity(name, args, 2, Some(2))?;
            let id = atom_id(ctx, args[0])?;
            store_atom(ctx, caller, id, args[1])
        }
        Builtin::SwapBang => {
            check_arity(name, args, 2, None)?;
            let id = atom_id(ctx, args[0])?;
            let HeapData::Atom(atom) = ctx.heap.get(id) else {
                return Err(RunError::internal("atom_id returned a non-atom"));
            };
            let old = atom.value;
            let mut call_args = vec![old];
            call_args.extend_from_slice(&args[2..]);
            let new = call_any(ctx, caller, args[1], &call_args)?;
            store_atom(ctx, caller, id, new)
        }
        Builtin::AddWatch => {
            check_arity(name, args, 3, Some(3))?;
            let id = atom_id(ctx, args[0])?;
            let key = persist_if_needed(ctx, id, args[1])?;
            let watch_fn = persist_if_needed(ctx, id, args[2])?;
            let HeapData::Atom(atom) = ctx.heap.get(id) else {
                return Err(RunError::internal("atom_id returned a non-atom"));
            };
            // Re-registering under an existing key replaces the old watch.
            let watches = atom.watches.clone();
            let mut kept = Vec::with_capacity(watches.len() + 1);
            for (k, f) in watches {
                if !value_eq(k, key, ctx.heap, ctx.interns) {
                    kept.push((k, f));
                }
            }
            kept.push((key, watch_fn));
            let HeapData::Atom(atom) = ctx.heap.get_mut(id) else {
                return Err(RunError::internal("atom_id returned a non-atom"));
            };
            atom.watches = kept;
            Ok(args[0])
        }
        Builtin::RemoveWatch => {
            check_arity(name, args, 2, Some(2))?;
            let id = atom_id(ctx, args[0])?;
            let HeapData::Atom(atom) = ctx.heap.get(id) else {
                return Err(RunError::internal("atom_id returned a non-atom"));
            };
            let watches = atom.watches.clone();
            let mut kept = Vec::with_capacity(watches.len());
            for (k, f) in watches {
                if !value_eq(k, args[1], ctx.heap, ctx.interns) {
                    kept.push((k, f));
                }
            }
            let HeapData::Atom(atom) = ctx.heap.get_mut(id) else {
                return Err(RunError::internal("atom_id returned a non-atom"));
            };
            atom.watches = kept;
            Ok(args[0])
        }
        Builtin::DelayStar => {
            check_arity(name, args, 1, Some(1))?;
            let delay = ctx.heap.alloc(HeapData::Delay(Delay {
                state: DelayState::Pending(args[0]),
            }))?;
            Ok(Value::Ref(delay))
        }
        Builtin::Force => {
            check_arity(name, args, 1, Some(1))?;
            match args[0] {
                Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Delay(_)) => {
                    force_delay(ctx, caller, id)
                }
                other => Ok(other),
            }
        }
        Builtin::IsRealized => {
            check_arity(name, args, 1, Some(1))?;
            let realized = match args[0] {
                Value::Ref(id) => match ctx.heap.get(id) {
                    HeapData::Delay(delay) => matches!(delay.state, DelayState::Realized(_)),
                    HeapData::Promise(promise) => promise.value.is_some(),
                    HeapData::LazySeq(seq) => matches!(seq, LazySeq::Realized { .. }),
                    _ => {
                        return Err(RunError::type_error(
                            "realized? expects a delay, promise, or lazy seq",
                        ));
                    }
                },
                _ => {
                    return Err(RunError::type_error(
                        "realized? expects a delay, promise, or lazy seq",
                    ));
                }
            };
            Ok(Value::Bool(realized))
        }
        Builtin::VolatileBang => {
            check_arity(name, args, 1, Some(1))?;
            let cell = ctx.heap.alloc(HeapData::Volatile(Volatile { value: args[0] }))?;
            Ok(Value::Ref(cell))
        }
        Builtin::VresetBang => {
            check_arity(name, args, 2, Some(2))?;
            let id = volatile_id(ctx, args[0])?;
            let stored = persist_if_needed(ctx, id, args[1])?;
            let HeapData::Volatile(cell) = ctx.heap.get_mut(id) else {
                return Err(RunError::internal("volatile_id returned a non-volatile"));
            };
            cell.value = stored;
            Ok(stored)
        }
        Builtin::VswapBang => {
            check_arity(name, args, 2, None)?;
            let id = volatile_id(ctx, args[0])?;
            let HeapData::Volatile(cell) = ctx.heap.get(id) else {
                return Err(RunError::internal("volatile_id returned a non-volatile"));
            };
            let mut call_args = vec![cell.value];
            call_args.extend_from_slice(&args[2..]);
            let new = call_any(ctx, caller, args[1], &call_args)?;
            let stored = persist_if_needed(ctx, id, new)?;
            let HeapData::Volatile(cell) = ctx.heap.get_mut(id) else {
                return Err(RunError::internal("volatile_id returned a non-volatile"));
            };
            cell.value = stored;
            Ok(stored)
        }
        Builtin::Promise => {
            check_arity(name, args, 0, Some(0))?;
            let promise = ctx.heap.alloc(HeapData::Promise(Promise { value: None }))?;
            Ok(Value::Ref(promise))
        }
        Builtin::Deliver => {
            check_arity(name, args, 2, Some(2))?;
            let Value::Ref(id) = args[0] else {
                return Err(RunError::type_error("deliver expects a promise"));
            };
            let HeapData::Promise(promise) = ctx.heap.get(id) else {
                return Err(RunError::type_error("deliver expects a promise"));
            };
            if promise.value.is_some() {
                // Promises are deliver-once; later delivers are ignored.
                return Ok(Value::Nil);
            }
            let stored = persist_if_needed(ctx, id, args[1])?;
            let HeapData::Promise(promise) = ctx.heap.get_mut(id) else {
                return Err(RunError::internal("promise vanished"));
            };
            promise.value = Some(stored);
            Ok(args[0])
        }
        Builtin::Reduced => {
            check_arity(name, args, 1, Some(1))?;
            let cell = ctx.heap.alloc(HeapData::Reduced(args[0]))?;
            Ok(Value::Ref(cell))
        }
        Builtin::IsReduced => {
            check_arity(name, args, 1, Some(1))?;
            Ok(Value::Bool(matches!(
                args[0],
                Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Reduced(_))
            )))
        }
        _ => Err(RunError::internal(format!("{name} routed to refs::call"))),
    }
}

/// `deref` / `@`: atoms, volatiles, vars, delays (forcing), promises,
/// reduced wrappers.
pub(crate) fn deref_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<Value> {
    match value {
        Value::Var(id) => Ok(ctx.env.deref_var(id)),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Atom(atom) => Ok(atom.value),
            HeapData::Volatile(cell) => Ok(cell.value),
            HeapData::Reduced(inner) => Ok(*inner),
            HeapData::Delay(_) => force_delay(ctx, caller, id),
            HeapData::Promise(promise) => promise.value.ok_or_else(|| {
                // Single-threaded: a deref before deliver can never unblock.
                RunError::type_error("deref of an undelivered promise")
            }),
            _ => Err(RunError::type_error(format!(
                "deref not supported on {}",
                value.describe(ctx.heap)
            ))),
        },
        _ => Err(RunError::type_error(format!(
            "deref not supported on {}",
            value.describe(ctx.heap)
        ))),
    }
}

fn force_delay<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    id: HeapId,
) -> RunResult<Value> {
    let HeapData::Delay(delay) = ctx.heap.get(id) else {
        return Err(RunError::type_error("force expects a delay"));
    };
    match delay.state {
        DelayState::Realized(value) => Ok(value),
        DelayState::Pending(thunk) => {
            let result = call_any(ctx, caller, thunk, &[])?;
            let stored = persist_if_needed(ctx, id, result)?;
            let HeapData::Delay(delay) = ctx.heap.get_mut(id) else {
                return Err(RunError::internal("delay vanished"));
            };
            delay.state = DelayState::Realized(stored);
            Ok(stored)
        }
    }
}

fn atom_id<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> RunResult<HeapId> {
    match value {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Atom(_)) => Ok(id),
        other => Err(RunError::type_error(format!(
            "expected an atom, found {}",
            other.describe(ctx.heap)
        ))),
    }
}

fn volatile_id<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> RunResult<HeapId> {
    match value {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Volatile(_)) => Ok(id),
        other => Err(RunError::type_error(format!(
            "expected a volatile, found {}",
            other.describe(ctx.heap)
        ))),
    }
}

/// Values stored into a persistent cell are deep-cloned into the persistent
/// zone first, so the scratch reset can never invalidate the cell.
fn persist_if_needed<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    cell: HeapId,
    value: Value,
) -> RunResult<Value> {
    if cell.is_persistent() {
        let mut memo = AHashMap::new();
        ctx.heap.deep_clone_persistent(value, &mut memo)
    } else {
        Ok(value)
    }
}

/// Stores into an atom and fires watches with `(f key atom old new)`.
fn store_atom<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    id: HeapId,
    new: Value,
) -> RunResult<Value> {
    let stored = persist_if_needed(ctx, id, new)?;
    let HeapData::Atom(atom) = ctx.heap.get_mut(id) else {
        return Err(RunError::internal("store_atom on a non-atom"));
    };
    let old = atom.value;
    atom.value = stored;
    let watches = atom.watches.clone();
    for (key, watch_fn) in watches {
        call_any(ctx, caller, watch_fn, &[key, Value::Ref(id), old, stored])?;
    }
    Ok(stored)
}
