//! Sequence builtins and lazy-sequence stepping.
//!
//! Everything seqable canonicalizes through [`seq_of`] into one of three
//! stepping shapes: a cons list, a lazy cons, or an indexed view over a
//! vector/string. Lazy generators force **one step at a time**; each forced
//! step is cached in place (the generator node becomes `Realized` pointing at
//! a lazy cons), so repeated traversal never recomputes. User functions are
//! invoked through the backend-agnostic [`Caller`].

use super::{Builtin, Caller, EvalCtx, call_any, check_arity, coll};
use crate::{
    error::{RunError, RunResult},
    function::{CompFn, PartialFn},
    heap::{HeapData, HeapId},
    resource::ResourceTracker,
    tracer::TraceEvent,
    types::{LazySeq, List},
    value::{Value, value_eq, value_hash},
};

/// Canonicalizes a value to a seq: `Nil` for empty, otherwise a value whose
/// head/tail can be read by [`step_of`].
pub(crate) fn seq_of<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<Value> {
    match value {
        Value::Nil => Ok(Value::Nil),
        Value::InternString(id) => {
            if ctx.interns.get_str(id).is_empty() {
                Ok(Value::Nil)
            } else {
                let seq = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Indexed {
                    coll: value,
                    index: 0,
                }))?;
                Ok(Value::Ref(seq))
            }
        }
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::List(List::Empty) => Ok(Value::Nil),
            HeapData::List(List::Cons { .. }) => Ok(value),
            HeapData::Vector(v) => {
                if v.items.is_empty() {
                    Ok(Value::Nil)
                } else {
                    let seq = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Indexed {
                        coll: value,
                        index: 0,
                    }))?;
                    Ok(Value::Ref(seq))
                }
            }
            HeapData::Str(s) => {
                if s.is_empty() {
                    Ok(Value::Nil)
                } else {
                    let seq = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Indexed {
                        coll: value,
                        index: 0,
                    }))?;
                    Ok(Value::Ref(seq))
                }
            }
            HeapData::Map(map) => {
                let pairs: Vec<(Value, Value)> =
                    map.entries.iter().map(|&(_, k, v)| (k, v)).collect();
                if pairs.is_empty() {
                    return Ok(Value::Nil);
                }
                let mut entry_vectors = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    entry_vectors.push(coll::alloc_vector(ctx, vec![k, v])?);
                }
                coll::list_from_values(ctx, &entry_vectors)
            }
            HeapData::Set(set) => {
                let items: Vec<Value> = set.entries.iter().map(|&(_, e)| e).collect();
                if items.is_empty() {
                    return Ok(Value::Nil);
                }
                coll::list_from_values(ctx, &items)
            }
            HeapData::LazySeq(LazySeq::Cons { .. } | LazySeq::Indexed { .. }) => {
                // Already a stepping shape; emptiness is checked by step_of.
                match step_of(ctx, caller, value)? {
                    Some(_) => Ok(value),
                    None => Ok(Value::Nil),
                }
            }
            HeapData::LazySeq(LazySeq::Realized { seq }) => {
                let seq = *seq;
                seq_of(ctx, caller, seq)
            }
            HeapData::LazySeq(_) => match force_step(ctx, caller, id)? {
                None => Ok(Value::Nil),
                Some(_) => {
                    // force_step cached a Realized cons in place.
                    let HeapData::LazySeq(LazySeq::Realized { seq }) = ctx.heap.get(id) else {
                        return Err(RunError::internal("lazy step did not cache"));
                    };
                    Ok(*seq)
                }
            },
            other => Err(RunError::type_error(format!(
                "cannot create a seq from {}",
                coll_name(other)
            ))),
        },
        other => Err(RunError::type_error(format!(
            "cannot create a seq from {}",
            other.describe(ctx.heap)
        ))),
    }
}

fn coll_name(data: &HeapData) -> &'static str {
    match data {
        HeapData::Str(_) => "string",
        HeapData::List(_) => "list",
        HeapData::Vector(_) => "vector",
        HeapData::Map(_) => "map",
        HeapData::Set(_) => "set",
        HeapData::LazySeq(_) => "lazy-seq",
        HeapData::Fn(_) => "fn",
        _ => "value",
    }
}

/// Reads one step `(head, tail)` from any seqable; `None` means empty.
pub(crate) fn step_of<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<Option<(Value, Value)>> {
    let seq = match value {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::List(List::Cons { first, rest, .. }) => {
                return Ok(Some((*first, *rest)));
            }
            HeapData::LazySeq(LazySeq::Cons { head, tail }) => {
                return Ok(Some((*head, *tail)));
            }
            HeapData::LazySeq(LazySeq::Indexed { coll, index }) => {
                let (coll, index) = (*coll, *index);
                return indexed_step(ctx, coll, index);
            }
            HeapData::LazySeq(LazySeq::Realized { seq }) => {
                let seq = *seq;
                return step_of(ctx, caller, seq);
            }
            HeapData::LazySeq(_) => return force_step(ctx, caller, id),
            _ => seq_of(ctx, caller, value)?,
        },
        _ => seq_of(ctx, caller, value)?,
    };
    match seq {
        Value::Nil => Ok(None),
        other => step_of(ctx, caller, other),
    }
}

fn indexed_step<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    index: usize,
) -> RunResult<Option<(Value, Value)>> {
    let head = match coll {
        Value::InternString(id) => ctx.interns.get_str(id).chars().nth(index).map(Value::Char),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Vector(v) => v.items.get(index).copied(),
            HeapData::Str(s) => s.chars().nth(index).map(Value::Char),
            _ => None,
        },
        _ => None,
    };
    match head {
        None => Ok(None),
        Some(head) => {
            let tail = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Indexed {
                coll,
                index: index + 1,
            }))?;
            Ok(Some((head, Value::Ref(tail))))
        }
    }
}

/// Forces exactly one step of a lazy generator and caches the result in
/// place: the node becomes `Realized` pointing at a lazy cons (or `nil`).
fn force_step<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    id: HeapId,
) -> RunResult<Option<(Value, Value)>> {
    let HeapData::LazySeq(lazy) = ctx.heap.get(id).clone() else {
        return Err(RunError::internal("force_step on a non-lazy value"));
    };
    // Only genuine generator work counts as a forced step.
    if !matches!(
        lazy,
        LazySeq::Realized { .. } | LazySeq::Cons { .. } | LazySeq::Indexed { .. }
    ) {
        ctx.tracer.trace(TraceEvent::LazyStep);
    }
    let stepped: Option<(Value, Value)> = match lazy {
        LazySeq::Realized { seq } => return step_of(ctx, caller, seq),
        LazySeq::Cons { head, tail } => return Ok(Some((head, tail))),
        LazySeq::Indexed { coll, index } => return indexed_step(ctx, coll, index),
        LazySeq::Thunk { f } => {
            let produced = call_any(ctx, caller, f, &[])?;
            let seq = seq_of(ctx, caller, produced)?;
            cache(ctx, id, seq)?;
            return step_of(ctx, caller, seq);
        }
        LazySeq::Map { f, source, index } => match step_of(ctx, caller, source)? {
            None => None,
            Some((head, tail)) => {
                let mapped = call_any(ctx, caller, f, &[head])?;
                let next = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Map {
                    f,
                    source: tail,
                    index: index + 1,
                }))?;
                Some((mapped, Value::Ref(next)))
            }
        },
        LazySeq::Filter { pred, source, index } => {
            let mut cursor = source;
            let mut steps = index;
            loop {
                match step_of(ctx, caller, cursor)? {
                    None => break None,
                    Some((head, tail)) => {
                        steps += 1;
                        let keep = call_any(ctx, caller, pred, &[head])?;
                        if keep.truthy() {
                            let next = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Filter {
                                pred,
                                source: tail,
                                index: steps,
                            }))?;
                            break Some((head, Value::Ref(next)));
                        }
                        cursor = tail;
                    }
                }
            }
        }
        LazySeq::Concat { sources } => {
            let mut found = None;
            for (i, &source) in sources.iter().enumerate() {
                if let Some((head, tail)) = step_of(ctx, caller, source)? {
                    let mut rest_sources = vec![tail];
                    rest_sources.extend_from_slice(&sources[i + 1..]);
                    let next = ctx
                        .heap
                        .alloc(HeapData::LazySeq(LazySeq::Concat { sources: rest_sources }))?;
                    found = Some((head, Value::Ref(next)));
                    break;
                }
            }
            found
        }
        LazySeq::Iterate { f, current } => {
            let next_value = call_any(ctx, caller, f, &[current])?;
            let next = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Iterate {
                f,
                current: next_value,
            }))?;
            Some((current, Value::Ref(next)))
        }
        LazySeq::Repeat { value, remaining } => match remaining {
            Some(n) if n <= 0 => None,
            Some(n) => {
                let next = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Repeat {
                    value,
                    remaining: Some(n - 1),
                }))?;
                Some((value, Value::Ref(next)))
            }
            None => {
                let next = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Repeat {
                    value,
                    remaining: None,
                }))?;
                Some((value, Value::Ref(next)))
            }
        },
        LazySeq::Cycle { source, index } => {
            let items = realize_to_vec(ctx, caller, source, None)?;
            if items.is_empty() {
                None
            } else {
                let head = items[index % items.len()];
                let next = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Cycle {
                    source,
                    index: index + 1,
                }))?;
                Some((head, Value::Ref(next)))
            }
        }
        LazySeq::Range { current, end, step } => {
            let done = match end {
                Some(end) if step > 0 => current >= end,
                Some(end) if step < 0 => current <= end,
                Some(end) => current == end,
                None => false,
            };
            if done {
                None
            } else {
                let next = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Range {
                    current: current + step,
                    end,
                    step,
                }))?;
                Some((Value::Int(current), Value::Ref(next)))
            }
        }
        LazySeq::Take { n, source } => {
            if n <= 0 {
                None
            } else {
                match step_of(ctx, caller, source)? {
                    None => None,
                    Some((head, tail)) => {
                        let next = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Take {
                            n: n - 1,
                            source: tail,
                        }))?;
                        Some((head, Value::Ref(next)))
                    }
                }
            }
        }
    };
    match stepped {
        None => {
            cache(ctx, id, Value::Nil)?;
            Ok(None)
        }
        Some((head, tail)) => {
            let cons = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Cons { head, tail }))?;
            cache(ctx, id, Value::Ref(cons))?;
            Ok(Some((head, tail)))
        }
    }
}

fn cache<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, id: HeapId, seq: Value) -> RunResult<()> {
    // A persistent lazy node must not cache a pointer into scratch.
    let seq = if id.is_persistent() {
        let mut memo = ahash::AHashMap::new();
        ctx.heap.deep_clone_persistent(seq, &mut memo)?
    } else {
        seq
    };
    *ctx.heap.get_mut(id) = HeapData::LazySeq(LazySeq::Realized { seq });
    Ok(())
}

pub(crate) fn first_of<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<Value> {
    Ok(step_of(ctx, caller, value)?.map_or(Value::Nil, |(head, _)| head))
}

/// `rest`: the tail, or the empty list when exhausted.
pub(crate) fn rest_of<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<Value> {
    match step_of(ctx, caller, value)? {
        Some((_, tail)) => Ok(tail),
        None => coll::empty_list(ctx),
    }
}

/// `next`: like `rest` but `nil` when exhausted.
pub(crate) fn next_of<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<Value> {
    match step_of(ctx, caller, value)? {
        Some((_, tail)) => seq_of(ctx, caller, tail),
        None => Ok(Value::Nil),
    }
}

/// Fully realizes a seqable into a vector, up to `limit` elements.
pub(crate) fn realize_to_vec<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
    limit: Option<usize>,
) -> RunResult<Vec<Value>> {
    let mut out = Vec::new();
    let mut cursor = value;
    loop {
        if limit.is_some_and(|l| out.len() >= l) {
            return Ok(out);
        }
        match step_of(ctx, caller, cursor)? {
            None => return Ok(out),
            Some((head, tail)) => {
                out.push(head);
                cursor = tail;
            }
        }
    }
}

/// Seq-aware counting: O(1) for counted collections, walks lazy seqs.
pub(crate) fn count_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<usize> {
    match value {
        Value::Nil => Ok(0),
        Value::InternString(id) => Ok(ctx.interns.get_str(id).chars().count()),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::List(list) => Ok(list.count()),
            HeapData::Vector(v) => Ok(v.len()),
            HeapData::Map(m) => Ok(m.len()),
            HeapData::Set(s) => Ok(s.len()),
            HeapData::Str(s) => Ok(s.chars().count()),
            HeapData::LazySeq(_) => Ok(realize_to_vec(ctx, caller, value, None)?.len()),
            other => Err(RunError::type_error(format!(
                "count not supported on {}",
                coll_name(other)
            ))),
        },
        other => Err(RunError::type_error(format!(
            "count not supported on {}",
            other.describe(ctx.heap)
        ))),
    }
}

/// Equality that realizes sequences: any two sequentials compare
/// element-wise regardless of concrete representation.
pub(crate) fn seq_aware_eq<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    a: Value,
    b: Value,
) -> RunResult<bool> {
    let a_sequential = is_sequential(ctx, a);
    let b_sequential = is_sequential(ctx, b);
    if a_sequential != b_sequential {
        return Ok(false);
    }
    if !a_sequential {
        return Ok(value_eq(a, b, ctx.heap, ctx.interns));
    }
    let mut left = a;
    let mut right = b;
    loop {
        let left_step = step_of(ctx, caller, left)?;
        let right_step = step_of(ctx, caller, right)?;
        match (left_step, right_step) {
            (None, None) => return Ok(true),
            (None, Some(_)) | (Some(_), None) => return Ok(false),
            (Some((lh, lt)), Some((rh, rt))) => {
                if !seq_aware_eq(ctx, caller, lh, rh)? {
                    return Ok(false);
                }
                left = lt;
                right = rt;
            }
        }
    }
}

fn is_sequential<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> bool {
    matches!(
        value,
        Value::Ref(id) if matches!(
            ctx.heap.get(id),
            HeapData::List(_) | HeapData::Vector(_) | HeapData::LazySeq(_)
        )
    )
}

pub(super) fn call<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Cons => {
            check_arity(name, args, 2, Some(2))?;
            let cons = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Cons {
                head: args[0],
                tail: args[1],
            }))?;
            Ok(Value::Ref(cons))
        }
        Builtin::First => {
            check_arity(name, args, 1, Some(1))?;
            first_of(ctx, caller, args[0])
        }
        Builtin::Rest => {
            check_arity(name, args, 1, Some(1))?;
            rest_of(ctx, caller, args[0])
        }
        Builtin::Next => {
            check_arity(name, args, 1, Some(1))?;
            next_of(ctx, caller, args[0])
        }
        Builtin::Seq => {
            check_arity(name, args, 1, Some(1))?;
            seq_of(ctx, caller, args[0])
        }
        Builtin::MapFn => {
            check_arity(name, args, 2, None)?;
            if args.len() == 2 {
                let lazy = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Map {
                    f: args[0],
                    source: args[1],
                    index: 0,
                }))?;
                Ok(Value::Ref(lazy))
            } else {
                // Multi-collection map zips eagerly.
                let mut columns = Vec::with_capacity(args.len() - 1);
                for &coll_arg in &args[1..] {
                    columns.push(realize_to_vec(ctx, caller, coll_arg, None)?);
                }
                let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut out = Vec::with_capacity(shortest);
                for row in 0..shortest {
                    let row_args: Vec<Value> = columns.iter().map(|c| c[row]).collect();
                    out.push(call_any(ctx, caller, args[0], &row_args)?);
                }
                coll::list_from_values(ctx, &out)
            }
        }
        Builtin::Filter => {
            check_arity(name, args, 2, Some(2))?;
            let lazy = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Filter {
                pred: args[0],
                source: args[1],
                index: 0,
            }))?;
            Ok(Value::Ref(lazy))
        }
        Builtin::Remove => {
            check_arity(name, args, 2, Some(2))?;
            let items = realize_to_vec(ctx, caller, args[1], None)?;
            let mut kept = Vec::new();
            for item in items {
                if !call_any(ctx, caller, args[0], &[item])?.truthy() {
                    kept.push(item);
                }
            }
            coll::list_from_values(ctx, &kept)
        }
        Builtin::Reduce => {
            check_arity(name, args, 2, Some(3))?;
            let f = args[0];
            let (mut acc, coll_value) = if args.len() == 3 {
                (args[1], args[2])
            } else {
                match step_of(ctx, caller, args[1])? {
                    None => return call_any(ctx, caller, f, &[]),
                    Some((head, tail)) => (head, tail),
                }
            };
            let mut cursor = coll_value;
            loop {
                match step_of(ctx, caller, cursor)? {
                    None => return Ok(acc),
                    Some((head, tail)) => {
                        acc = call_any(ctx, caller, f, &[acc, head])?;
                        // A Reduced wrapper terminates the fold early.
                        if let Value::Ref(id) = acc
                            && let HeapData::Reduced(inner) = ctx.heap.get(id)
                        {
                            return Ok(*inner);
                        }
                        cursor = tail;
                    }
                }
            }
        }
        Builtin::ReduceKv => {
            check_arity(name, args, 3, Some(3))?;
            let Value::Ref(id) = args[2] else {
                return Err(RunError::type_error("reduce-kv expects a map"));
            };
            let HeapData::Map(map) = ctx.heap.get(id) else {
                return Err(RunError::type_error("reduce-kv expects a map"));
            };
            let entries: Vec<(Value, Value)> = map.entries.iter().map(|&(_, k, v)| (k, v)).collect();
            let mut acc = args[1];
            for (k, v) in entries {
                acc = call_any(ctx, caller, args[0], &[acc, k, v])?;
                if let Value::Ref(id) = acc
                    && let HeapData::Reduced(inner) = ctx.heap.get(id)
                {
                    return Ok(*inner);
                }
            }
            Ok(acc)
        }
        Builtin::Take => {
            check_arity(name, args, 2, Some(2))?;
            let Value::Int(n) = args[0] else {
                return Err(RunError::type_error("take expects an integer count"));
            };
            let lazy = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Take {
                n,
                source: args[1],
            }))?;
            Ok(Value::Ref(lazy))
        }
        Builtin::Drop => {
            check_arity(name, args, 2, Some(2))?;
            let Value::Int(n) = args[0] else {
                return Err(RunError::type_error("drop expects an integer count"));
            };
            let mut cursor = args[1];
            for _ in 0..n.max(0) {
                match step_of(ctx, caller, cursor)? {
                    None => return coll::empty_list(ctx),
                    Some((_, tail)) => cursor = tail,
                }
            }
            Ok(cursor)
        }
        Builtin::Range => {
            check_arity(name, args, 0, Some(3))?;
            let (current, end, step) = match args {
                [] => (0, None, 1),
                [Value::Int(end)] => (0, Some(*end), 1),
                [Value::Int(start), Value::Int(end)] => (*start, Some(*end), 1),
                [Value::Int(start), Value::Int(end), Value::Int(step)] => {
                    (*start, Some(*end), *step)
                }
                _ => return Err(RunError::type_error("range expects integer arguments")),
            };
            let lazy = ctx
                .heap
                .alloc(HeapData::LazySeq(LazySeq::Range { current, end, step }))?;
            Ok(Value::Ref(lazy))
        }
        Builtin::Iterate => {
            check_arity(name, args, 2, Some(2))?;
            let lazy = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Iterate {
                f: args[0],
                current: args[1],
            }))?;
            Ok(Value::Ref(lazy))
        }
        Builtin::Repeat => {
            check_arity(name, args, 1, Some(2))?;
            let (remaining, value) = if args.len() == 2 {
                let Value::Int(n) = args[0] else {
                    return Err(RunError::type_error("repeat expects an integer count"));
                };
                (Some(n), args[1])
            } else {
                (None, args[0])
            };
            let lazy = ctx
                .heap
                .alloc(HeapData::LazySeq(LazySeq::Repeat { value, remaining }))?;
            Ok(Value::Ref(lazy))
        }
        Builtin::Cycle => {
            check_arity(name, args, 1, Some(1))?;
            let lazy = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Cycle {
                source: args[0],
                index: 0,
            }))?;
            Ok(Value::Ref(lazy))
        }
        Builtin::Concat => {
            let lazy = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Concat {
                sources: args.to_vec(),
            }))?;
            Ok(Value::Ref(lazy))
        }
        Builtin::Doall => {
            check_arity(name, args, 1, Some(1))?;
            realize_to_vec(ctx, caller, args[0], None)?;
            Ok(args[0])
        }
        Builtin::Dorun => {
            check_arity(name, args, 1, Some(1))?;
            realize_to_vec(ctx, caller, args[0], None)?;
            Ok(Value::Nil)
        }
        Builtin::Apply => {
            check_arity(name, args, 2, None)?;
            let f = args[0];
            let mut call_args: Vec<Value> = args[1..args.len() - 1].to_vec();
            let spread = realize_to_vec(ctx, caller, args[args.len() - 1], None)?;
            call_args.extend(spread);
            call_any(ctx, caller, f, &call_args)
        }
        Builtin::Partial => {
            check_arity(name, args, 1, None)?;
            let partial = ctx.heap.alloc(HeapData::Partial(PartialFn {
                f: args[0],
                args: args[1..].to_vec(),
            }))?;
            Ok(Value::Ref(partial))
        }
        Builtin::Comp => {
            let comp = ctx.heap.alloc(HeapData::Comp(CompFn { fns: args.to_vec() }))?;
            Ok(Value::Ref(comp))
        }
        Builtin::Interleave => {
            check_arity(name, args, 1, None)?;
            let mut columns = Vec::with_capacity(args.len());
            for &arg in args {
                columns.push(realize_to_vec(ctx, caller, arg, None)?);
            }
            let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(shortest * columns.len());
            for row in 0..shortest {
                for column in &columns {
                    out.push(column[row]);
                }
            }
            coll::list_from_values(ctx, &out)
        }
        Builtin::Distinct => {
            check_arity(name, args, 1, Some(1))?;
            let items = realize_to_vec(ctx, caller, args[0], None)?;
            let mut seen: Vec<(u64, Value)> = Vec::new();
            let mut out = Vec::new();
            for item in items {
                let hash = value_hash(item, ctx.heap, ctx.interns);
                let duplicate = seen
                    .iter()
                    .any(|&(h, v)| h == hash && value_eq(v, item, ctx.heap, ctx.interns));
                if !duplicate {
                    seen.push((hash, item));
                    out.push(item);
                }
            }
            coll::list_from_values(ctx, &out)
        }
        Builtin::Last => {
            check_arity(name, args, 1, Some(1))?;
            let mut last = Value::Nil;
            let mut cursor = args[0];
            while let Some((head, tail)) = step_of(ctx, caller, cursor)? {
                last = head;
                cursor = tail;
            }
            Ok(last)
        }
        Builtin::Butlast => {
            check_arity(name, args, 1, Some(1))?;
            let mut items = realize_to_vec(ctx, caller, args[0], None)?;
            if items.is_empty() {
                return Ok(Value::Nil);
            }
            items.pop();
            if items.is_empty() {
                Ok(Value::Nil)
            } else {
                coll::list_from_values(ctx, &items)
            }
        }
        _ => Err(RunError::internal(format!("{name} routed to seqs::call"))),
    }
}
