//! Collection builtins: constructors, lookups, persistent updates,
//! transients, and type predicates.

use super::{Builtin, Caller, EvalCtx, check_arity, lookup_in, seqs};
use crate::{
    error::{ErrorKind, RunError, RunResult},
    heap::{HeapData, HeapId},
    resource::ResourceTracker,
    types::{List, MapColl, SetColl, Transient, Vector},
    value::{Value, value_eq, value_hash},
};

pub(super) fn call_predicate<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    if builtin == Builtin::Contains {
        check_arity(name, args, 2, Some(2))?;
        return contains(ctx, args[0], args[1]);
    }
    check_arity(name, args, 1, Some(1))?;
    let value = args[0];
    let result = match builtin {
        Builtin::IsNil => matches!(value, Value::Nil),
        Builtin::IsSome => !matches!(value, Value::Nil),
        Builtin::IsTrue => matches!(value, Value::Bool(true)),
        Builtin::IsFalse => matches!(value, Value::Bool(false)),
        Builtin::IsNumber => matches!(value, Value::Int(_) | Value::Float(_)),
        Builtin::IsInt | Builtin::IsInteger => matches!(value, Value::Int(_)),
        Builtin::IsFloat => matches!(value, Value::Float(_)),
        Builtin::IsString => {
            matches!(value, Value::InternString(_))
                || matches!(value, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Str(_)))
        }
        Builtin::IsKeyword => matches!(value, Value::Keyword(_)),
        Builtin::IsSymbol => matches!(value, Value::Symbol(_)),
        Builtin::IsChar => matches!(value, Value::Char(_)),
        Builtin::IsBoolean => matches!(value, Value::Bool(_)),
        Builtin::IsFn => is_callable_fn(ctx, value),
        Builtin::IsList => {
            matches!(value, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::List(_)))
        }
        Builtin::IsVector => {
            matches!(value, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Vector(_)))
        }
        Builtin::IsMap => {
            matches!(value, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Map(_)))
        }
        Builtin::IsSet => {
            matches!(value, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Set(_)))
        }
        Builtin::IsColl => matches!(
            value,
            Value::Ref(id) if matches!(
                ctx.heap.get(id),
                HeapData::List(_) | HeapData::Vector(_) | HeapData::Map(_) | HeapData::Set(_) | HeapData::LazySeq(_)
            )
        ),
        Builtin::IsSeq => matches!(
            value,
            Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::List(_) | HeapData::LazySeq(_))
        ),
        Builtin::IsEmpty => {
            let seq = seqs::seq_of(ctx, caller, value)?;
            matches!(seq, Value::Nil)
        }
        _ => return Err(RunError::internal(format!("{name} routed to coll::call_predicate"))),
    };
    Ok(Value::Bool(result))
}

fn is_callable_fn<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> bool {
    match value {
        Value::Builtin(b) => !b.is_macro(),
        Value::Ref(id) => matches!(
            ctx.heap.get(id),
            HeapData::Fn(_)
                | HeapData::Partial(_)
                | HeapData::Comp(_)
                | HeapData::MultiFn(_)
                | HeapData::ProtocolFn(_)
        ),
        _ => false,
    }
}

pub(super) fn call<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Count => {
            check_arity(name, args, 1, Some(1))?;
            seqs::count_value(ctx, caller, args[0]).map(|n| Value::Int(n as i64))
        }
        Builtin::Nth => {
            check_arity(name, args, 2, Some(3))?;
            let index = as_index(ctx, name, args[1])?;
            nth_with_seq(ctx, caller, args[0], index, args.get(2).copied())
        }
        Builtin::Get => {
            check_arity(name, args, 2, Some(3))?;
            let default = args.get(2).copied().unwrap_or(Value::Nil);
            get_value(ctx, args[0], args[1], default)
        }
        Builtin::Assoc => {
            check_arity(name, args, 3, None)?;
            if (args.len() - 1) % 2 != 0 {
                return Err(RunError::arity_error("assoc expects key/value pairs"));
            }
            let mut coll = args[0];
            for pair in args[1..].chunks(2) {
                coll = assoc_value(ctx, coll, pair[0], pair[1])?;
            }
            Ok(coll)
        }
        Builtin::Dissoc => {
            check_arity(name, args, 1, None)?;
            let mut coll = args[0];
            for &key in &args[1..] {
                coll = dissoc_value(ctx, coll, key)?;
            }
            Ok(coll)
        }
        Builtin::Conj => {
            check_arity(name, args, 1, None)?;
            let mut coll = args[0];
            for &item in &args[1..] {
                coll = conj_value(ctx, coll, item)?;
            }
            Ok(coll)
        }
        Builtin::Disj => {
            check_arity(name, args, 1, None)?;
            let mut coll = args[0];
            for &item in &args[1..] {
                coll = disj_value(ctx, coll, item)?;
            }
            Ok(coll)
        }
        Builtin::Keys | Builtin::Vals => {
            check_arity(name, args, 1, Some(1))?;
            let entries = map_entries(ctx, name, args[0])?;
            let picked: Vec<Value> = entries
                .iter()
                .map(|&(_, k, v)| if builtin == Builtin::Keys { k } else { v })
                .collect();
            list_from_values(ctx, &picked)
        }
        Builtin::Peek => {
            check_arity(name, args, 1, Some(1))?;
            match args[0] {
                Value::Nil => Ok(Value::Nil),
                Value::Ref(id) => match ctx.heap.get(id) {
                    HeapData::Vector(v) => Ok(v.items.last().copied().unwrap_or(Value::Nil)),
                    HeapData::List(List::Empty) => Ok(Value::Nil),
                    HeapData::List(List::Cons { first, .. }) => Ok(*first),
                    other => Err(type_mismatch(name, heap_describe(other))),
                },
                other => Err(type_mismatch(name, other.describe(ctx.heap))),
            }
        }
        Builtin::Pop => {
            check_arity(name, args, 1, Some(1))?;
            match args[0] {
                Value::Ref(id) => match ctx.heap.get(id) {
                    HeapData::Vector(v) => {
                        if v.items.is_empty() {
                            return Err(RunError::new(
                                ErrorKind::IndexOutOfBounds,
                                "can't pop an empty vector",
                            ));
                        }
                        let mut items = v.items.clone();
                        items.pop();
                        alloc_vector(ctx, items)
                    }
                    HeapData::List(List::Empty) => Err(RunError::new(
                        ErrorKind::IndexOutOfBounds,
                        "can't pop an empty list",
                    )),
                    HeapData::List(List::Cons { rest, .. }) => Ok(*rest),
                    other => Err(type_mismatch(name, heap_describe(other))),
                },
                other => Err(type_mismatch(name, other.describe(ctx.heap))),
            }
        }
        Builtin::List => list_from_values(ctx, args),
        Builtin::Vector => alloc_vector(ctx, args.to_vec()),
        Builtin::HashMap => {
            if args.len() % 2 != 0 {
                return Err(RunError::arity_error("hash-map expects key/value pairs"));
            }
            let pairs: Vec<(Value, Value)> =
                args.chunks(2).map(|pair| (pair[0], pair[1])).collect();
            map_from_pairs(ctx, &pairs)
        }
        Builtin::HashSet => set_from_items(ctx, args),
        Builtin::Vec => {
            check_arity(name, args, 1, Some(1))?;
            let items = seqs::realize_to_vec(ctx, caller, args[0], None)?;
            alloc_vector(ctx, items)
        }
        Builtin::Set => {
            check_arity(name, args, 1, Some(1))?;
            let items = seqs::realize_to_vec(ctx, caller, args[0], None)?;
            set_from_items(ctx, &items)
        }
        Builtin::Into => {
            check_arity(name, args, 2, Some(2))?;
            let items = seqs::realize_to_vec(ctx, caller, args[1], None)?;
            let mut coll = args[0];
            for item in items {
                coll = conj_value(ctx, coll, item)?;
            }
            Ok(coll)
        }
        Builtin::Reverse => {
            check_arity(name, args, 1, Some(1))?;
            let mut items = seqs::realize_to_vec(ctx, caller, args[0], None)?;
            items.reverse();
            list_from_values(ctx, &items)
        }
        Builtin::Sort => {
            check_arity(name, args, 1, Some(2))?;
            let (cmp, coll) = if args.len() == 2 {
                (Some(args[0]), args[1])
            } else {
                (None, args[0])
            };
            let mut items = seqs::realize_to_vec(ctx, caller, coll, None)?;
            sort_values(ctx, caller, &mut items, cmp)?;
            list_from_values(ctx, &items)
        }
        Builtin::Subvec => {
            check_arity(name, args, 2, Some(3))?;
            let Value::Ref(id) = args[0] else {
                return Err(type_mismatch(name, args[0].describe(ctx.heap)));
            };
            let HeapData::Vector(v) = ctx.heap.get(id) else {
                return Err(type_mismatch(name, args[0].describe(ctx.heap)));
            };
            let items = v.items.clone();
            let start = as_index(ctx, name, args[1])? as usize;
            let end = match args.get(2) {
                Some(&e) => as_index(ctx, name, e)? as usize,
                None => items.len(),
            };
            if start > end || end > items.len() {
                return Err(RunError::index_out_of_bounds(end as i64, items.len()));
            }
            alloc_vector(ctx, items[start..end].to_vec())
        }
        Builtin::Transient => {
            check_arity(name, args, 1, Some(1))?;
            transient_of(ctx, args[0])
        }
        Builtin::PersistentBang => {
            check_arity(name, args, 1, Some(1))?;
            persistent_of(ctx, args[0])
        }
        Builtin::ConjBang | Builtin::AssocBang | Builtin::DissocBang | Builtin::DisjBang => {
            transient_update(builtin, ctx, args)
        }
        _ => Err(RunError::internal(format!("{name} routed to coll::call"))),
    }
}

fn type_mismatch(name: &str, found: &str) -> RunError {
    RunError::type_error(format!("{name} not supported on {found}"))
}

fn heap_describe(data: &HeapData) -> &'static str {
    match data {
        HeapData::Str(_) => "string",
        HeapData::List(_) => "list",
        HeapData::Vector(_) => "vector",
        HeapData::Map(_) => "map",
        HeapData::Set(_) => "set",
        HeapData::LazySeq(_) => "lazy-seq",
        _ => "value",
    }
}

fn as_index<T: ResourceTracker>(
    ctx: &EvalCtx<'_, T>,
    name: &str,
    value: Value,
) -> RunResult<i64> {
    match value {
        Value::Int(i) => Ok(i),
        other => Err(RunError::type_error(format!(
            "{name} expects an integer index, found {}",
            other.describe(ctx.heap)
        ))),
    }
}

/// `nth` over indexed collections only; used by vector-as-function calls.
pub(crate) fn nth_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    index: Value,
    default: Option<Value>,
) -> RunResult<Value> {
    let index = as_index(ctx, "nth", index)?;
    nth_indexed(ctx, coll, index, default)
        .ok_or_else(|| RunError::type_error("nth not supported on this value"))?
}

fn nth_indexed<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    index: i64,
    default: Option<Value>,
) -> Option<RunResult<Value>> {
    let out_of_bounds = |len: usize| match default {
        Some(d) => Ok(d),
        None => Err(RunError::index_out_of_bounds(index, len)),
    };
    match coll {
        Value::InternString(id) => {
            let content = ctx.interns.get_str(id);
            let chars: Vec<char> = content.chars().collect();
            Some(if index < 0 || index as usize >= chars.len() {
                out_of_bounds(chars.len())
            } else {
                Ok(Value::Char(chars[index as usize]))
            })
        }
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Vector(v) => Some(if index < 0 || index as usize >= v.items.len() {
                out_of_bounds(v.items.len())
            } else {
                Ok(v.items[index as usize])
            }),
            HeapData::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Some(if index < 0 || index as usize >= chars.len() {
                    out_of_bounds(chars.len())
                } else {
                    Ok(Value::Char(chars[index as usize]))
                })
            }
            _ => None,
        },
        _ => None,
    }
}

/// Full `nth`: indexed collections fast-path, sequences by stepping.
fn nth_with_seq<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    coll: Value,
    index: i64,
    default: Option<Value>,
) -> RunResult<Value> {
    if let Some(result) = nth_indexed(ctx, coll, index, default) {
        return result;
    }
    if index < 0 {
        return match default {
            Some(d) => Ok(d),
            None => Err(RunError::index_out_of_bounds(index, 0)),
        };
    }
    let mut cursor = seqs::seq_of(ctx, caller, coll)?;
    let mut remaining = index;
    loop {
        if matches!(cursor, Value::Nil) {
            return match default {
                Some(d) => Ok(d),
                None => Err(RunError::index_out_of_bounds(index, (index - remaining) as usize)),
            };
        }
        if remaining == 0 {
            return seqs::first_of(ctx, caller, cursor);
        }
        let rest = seqs::rest_of(ctx, caller, cursor)?;
        cursor = seqs::seq_of(ctx, caller, rest)?;
        remaining -= 1;
    }
}

/// `get`: maps and sets by key, vectors and strings by index, nil otherwise.
pub(crate) fn get_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    key: Value,
    default: Value,
) -> RunResult<Value> {
    match coll {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Map(_) | HeapData::Set(_) => lookup_in(ctx, coll, key, default),
            HeapData::Vector(_) | HeapData::Str(_) => match key {
                Value::Int(index) => match nth_indexed(ctx, coll, index, Some(default)) {
                    Some(result) => result,
                    None => Ok(default),
                },
                _ => Ok(default),
            },
            _ => Ok(default),
        },
        Value::InternString(_) => match key {
            Value::Int(index) => match nth_indexed(ctx, coll, index, Some(default)) {
                Some(result) => result,
                None => Ok(default),
            },
            _ => Ok(default),
        },
        _ => Ok(default),
    }
}

fn contains<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    key: Value,
) -> RunResult<Value> {
    match coll {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Map(map) => {
                let hash = value_hash(key, ctx.heap, ctx.interns);
                let found = map.hash_start(hash).is_some_and(|start| {
                    map.entries[start..]
                        .iter()
                        .take_while(|e| e.0 == hash)
                        .any(|&(_, k, _)| value_eq(k, key, ctx.heap, ctx.interns))
                });
                Ok(Value::Bool(found))
            }
            HeapData::Set(set) => {
                let hash = value_hash(key, ctx.heap, ctx.interns);
                let found = set.hash_start(hash).is_some_and(|start| {
                    set.entries[start..]
                        .iter()
                        .take_while(|e| e.0 == hash)
                        .any(|&(_, e)| value_eq(e, key, ctx.heap, ctx.interns))
                });
                Ok(Value::Bool(found))
            }
            HeapData::Vector(v) => Ok(Value::Bool(
                matches!(key, Value::Int(i) if i >= 0 && (i as usize) < v.items.len()),
            )),
            other => Err(type_mismatch("contains?", heap_describe(other))),
        },
        other => Err(type_mismatch("contains?", other.describe(ctx.heap))),
    }
}

fn map_entries<T: ResourceTracker>(
    ctx: &EvalCtx<'_, T>,
    name: &str,
    coll: Value,
) -> RunResult<Vec<(u64, Value, Value)>> {
    match coll {
        Value::Nil => Ok(Vec::new()),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Map(map) => Ok(map.entries.clone()),
            other => Err(type_mismatch(name, heap_describe(other))),
        },
        other => Err(type_mismatch(name, other.describe(ctx.heap))),
    }
}

// --- constructors ---

pub(crate) fn empty_list<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>) -> RunResult<Value> {
    Ok(Value::Ref(ctx.heap.alloc(HeapData::List(List::Empty))?))
}

/// Builds a persistent list from a slice, front to back.
pub(crate) fn list_from_values<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    items: &[Value],
) -> RunResult<Value> {
    let mut tail = empty_list(ctx)?;
    let mut count = 0u32;
    for &item in items.iter().rev() {
        count += 1;
        tail = Value::Ref(ctx.heap.alloc(HeapData::List(List::Cons {
            first: item,
            rest: tail,
            count,
        }))?);
    }
    Ok(tail)
}

pub(crate) fn alloc_vector<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    items: Vec<Value>,
) -> RunResult<Value> {
    Ok(Value::Ref(ctx.heap.alloc(HeapData::Vector(Vector::new(items)))?))
}

/// Builds a map from key/value pairs; later duplicates replace earlier ones.
pub(crate) fn map_from_pairs<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    pairs: &[(Value, Value)],
) -> RunResult<Value> {
    let mut map = MapColl::default();
    for &(key, value) in pairs {
        let hash = value_hash(key, ctx.heap, ctx.interns);
        insert_map_entry(&mut map.entries, hash, key, value, ctx);
    }
    Ok(Value::Ref(ctx.heap.alloc(HeapData::Map(map))?))
}

fn insert_map_entry<T: ResourceTracker>(
    entries: &mut Vec<(u64, Value, Value)>,
    hash: u64,
    key: Value,
    value: Value,
    ctx: &EvalCtx<'_, T>,
) {
    let start = entries.partition_point(|entry| entry.0 < hash);
    let mut index = start;
    while index < entries.len() && entries[index].0 == hash {
        if value_eq(entries[index].1, key, ctx.heap, ctx.interns) {
            entries[index].2 = value;
            return;
        }
        index += 1;
    }
    entries.insert(index, (hash, key, value));
}

fn remove_map_entry<T: ResourceTracker>(
    entries: &mut Vec<(u64, Value, Value)>,
    hash: u64,
    key: Value,
    ctx: &EvalCtx<'_, T>,
) {
    let start = entries.partition_point(|entry| entry.0 < hash);
    let mut index = start;
    while index < entries.len() && entries[index].0 == hash {
        if value_eq(entries[index].1, key, ctx.heap, ctx.interns) {
            entries.remove(index);
            return;
        }
        index += 1;
    }
}

fn insert_set_entry<T: ResourceTracker>(
    entries: &mut Vec<(u64, Value)>,
    hash: u64,
    item: Value,
    ctx: &EvalCtx<'_, T>,
) {
    let start = entries.partition_point(|entry| entry.0 < hash);
    let mut index = start;
    while index < entries.len() && entries[index].0 == hash {
        if value_eq(entries[index].1, item, ctx.heap, ctx.interns) {
            return;
        }
        index += 1;
    }
    entries.insert(index, (hash, item));
}

pub(crate) fn set_from_items<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    items: &[Value],
) -> RunResult<Value> {
    let mut set = SetColl::default();
    for &item in items {
        let hash = value_hash(item, ctx.heap, ctx.interns);
        insert_set_entry(&mut set.entries, hash, item, ctx);
    }
    Ok(Value::Ref(ctx.heap.alloc(HeapData::Set(set))?))
}

// --- persistent updates ---

pub(crate) fn assoc_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    key: Value,
    value: Value,
) -> RunResult<Value> {
    match coll {
        Value::Nil => map_from_pairs(ctx, &[(key, value)]),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Map(map) => {
                let mut entries = map.entries.clone();
                let hash = value_hash(key, ctx.heap, ctx.interns);
                insert_map_entry(&mut entries, hash, key, value, ctx);
                Ok(Value::Ref(ctx.heap.alloc(HeapData::Map(MapColl { entries }))?))
            }
            HeapData::Vector(v) => {
                let mut items = v.items.clone();
                let index = as_index(ctx, "assoc", key)?;
                if index < 0 || index as usize > items.len() {
                    return Err(RunError::index_out_of_bounds(index, items.len()));
                }
                if index as usize == items.len() {
                    items.push(value);
                } else {
                    items[index as usize] = value;
                }
                alloc_vector(ctx, items)
            }
            other => Err(type_mismatch("assoc", heap_describe(other))),
        },
        other => Err(type_mismatch("assoc", other.describe(ctx.heap))),
    }
}

fn dissoc_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    key: Value,
) -> RunResult<Value> {
    match coll {
        Value::Nil => Ok(Value::Nil),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Map(map) => {
                let mut entries = map.entries.clone();
                let hash = value_hash(key, ctx.heap, ctx.interns);
                remove_map_entry(&mut entries, hash, key, ctx);
                Ok(Value::Ref(ctx.heap.alloc(HeapData::Map(MapColl { entries }))?))
            }
            other => Err(type_mismatch("dissoc", heap_describe(other))),
        },
        other => Err(type_mismatch("dissoc", other.describe(ctx.heap))),
    }
}

/// `conj`: front for lists, back for vectors, membership for sets, entry for
/// maps. `(conj nil x)` produces a one-element list.
pub(crate) fn conj_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    item: Value,
) -> RunResult<Value> {
    match coll {
        Value::Nil => list_from_values(ctx, &[item]),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::List(list) => {
                let count = u32::try_from(list.count()).unwrap_or(u32::MAX).saturating_add(1);
                Ok(Value::Ref(ctx.heap.alloc(HeapData::List(List::Cons {
                    first: item,
                    rest: coll,
                    count,
                }))?))
            }
            HeapData::Vector(v) => {
                let mut items = v.items.clone();
                items.push(item);
                alloc_vector(ctx, items)
            }
            HeapData::Set(set) => {
                let mut entries = set.entries.clone();
                let hash = value_hash(item, ctx.heap, ctx.interns);
                insert_set_entry(&mut entries, hash, item, ctx);
                Ok(Value::Ref(ctx.heap.alloc(HeapData::Set(SetColl { entries }))?))
            }
            HeapData::Map(_) => {
                // Entry must be a two-element vector or a map to merge.
                match item {
                    Value::Ref(entry_id) => match ctx.heap.get(entry_id) {
                        HeapData::Vector(pair) if pair.items.len() == 2 => {
                            let key = pair.items[0];
                            let value = pair.items[1];
                            assoc_value(ctx, coll, key, value)
                        }
                        HeapData::Map(other) => {
                            let pairs: Vec<(Value, Value)> =
                                other.entries.iter().map(|&(_, k, v)| (k, v)).collect();
                            let mut acc = coll;
                            for (k, v) in pairs {
                                acc = assoc_value(ctx, acc, k, v)?;
                            }
                            Ok(acc)
                        }
                        _ => Err(RunError::type_error(
                            "conj on a map expects a [key value] vector or a map",
                        )),
                    },
                    _ => Err(RunError::type_error(
                        "conj on a map expects a [key value] vector or a map",
                    )),
                }
            }
            other => Err(type_mismatch("conj", heap_describe(other))),
        },
        other => Err(type_mismatch("conj", other.describe(ctx.heap))),
    }
}

fn disj_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    coll: Value,
    item: Value,
) -> RunResult<Value> {
    match coll {
        Value::Nil => Ok(Value::Nil),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Set(set) => {
                let hash = value_hash(item, ctx.heap, ctx.interns);
                let mut entries = set.entries.clone();
                let start = entries.partition_point(|entry| entry.0 < hash);
                let mut index = start;
                while index < entries.len() && entries[index].0 == hash {
                    if value_eq(entries[index].1, item, ctx.heap, ctx.interns) {
                        entries.remove(index);
                        break;
                    }
                    index += 1;
                }
                Ok(Value::Ref(ctx.heap.alloc(HeapData::Set(SetColl { entries }))?))
            }
            other => Err(type_mismatch("disj", heap_describe(other))),
        },
        other => Err(type_mismatch("disj", other.describe(ctx.heap))),
    }
}

fn sort_values<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    items: &mut [Value],
    cmp: Option<Value>,
) -> RunResult<()> {
    // Insertion sort keeps comparator calls fallible without unwinding
    // through the standard sort.
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 {
            let in_order = match cmp {
                Some(f) => {
                    let result = super::call_any(ctx, caller, f, &[items[j - 1], items[j]])?;
                    match result {
                        Value::Int(n) => n <= 0,
                        other => other.truthy(),
                    }
                }
                None => {
                    super::arith::compare_values(ctx, items[j - 1], items[j])?
                        != std::cmp::Ordering::Greater
                }
            };
            if in_order {
                break;
            }
            items.swap(j - 1, j);
            j -= 1;
        }
    }
    Ok(())
}

// --- transients ---

fn transient_of<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, coll: Value) -> RunResult<Value> {
    let Value::Ref(id) = coll else {
        return Err(type_mismatch("transient", coll.describe(ctx.heap)));
    };
    let data = match ctx.heap.get(id) {
        HeapData::Vector(v) => Transient::Vector(v.items.clone()),
        HeapData::Map(m) => Transient::Map(m.entries.clone()),
        HeapData::Set(s) => Transient::Set(s.entries.clone()),
        other => return Err(type_mismatch("transient", heap_describe(other))),
    };
    Ok(Value::Ref(ctx.heap.alloc(HeapData::Transient(data))?))
}

fn persistent_of<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, coll: Value) -> RunResult<Value> {
    let id = transient_id(ctx, coll)?;
    let data = ctx.heap.take(id);
    let HeapData::Transient(transient) = data else {
        ctx.heap.put_back(id, data);
        return Err(RunError::type_error("persistent! expects a transient"));
    };
    // The original cell becomes spent; further transient ops on it fail.
    ctx.heap.put_back(id, HeapData::Transient(Transient::Spent));
    match transient {
        Transient::Vector(items) => alloc_vector(ctx, items),
        Transient::Map(entries) => Ok(Value::Ref(ctx.heap.alloc(HeapData::Map(MapColl { entries }))?)),
        Transient::Set(entries) => Ok(Value::Ref(ctx.heap.alloc(HeapData::Set(SetColl { entries }))?)),
        Transient::Spent => Err(RunError::type_error("transient already made persistent")),
    }
}

fn transient_id<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, coll: Value) -> RunResult<HeapId> {
    match coll {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Transient(_)) => Ok(id),
        other => Err(RunError::type_error(format!(
            "expected a transient, found {}",
            other.describe(ctx.heap)
        ))),
    }
}

fn transient_update<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    let min = if builtin == Builtin::AssocBang { 3 } else { 2 };
    check_arity(name, args, min, Some(min))?;
    let id = transient_id(ctx, args[0])?;
    let data = ctx.heap.take(id);
    let HeapData::Transient(mut transient) = data else {
        ctx.heap.put_back(id, data);
        return Err(RunError::type_error("expected a transient"));
    };
    let result = match (&mut transient, builtin) {
        (Transient::Spent, _) => Err(RunError::type_error("transient already made persistent")),
        (Transient::Vector(items), Builtin::ConjBang) => {
            items.push(args[1]);
            Ok(())
        }
        (Transient::Vector(items), Builtin::AssocBang) => {
            let index = as_index(ctx, name, args[1])?;
            if index < 0 || index as usize >= items.len() {
                Err(RunError::index_out_of_bounds(index, items.len()))
            } else {
                items[index as usize] = args[2];
                Ok(())
            }
        }
        (Transient::Map(entries), Builtin::AssocBang) => {
            let hash = value_hash(args[1], ctx.heap, ctx.interns);
            insert_map_entry(entries, hash, args[1], args[2], ctx);
            Ok(())
        }
        (Transient::Map(entries), Builtin::DissocBang) => {
            let hash = value_hash(args[1], ctx.heap, ctx.interns);
            remove_map_entry(entries, hash, args[1], ctx);
            Ok(())
        }
        (Transient::Map(entries), Builtin::ConjBang) => {
            // Same entry shapes as persistent conj.
            match args[1] {
                Value::Ref(entry_id) => match ctx.heap.get(entry_id) {
                    HeapData::Vector(pair) if pair.items.len() == 2 => {
                        let hash = value_hash(pair.items[0], ctx.heap, ctx.interns);
                        let (k, v) = (pair.items[0], pair.items[1]);
                        insert_map_entry(entries, hash, k, v, ctx);
                        Ok(())
                    }
                    _ => Err(RunError::type_error("conj! on a map expects a [key value] vector")),
                },
                _ => Err(RunError::type_error("conj! on a map expects a [key value] vector")),
            }
        }
        (Transient::Set(entries), Builtin::ConjBang) => {
            let hash = value_hash(args[1], ctx.heap, ctx.interns);
            insert_set_entry(entries, hash, args[1], ctx);
            Ok(())
        }
        (Transient::Set(entries), Builtin::DisjBang) => {
            let hash = value_hash(args[1], ctx.heap, ctx.interns);
            let start = entries.partition_point(|entry| entry.0 < hash);
            let mut index = start;
            while index < entries.len() && entries[index].0 == hash {
                if value_eq(entries[index].1, args[1], ctx.heap, ctx.interns) {
                    entries.remove(index);
                    break;
                }
                index += 1;
            }
            Ok(())
        }
        _ => Err(RunError::type_error(format!(
            "{name} not supported on this transient"
        ))),
    };
    ctx.heap.put_back(id, HeapData::Transient(transient));
    result.map(|()| args[0])
}
