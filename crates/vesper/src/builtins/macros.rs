//! Native macro expanders.
//!
//! These run during macro expansion: arguments are unevaluated forms
//! represented as values, and the result is a new form-as-value that the
//! analyzer re-analyzes. User macros (`defmacro`) follow exactly the same
//! contract with a user function instead.

use super::{Builtin, EvalCtx, coll};
use crate::{
    error::{RunError, RunResult},
    heap::HeapData,
    resource::ResourceTracker,
    value::{Value, sequential_elements},
};

pub(super) fn expand<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    args: &[Value],
) -> RunResult<Value> {
    match builtin {
        Builtin::MacroDefn => defn(ctx, args),
        Builtin::MacroWhen => when(ctx, args, false),
        Builtin::MacroWhenNot => when(ctx, args, true),
        Builtin::MacroIfNot => if_not(ctx, args),
        Builtin::MacroAnd => and(ctx, args),
        Builtin::MacroOr => or(ctx, args),
        Builtin::MacroCond => cond(ctx, args),
        Builtin::MacroBinding => binding(ctx, args),
        Builtin::MacroDotimes => dotimes(ctx, args),
        Builtin::MacroThreadFirst => thread(ctx, args, true),
        Builtin::MacroThreadLast => thread(ctx, args, false),
        Builtin::MacroDelay => delay(ctx, args),
        _ => unreachable!("macros::expand called with non-macro builtin"),
    }
}

fn sym<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, name: &str) -> Value {
    Value::Symbol(ctx.interns.intern_symbol(None, name))
}

fn list<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, items: &[Value]) -> RunResult<Value> {
    coll::list_from_values(ctx, items)
}

/// Reads the elements of a list form-as-value.
fn list_items<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::List(_)) => {
            sequential_elements(value, ctx.heap)
        }
        _ => None,
    }
}

fn is_vector<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> bool {
    matches!(value, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Vector(_)))
}

/// `(defn name doc? params-or-arities...)` -> `(def name doc? (fn name ...))`
fn defn<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, args: &[Value]) -> RunResult<Value> {
    let [name, rest @ ..] = args else {
        return Err(RunError::arity_error("defn requires a name"));
    };
    let Value::Symbol(_) = name else {
        return Err(RunError::type_error("defn name must be a symbol"));
    };
    let (doc, fn_tail) = match rest {
        [doc @ (Value::InternString(_) | Value::Ref(_)), tail @ ..]
            if doc.as_str(ctx.heap, ctx.interns).is_some() && !tail.is_empty() =>
        {
            (Some(*doc), tail)
        }
        _ => (None, rest),
    };
    if fn_tail.is_empty() {
        return Err(RunError::arity_error("defn requires a parameter vector or arity lists"));
    }
    let fn_sym = sym(ctx, "fn");
    let mut fn_form = vec![fn_sym, *name];
    fn_form.extend_from_slice(fn_tail);
    let fn_value = list(ctx, &fn_form)?;
    let def_sym = sym(ctx, "def");
    match doc {
        Some(doc) => list(ctx, &[def_sym, *name, doc, fn_value]),
        None => list(ctx, &[def_sym, *name, fn_value]),
    }
}

/// `(when test body...)` -> `(if test (do body...) nil)`; `when-not` negates.
fn when<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    args: &[Value],
    negate: bool,
) -> RunResult<Value> {
    let [test, body @ ..] = args else {
        return Err(RunError::arity_error("when requires a test"));
    };
    let do_sym = sym(ctx, "do");
    let mut do_form = vec![do_sym];
    do_form.extend_from_slice(body);
    let body_value = list(ctx, &do_form)?;
    let if_sym = sym(ctx, "if");
    if negate {
        list(ctx, &[if_sym, *test, Value::Nil, body_value])
    } else {
        list(ctx, &[if_sym, *test, body_value, Value::Nil])
    }
}

/// `(if-not test then else?)` -> `(if test else then)`.
fn if_not<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, args: &[Value]) -> RunResult<Value> {
    match args {
        [test, then] => {
            let if_sym = sym(ctx, "if");
            list(ctx, &[if_sym, *test, Value::Nil, *then])
        }
        [test, then, els] => {
            let if_sym = sym(ctx, "if");
            list(ctx, &[if_sym, *test, *els, *then])
        }
        _ => Err(RunError::arity_error("if-not requires a test and a branch")),
    }
}

/// `(and a b ...)` short-circuits through nested `let`/`if`.
fn and<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, args: &[Value]) -> RunResult<Value> {
    match args {
        [] => Ok(Value::Bool(true)),
        [single] => Ok(*single),
        [head, rest @ ..] => {
            let tmp = Value::Symbol(ctx.interns.gensym("and"));
            let rest_form = {
                let and_sym = sym(ctx, "and");
                let mut form = vec![and_sym];
                form.extend_from_slice(rest);
                list(ctx, &form)?
            };
            let if_sym = sym(ctx, "if");
            let if_form = list(ctx, &[if_sym, tmp, rest_form, tmp])?;
            let bindings = coll::alloc_vector(ctx, vec![tmp, *head])?;
            let let_sym = sym(ctx, "let");
            list(ctx, &[let_sym, bindings, if_form])
        }
    }
}

/// `(or a b ...)` short-circuits, returning the first truthy value.
fn or<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, args: &[Value]) -> RunResult<Value> {
    match args {
        [] => Ok(Value::Nil),
        [single] => Ok(*single),
        [head, rest @ ..] => {
            let tmp = Value::Symbol(ctx.interns.gensym("or"));
            let rest_form = {
                let or_sym = sym(ctx, "or");
                let mut form = vec![or_sym];
                form.extend_from_slice(rest);
                list(ctx, &form)?
            };
            let if_sym = sym(ctx, "if");
            let if_form = list(ctx, &[if_sym, tmp, tmp, rest_form])?;
            let bindings = coll::alloc_vector(ctx, vec![tmp, *head])?;
            let let_sym = sym(ctx, "let");
            list(ctx, &[let_sym, bindings, if_form])
        }
    }
}

/// `(cond t1 e1 t2 e2 ...)` -> nested ifs; `:else` is the conventional
/// always-true test.
fn cond<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, args: &[Value]) -> RunResult<Value> {
    if args.is_empty() {
        return Ok(Value::Nil);
    }
    if args.len() % 2 != 0 {
        return Err(RunError::arity_error("cond requires an even number of forms"));
    }
    let rest = cond(ctx, &args[2..])?;
    let if_sym = sym(ctx, "if");
    list(ctx, &[if_sym, args[0], args[1], rest])
}

/// `(binding [v e ...] body...)` -> push/try/finally/pop so the frame pops
/// on every exit path.
fn binding<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, args: &[Value]) -> RunResult<Value> {
    let [bindings, body @ ..] = args else {
        return Err(RunError::arity_error("binding requires a bindings vector"));
    };
    if !is_vector(ctx, *bindings) {
        return Err(RunError::type_error("binding requires a bindings vector"));
    }
    let pairs = sequential_elements(*bindings, ctx.heap)
        .ok_or_else(|| RunError::type_error("binding requires a bindings vector"))?;
    if pairs.len() % 2 != 0 {
        return Err(RunError::arity_error("binding requires var/value pairs"));
    }
    // (hash-map (var v1) e1 ...)
    let hash_map_sym = sym(ctx, "hash-map");
    let var_sym = sym(ctx, "var");
    let mut map_form = vec![hash_map_sym];
    for pair in pairs.chunks(2) {
        let var_form = list(ctx, &[var_sym, pair[0]])?;
        map_form.push(var_form);
        map_form.push(pair[1]);
    }
    let map_value = list(ctx, &map_form)?;
    let push_sym = sym(ctx, "push-thread-bindings");
    let push_form = list(ctx, &[push_sym, map_value])?;

    let do_sym = sym(ctx, "do");
    let mut body_form = vec![do_sym];
    body_form.extend_from_slice(body);
    let body_value = list(ctx, &body_form)?;

    let pop_sym = sym(ctx, "pop-thread-bindings");
    let pop_form = list(ctx, &[pop_sym])?;
    let finally_sym = sym(ctx, "finally");
    let finally_form = list(ctx, &[finally_sym, pop_form])?;
    let try_sym = sym(ctx, "try");
    let try_form = list(ctx, &[try_sym, body_value, finally_form])?;

    let do_outer = sym(ctx, "do");
    list(ctx, &[do_outer, push_form, try_form])
}

/// `(dotimes [i n] body...)` -> counted loop/recur.
fn dotimes<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, args: &[Value]) -> RunResult<Value> {
    let [bindings, body @ ..] = args else {
        return Err(RunError::arity_error("dotimes requires a binding vector"));
    };
    let pair = sequential_elements(*bindings, ctx.heap)
        .filter(|items| items.len() == 2)
        .ok_or_else(|| RunError::type_error("dotimes requires [name count]"))?;
    let (var, count) = (pair[0], pair[1]);
    let limit = Value::Symbol(ctx.interns.gensym("n"));

    // (loop [i 0 n count] (if (< i n) (do body... (recur (inc i) n)) nil))
    let inc_sym = sym(ctx, "inc");
    let inc_form = list(ctx, &[inc_sym, var])?;
    let recur_sym = sym(ctx, "recur");
    let recur_form = list(ctx, &[recur_sym, inc_form, limit])?;
    let do_sym = sym(ctx, "do");
    let mut do_form = vec![do_sym];
    do_form.extend_from_slice(body);
    do_form.push(recur_form);
    let do_value = list(ctx, &do_form)?;
    let lt_sym = sym(ctx, "<");
    let test_form = list(ctx, &[lt_sym, var, limit])?;
    let if_sym = sym(ctx, "if");
    let if_form = list(ctx, &[if_sym, test_form, do_value, Value::Nil])?;
    let loop_bindings = coll::alloc_vector(ctx, vec![var, Value::Int(0), limit, count])?;
    let loop_sym = sym(ctx, "loop");
    list(ctx, &[loop_sym, loop_bindings, if_form])
}

/// `->` / `->>`: threads the value as first (or last) argument through forms.
fn thread<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    args: &[Value],
    first: bool,
) -> RunResult<Value> {
    let [init, forms @ ..] = args else {
        return Err(RunError::arity_error("-> requires an initial value"));
    };
    let mut acc = *init;
    for &form in forms {
        acc = match list_items(ctx, form) {
            Some(items) => {
                let Some((head, tail)) = items.split_first() else {
                    return Err(RunError::type_error("cannot thread through an empty list"));
                };
                let mut call = vec![*head];
                if first {
                    call.push(acc);
                    call.extend_from_slice(tail);
                } else {
                    call.extend_from_slice(tail);
                    call.push(acc);
                }
                list(ctx, &call)?
            }
            // A bare symbol threads as a one-argument call.
            None => list(ctx, &[form, acc])?,
        };
    }
    Ok(acc)
}

/// `(delay body...)` -> `(delay* (fn [] body...))`.
fn delay<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, args: &[Value]) -> RunResult<Value> {
    let fn_sym = sym(ctx, "fn");
    let params = coll::alloc_vector(ctx, Vec::new())?;
    let mut fn_form = vec![fn_sym, params];
    fn_form.extend_from_slice(args);
    let fn_value = list(ctx, &fn_form)?;
    let delay_star = sym(ctx, "delay*");
    list(ctx, &[delay_star, fn_value])
}
