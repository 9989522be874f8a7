//! Namespace and var builtins, including the dynamic-binding stack pair.

use ahash::AHashMap;

use super::{Builtin, EvalCtx, check_arity, coll};
use crate::{
    env::BindingFrame,
    error::{RunError, RunResult},
    heap::HeapData,
    resource::ResourceTracker,
    value::Value,
};

pub(super) fn call<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::InNs => {
            check_arity(name, args, 1, Some(1))?;
            let ns_name = symbol_name_arg(ctx, name, args[0])?;
            let ns_str = ctx.interns.intern_str(&ns_name);
            let ns = ctx.env.ensure_ns(ns_str);
            ctx.env.current_ns = ns;
            let sym = ctx.interns.intern_symbol(None, &ns_name);
            Ok(Value::Symbol(sym))
        }
        Builtin::CreateNs => {
            check_arity(name, args, 1, Some(1))?;
            let ns_name = symbol_name_arg(ctx, name, args[0])?;
            let ns_str = ctx.interns.intern_str(&ns_name);
            ctx.env.ensure_ns(ns_str);
            let sym = ctx.interns.intern_symbol(None, &ns_name);
            Ok(Value::Symbol(sym))
        }
        Builtin::FindNs => {
            check_arity(name, args, 1, Some(1))?;
            let ns_name = symbol_name_arg(ctx, name, args[0])?;
            let ns_str = ctx.interns.intern_str(&ns_name);
            match ctx.env.find_ns(ns_str) {
                Some(_) => {
                    let sym = ctx.interns.intern_symbol(None, &ns_name);
                    Ok(Value::Symbol(sym))
                }
                None => Ok(Value::Nil),
            }
        }
        Builtin::NsNameOf => {
            check_arity(name, args, 0, Some(1))?;
            let ns_name = match args.first() {
                Some(&arg) => symbol_name_arg(ctx, name, arg)?,
                None => {
                    let current = ctx.env.ns(ctx.env.current_ns).name;
                    ctx.interns.get_str(current).to_owned()
                }
            };
            let sym = ctx.interns.intern_symbol(None, &ns_name);
            Ok(Value::Symbol(sym))
        }
        Builtin::AllNs => {
            check_arity(name, args, 0, Some(0))?;
            let names: Vec<String> = ctx
                .env
                .all_ns()
                .map(|ns| ctx.interns.get_str(ns.name).to_owned())
                .collect();
            let mut symbols = Vec::with_capacity(names.len());
            for ns_name in names {
                symbols.push(Value::Symbol(ctx.interns.intern_symbol(None, &ns_name)));
            }
            coll::list_from_values(ctx, &symbols)
        }
        Builtin::Alias => {
            check_arity(name, args, 2, Some(2))?;
            let alias = symbol_name_arg(ctx, name, args[0])?;
            let target = symbol_name_arg(ctx, name, args[1])?;
            let target_str = ctx.interns.intern_str(&target);
            let Some(target_ns) = ctx.env.find_ns(target_str) else {
                return Err(RunError::type_error(format!("no namespace {target} to alias")));
            };
            let alias_str = ctx.interns.intern_str(&alias);
            let current = ctx.env.current_ns;
            ctx.env.ns_mut(current).aliases.insert(alias_str, target_ns);
            Ok(Value::Nil)
        }
        Builtin::Intern => {
            check_arity(name, args, 2, Some(3))?;
            let ns_name = symbol_name_arg(ctx, name, args[0])?;
            let ns_str = ctx.interns.intern_str(&ns_name);
            let ns = ctx.env.ensure_ns(ns_str);
            let Value::Symbol(var_sym) = args[1] else {
                return Err(RunError::type_error("intern expects a symbol name"));
            };
            let var = ctx.env.intern_var(ns, var_sym, ctx.interns);
            if let Some(&init) = args.get(2) {
                let mut memo = AHashMap::new();
                let init = ctx.heap.deep_clone_persistent(init, &mut memo)?;
                ctx.env.var_mut(var).root = init;
            }
            Ok(Value::Var(var))
        }
        Builtin::Resolve => {
            check_arity(name, args, 1, Some(1))?;
            let Value::Symbol(sym) = args[0] else {
                return Err(RunError::type_error("resolve expects a symbol"));
            };
            match ctx.env.resolve(sym, ctx.interns) {
                Some(var) => Ok(Value::Var(var)),
                None => Ok(Value::Nil),
            }
        }
        Builtin::PushThreadBindings => {
            check_arity(name, args, 1, Some(1))?;
            let Value::Ref(id) = args[0] else {
                return Err(RunError::type_error("push-thread-bindings expects a map of vars"));
            };
            let HeapData::Map(map) = ctx.heap.get(id) else {
                return Err(RunError::type_error("push-thread-bindings expects a map of vars"));
            };
            let pairs: Vec<(Value, Value)> = map.entries.iter().map(|&(_, k, v)| (k, v)).collect();
            let mut frame = BindingFrame::default();
            for (key, value) in pairs {
                let Value::Var(var) = key else {
                    return Err(RunError::type_error("binding keys must be vars"));
                };
                if !ctx.env.var(var).dynamic {
                    let text = ctx.interns.symbol_text(ctx.env.var(var).symbol);
                    return Err(RunError::type_error(format!(
                        "can't dynamically bind non-dynamic var {text}"
                    )));
                }
                // Bound values live until the frame pops, which may outlast
                // the current expression inside nested evals; keep them in
                // scratch (frames cannot survive a top-level boundary).
                frame.entries.push((var, value));
            }
            ctx.env.push_binding_frame(frame);
            Ok(Value::Nil)
        }
        Builtin::PopThreadBindings => {
            check_arity(name, args, 0, Some(0))?;
            if ctx.env.pop_binding_frame().is_none() {
                return Err(RunError::internal("binding stack underflow"));
            }
            Ok(Value::Nil)
        }
        _ => Err(RunError::internal(format!("{name} routed to nsops::call"))),
    }
}

fn symbol_name_arg<T: ResourceTracker>(
    ctx: &EvalCtx<'_, T>,
    name: &str,
    value: Value,
) -> RunResult<String> {
    match value {
        Value::Symbol(id) => Ok(ctx.interns.symbol_text(id)),
        Value::Keyword(id) => Ok(ctx.interns.keyword_name(id).to_owned()),
        other => match other.as_str(ctx.heap, ctx.interns) {
            Some(text) => Ok(text),
            None => Err(RunError::type_error(format!(
                "{name} expects a symbol, found {}",
                other.describe(ctx.heap)
            ))),
        },
    }
}
