//! String builtins and keyword/symbol constructors.

use super::{Builtin, Caller, EvalCtx, check_arity, seqs};
use crate::{
    error::{RunError, RunResult},
    heap::HeapData,
    resource::ResourceTracker,
    value::{Value, write_value},
    regex::Pattern,
};

/// Renders a value as `str` does (strings raw, nil empty), realizing lazy
/// sequences first so they print as their elements.
pub(crate) fn stringify<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
    readably: bool,
) -> RunResult<String> {
    if !readably && matches!(value, Value::Nil) {
        return Ok(String::new());
    }
    let realized = realize_all(ctx, caller, value)?;
    let mut out = String::new();
    write_value(&mut out, realized, ctx.heap, ctx.interns, ctx.env, readably);
    Ok(out)
}

/// Recursively realizes lazy sequences so printing shows elements.
pub(crate) fn realize_all<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<Value> {
    match value {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::LazySeq(_) | HeapData::List(_) => {
                let items = seqs::realize_to_vec(ctx, caller, value, None)?;
                let mut realized = Vec::with_capacity(items.len());
                for item in items {
                    realized.push(realize_all(ctx, caller, item)?);
                }
                super::coll::list_from_values(ctx, &realized)
            }
            HeapData::Vector(v) => {
                let items = v.items.clone();
                let mut realized = Vec::with_capacity(items.len());
                for item in items {
                    realized.push(realize_all(ctx, caller, item)?);
                }
                super::coll::alloc_vector(ctx, realized)
            }
            _ => Ok(value),
        },
        _ => Ok(value),
    }
}

fn string_arg<T: ResourceTracker>(
    ctx: &EvalCtx<'_, T>,
    name: &str,
    value: Value,
) -> RunResult<String> {
    value.as_str(ctx.heap, ctx.interns).ok_or_else(|| {
        RunError::type_error(format!(
            "{name} expects a string, found {}",
            value.describe(ctx.heap)
        ))
    })
}

fn alloc_str<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, content: String) -> RunResult<Value> {
    Ok(Value::Ref(ctx.heap.alloc(HeapData::Str(content))?))
}

pub(super) fn call<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Str => {
            let mut out = String::new();
            for &arg in args {
                out.push_str(&stringify(ctx, caller, arg, false)?);
            }
            alloc_str(ctx, out)
        }
        Builtin::PrStr => {
            let mut out = String::new();
            for (i, &arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&stringify(ctx, caller, arg, true)?);
            }
            alloc_str(ctx, out)
        }
        Builtin::Subs => {
            check_arity(name, args, 2, Some(3))?;
            let content = string_arg(ctx, name, args[0])?;
            let chars: Vec<char> = content.chars().collect();
            let start = int_index(args[1], name)?;
            let end = match args.get(2) {
                Some(&e) => int_index(e, name)?,
                None => chars.len(),
            };
            if start > end || end > chars.len() {
                return Err(RunError::index_out_of_bounds(end as i64, chars.len()));
            }
            alloc_str(ctx, chars[start..end].iter().collect())
        }
        Builtin::Name => {
            check_arity(name, args, 1, Some(1))?;
            let text = match args[0] {
                Value::Keyword(id) => ctx.interns.keyword_name(id).to_owned(),
                Value::Symbol(id) => ctx.interns.symbol_name(id).to_owned(),
                other => string_arg(ctx, name, other)?,
            };
            alloc_str(ctx, text)
        }
        Builtin::NamespaceOf => {
            check_arity(name, args, 1, Some(1))?;
            let ns = match args[0] {
                Value::Keyword(id) => ctx.interns.keyword_ns(id).map(str::to_owned),
                Value::Symbol(id) => ctx.interns.symbol_ns(id).map(str::to_owned),
                other => {
                    return Err(RunError::type_error(format!(
                        "namespace expects a keyword or symbol, found {}",
                        other.describe(ctx.heap)
                    )));
                }
            };
            match ns {
                Some(text) => alloc_str(ctx, text),
                None => Ok(Value::Nil),
            }
        }
        Builtin::Keyword => {
            check_arity(name, args, 1, Some(2))?;
            if args.len() == 2 {
                let ns = string_arg(ctx, name, args[0])?;
                let kw_name = string_arg(ctx, name, args[1])?;
                return Ok(Value::Keyword(ctx.interns.intern_keyword(Some(&ns), &kw_name)));
            }
            match args[0] {
                Value::Keyword(id) => Ok(Value::Keyword(id)),
                Value::Symbol(id) => {
                    let parts = ctx.interns.symbol(id);
                    let ns = parts.ns.map(|n| ctx.interns.get_str(n).to_owned());
                    let sym_name = ctx.interns.get_str(parts.name).to_owned();
                    Ok(Value::Keyword(ctx.interns.intern_keyword(ns.as_deref(), &sym_name)))
                }
                other => {
                    let text = string_arg(ctx, name, other)?;
                    Ok(Value::Keyword(ctx.interns.intern_keyword(None, &text)))
                }
            }
        }
        Builtin::Symbol => {
            check_arity(name, args, 1, Some(2))?;
            if args.len() == 2 {
                let ns = string_arg(ctx, name, args[0])?;
                let sym_name = string_arg(ctx, name, args[1])?;
                return Ok(Value::Symbol(ctx.interns.intern_symbol(Some(&ns), &sym_name)));
            }
            match args[0] {
                Value::Symbol(id) => Ok(Value::Symbol(id)),
                Value::Keyword(id) => {
                    let parts = ctx.interns.keyword(id);
                    let ns = parts.ns.map(|n| ctx.interns.get_str(n).to_owned());
                    let kw_name = ctx.interns.get_str(parts.name).to_owned();
                    Ok(Value::Symbol(ctx.interns.intern_symbol(ns.as_deref(), &kw_name)))
                }
                other => {
                    let text = string_arg(ctx, name, other)?;
                    Ok(Value::Symbol(ctx.interns.intern_symbol(None, &text)))
                }
            }
        }
        Builtin::UpperCase => {
            check_arity(name, args, 1, Some(1))?;
            let content = string_arg(ctx, name, args[0])?;
            alloc_str(ctx, content.to_uppercase())
        }
        Builtin::LowerCase => {
            check_arity(name, args, 1, Some(1))?;
            let content = string_arg(ctx, name, args[0])?;
            alloc_str(ctx, content.to_lowercase())
        }
        Builtin::Trim => {
            check_arity(name, args, 1, Some(1))?;
            let content = string_arg(ctx, name, args[0])?;
            alloc_str(ctx, content.trim().to_owned())
        }
        Builtin::Split => {
            check_arity(name, args, 2, Some(2))?;
            let content = string_arg(ctx, name, args[0])?;
            let pattern = pattern_arg(ctx, name, args[1])?;
            let mut parts = Vec::new();
            let mut start = 0usize;
            while start <= content.len() {
                match pattern.find(&content, start) {
                    Some(found) if found.end > found.start => {
                        parts.push(content[start..found.start].to_owned());
                        start = found.end;
                    }
                    // Zero-width or no match ends the scan.
                    _ => {
                        parts.push(content[start..].to_owned());
                        break;
                    }
                }
            }
            let mut values = Vec::with_capacity(parts.len());
            for part in parts {
                values.push(alloc_str(ctx, part)?);
            }
            super::coll::alloc_vector(ctx, values)
        }
        Builtin::Join => {
            check_arity(name, args, 1, Some(2))?;
            let (separator, coll) = if args.len() == 2 {
                (string_arg(ctx, name, args[0])?, args[1])
            } else {
                (String::new(), args[0])
            };
            let items = seqs::realize_to_vec(ctx, caller, coll, None)?;
            let mut out = String::new();
            for (i, &item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&separator);
                }
                out.push_str(&stringify(ctx, caller, item, false)?);
            }
            alloc_str(ctx, out)
        }
        Builtin::Replace => {
            check_arity(name, args, 3, Some(3))?;
            let content = string_arg(ctx, name, args[0])?;
            let replacement = string_arg(ctx, name, args[2])?;
            let replaced = match args[1] {
                Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Pattern(_)) => {
                    let pattern = pattern_arg(ctx, name, args[1])?;
                    let mut out = String::new();
                    let mut start = 0usize;
                    while start <= content.len() {
                        match pattern.find(&content, start) {
                            Some(found) if found.end > found.start => {
                                out.push_str(&content[start..found.start]);
                                out.push_str(&replacement);
                                start = found.end;
                            }
                            _ => {
                                out.push_str(&content[start..]);
                                break;
                            }
                        }
                    }
                    out
                }
                needle => {
                    let needle = string_arg(ctx, name, needle)?;
                    content.replace(&needle, &replacement)
                }
            };
            alloc_str(ctx, replaced)
        }
        Builtin::Includes => {
            check_arity(name, args, 2, Some(2))?;
            let haystack = string_arg(ctx, name, args[0])?;
            let needle = string_arg(ctx, name, args[1])?;
            Ok(Value::Bool(haystack.contains(&needle)))
        }
        _ => Err(RunError::internal(format!("{name} routed to strings::call"))),
    }
}

fn int_index(value: Value, name: &str) -> RunResult<usize> {
    match value {
        Value::Int(i) if i >= 0 => Ok(i as usize),
        Value::Int(i) => Err(RunError::index_out_of_bounds(i, 0)),
        _ => Err(RunError::type_error(format!("{name} expects an integer index"))),
    }
}

pub(super) fn pattern_arg<T: ResourceTracker>(
    ctx: &EvalCtx<'_, T>,
    name: &str,
    value: Value,
) -> RunResult<Pattern> {
    match value {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Pattern(pattern) => Ok(pattern.clone()),
            HeapData::Str(s) => Pattern::parse(s).map_err(|err| {
                RunError::new(
                    crate::error::ErrorKind::InvalidRegex,
                    format!("invalid regex: {}", err.message),
                )
            }),
            _ => Err(RunError::type_error(format!("{name} expects a regex pattern"))),
        },
        Value::InternString(id) => {
            let source = ctx.interns.get_str(id);
            Pattern::parse(source).map_err(|err| {
                RunError::new(
                    crate::error::ErrorKind::InvalidRegex,
                    format!("invalid regex: {}", err.message),
                )
            })
        }
        _ => Err(RunError::type_error(format!("{name} expects a regex pattern"))),
    }
}
