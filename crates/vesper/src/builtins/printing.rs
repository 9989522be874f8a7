//! Printing and miscellaneous builtins.

use super::{Builtin, Caller, EvalCtx, check_arity, strings::stringify};
use crate::{
    analyzer,
    error::{ErrorKind, RunError, RunResult},
    reader::Reader,
    resource::ResourceTracker,
    value::{Value, value_hash},
};

pub(super) fn call<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Print | Builtin::Println | Builtin::Pr | Builtin::Prn => {
            let readably = matches!(builtin, Builtin::Pr | Builtin::Prn);
            for (i, &arg) in args.iter().enumerate() {
                if i > 0 {
                    ctx.print.write(" ");
                }
                let text = stringify(ctx, caller, arg, readably)?;
                ctx.print.write(&text);
            }
            if matches!(builtin, Builtin::Println | Builtin::Prn) {
                ctx.print.newline();
            }
            Ok(Value::Nil)
        }
        Builtin::Newline => {
            check_arity(name, args, 0, Some(0))?;
            ctx.print.newline();
            Ok(Value::Nil)
        }
        Builtin::Hash => {
            check_arity(name, args, 1, Some(1))?;
            let hash = value_hash(args[0], ctx.heap, ctx.interns);
            Ok(Value::Int(i64::from_ne_bytes(hash.to_ne_bytes())))
        }
        Builtin::Identity => {
            check_arity(name, args, 1, Some(1))?;
            Ok(args[0])
        }
        Builtin::Not => {
            check_arity(name, args, 1, Some(1))?;
            Ok(Value::Bool(!args[0].truthy()))
        }
        Builtin::Boolean => {
            check_arity(name, args, 1, Some(1))?;
            Ok(Value::Bool(args[0].truthy()))
        }
        Builtin::Gensym => {
            check_arity(name, args, 0, Some(1))?;
            let prefix = match args.first() {
                Some(&arg) => arg
                    .as_str(ctx.heap, ctx.interns)
                    .ok_or_else(|| RunError::type_error("gensym expects a string prefix"))?,
                None => "G".to_owned(),
            };
            Ok(Value::Symbol(ctx.interns.gensym(&prefix)))
        }
        Builtin::Macroexpand => {
            check_arity(name, args, 1, Some(1))?;
            analyzer::macroexpand_value(ctx, caller, args[0], false)
        }
        Builtin::Macroexpand1 => {
            check_arity(name, args, 1, Some(1))?;
            analyzer::macroexpand_value(ctx, caller, args[0], true)
        }
        Builtin::ReadString => {
            check_arity(name, args, 1, Some(1))?;
            let source = args[0]
                .as_str(ctx.heap, ctx.interns)
                .ok_or_else(|| RunError::type_error("read-string expects a string"))?;
            let form = {
                let mut reader = Reader::new(&source, "read-string", ctx.interns, ctx.env);
                reader.read()?
            };
            match form {
                Some(form) => analyzer::form_to_value(ctx, &form),
                None => Err(RunError::new(
                    ErrorKind::UnexpectedEof,
                    "read-string found no form",
                )),
            }
        }
        Builtin::Meta => {
            check_arity(name, args, 1, Some(1))?;
            match args[0] {
                Value::Var(id) => Ok(ctx.env.var(id).meta.unwrap_or(Value::Nil)),
                _ => Ok(Value::Nil),
            }
        }
        Builtin::WithMeta => {
            check_arity(name, args, 2, Some(2))?;
            // Values do not carry metadata; only vars do. The value passes
            // through unchanged.
            Ok(args[0])
        }
        Builtin::Assert => {
            check_arity(name, args, 1, Some(2))?;
            if args[0].truthy() {
                return Ok(Value::Nil);
            }
            let message = match args.get(1) {
                Some(&m) => stringify(ctx, caller, m, false)?,
                None => "assert failed".to_owned(),
            };
            Err(RunError::new(ErrorKind::AssertionError, message))
        }
        _ => Err(RunError::internal(format!("{name} routed to printing::call"))),
    }
}
