//! Arithmetic, comparison, and numeric predicates.

use super::{Builtin, Caller, EvalCtx, check_arity, seqs};
use crate::{
    error::{RunError, RunResult},
    resource::ResourceTracker,
    value::Value,
};

/// A number extracted from a `Value`; operations promote to float when any
/// operand is a float.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

fn number(ctx: &EvalCtx<'_, impl ResourceTracker>, name: &str, value: Value) -> RunResult<Num> {
    match value {
        Value::Int(i) => Ok(Num::Int(i)),
        Value::Float(f) => Ok(Num::Float(f)),
        other => Err(RunError::type_error(format!(
            "{name} expects a number, found {}",
            other.describe(ctx.heap)
        ))),
    }
}

fn int_arg(ctx: &EvalCtx<'_, impl ResourceTracker>, name: &str, value: Value) -> RunResult<i64> {
    match value {
        Value::Int(i) => Ok(i),
        other => Err(RunError::type_error(format!(
            "{name} expects an integer, found {}",
            other.describe(ctx.heap)
        ))),
    }
}

pub(super) fn call<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    args: &[Value],
) -> RunResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Add => fold(ctx, name, args, Num::Int(0), add),
        Builtin::Mul => fold(ctx, name, args, Num::Int(1), mul),
        Builtin::Sub => {
            check_arity(name, args, 1, None)?;
            if args.len() == 1 {
                return Ok(num_value(sub(Num::Int(0), number(ctx, name, args[0])?)));
            }
            let mut acc = number(ctx, name, args[0])?;
            for &arg in &args[1..] {
                acc = sub(acc, number(ctx, name, arg)?);
            }
            Ok(num_value(acc))
        }
        Builtin::Div => {
            check_arity(name, args, 1, None)?;
            let mut acc = if args.len() == 1 {
                Num::Int(1)
            } else {
                number(ctx, name, args[0])?
            };
            let divisors = if args.len() == 1 { &args[..] } else { &args[1..] };
            for &arg in divisors {
                acc = div(acc, number(ctx, name, arg)?)?;
            }
            Ok(num_value(acc))
        }
        Builtin::Mod => {
            check_arity(name, args, 2, Some(2))?;
            let a = int_arg(ctx, name, args[0])?;
            let b = int_arg(ctx, name, args[1])?;
            if b == 0 {
                return Err(RunError::division_by_zero());
            }
            // Floored modulus: result takes the sign of the divisor.
            Ok(Value::Int(((a % b) + b) % b))
        }
        Builtin::Quot => {
            check_arity(name, args, 2, Some(2))?;
            let a = int_arg(ctx, name, args[0])?;
            let b = int_arg(ctx, name, args[1])?;
            if b == 0 {
                return Err(RunError::division_by_zero());
            }
            Ok(Value::Int(a.wrapping_div(b)))
        }
        Builtin::Rem => {
            check_arity(name, args, 2, Some(2))?;
            let a = int_arg(ctx, name, args[0])?;
            let b = int_arg(ctx, name, args[1])?;
            if b == 0 {
                return Err(RunError::division_by_zero());
            }
            Ok(Value::Int(a.wrapping_rem(b)))
        }
        Builtin::Inc => {
            check_arity(name, args, 1, Some(1))?;
            Ok(num_value(add(number(ctx, name, args[0])?, Num::Int(1))))
        }
        Builtin::Dec => {
            check_arity(name, args, 1, Some(1))?;
            Ok(num_value(sub(number(ctx, name, args[0])?, Num::Int(1))))
        }
        Builtin::Max => extremum(ctx, name, args, |a, b| a.as_f64() >= b.as_f64()),
        Builtin::Min => extremum(ctx, name, args, |a, b| a.as_f64() <= b.as_f64()),
        Builtin::Lt => ordered(ctx, name, args, |a, b| a < b),
        Builtin::Le => ordered(ctx, name, args, |a, b| a <= b),
        Builtin::Gt => ordered(ctx, name, args, |a, b| a > b),
        Builtin::Ge => ordered(ctx, name, args, |a, b| a >= b),
        Builtin::Compare => {
            check_arity(name, args, 2, Some(2))?;
            let ordering = compare_values(ctx, args[0], args[1])?;
            Ok(Value::Int(match ordering {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }))
        }
        Builtin::IsZero => numeric_pred(ctx, name, args, |n| n.as_f64() == 0.0),
        Builtin::IsPos => numeric_pred(ctx, name, args, |n| n.as_f64() > 0.0),
        Builtin::IsNeg => numeric_pred(ctx, name, args, |n| n.as_f64() < 0.0),
        Builtin::IsEven => int_pred(ctx, name, args, |i| i % 2 == 0),
        Builtin::IsOdd => int_pred(ctx, name, args, |i| i % 2 != 0),
        _ => Err(RunError::internal(format!("{name} routed to arith::call"))),
    }
}

/// `=` and `not=`: sequence-aware structural equality over adjacent pairs.
pub(super) fn call_equality<T: ResourceTracker>(
    builtin: Builtin,
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    args: &[Value],
) -> RunResult<Value> {
    check_arity(builtin.name(), args, 1, None)?;
    let mut all_equal = true;
    for pair in args.windows(2) {
        if !seqs::seq_aware_eq(ctx, caller, pair[0], pair[1])? {
            all_equal = false;
            break;
        }
    }
    let result = if builtin == Builtin::NotEq { !all_equal } else { all_equal };
    Ok(Value::Bool(result))
}

fn fold<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    name: &str,
    args: &[Value],
    init: Num,
    op: fn(Num, Num) -> Num,
) -> RunResult<Value> {
    let mut acc = init;
    for &arg in args {
        acc = op(acc, number(ctx, name, arg)?);
    }
    Ok(num_value(acc))
}

fn extremum<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    name: &str,
    args: &[Value],
    keep_left: fn(Num, Num) -> bool,
) -> RunResult<Value> {
    check_arity(name, args, 1, None)?;
    let mut best = number(ctx, name, args[0])?;
    for &arg in &args[1..] {
        let candidate = number(ctx, name, arg)?;
        if !keep_left(best, candidate) {
            best = candidate;
        }
    }
    Ok(num_value(best))
}

fn ordered<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    name: &str,
    args: &[Value],
    cmp: fn(f64, f64) -> bool,
) -> RunResult<Value> {
    check_arity(name, args, 1, None)?;
    for pair in args.windows(2) {
        let a = number(ctx, name, pair[0])?;
        let b = number(ctx, name, pair[1])?;
        if !cmp(a.as_f64(), b.as_f64()) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn numeric_pred<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    name: &str,
    args: &[Value],
    pred: fn(Num) -> bool,
) -> RunResult<Value> {
    check_arity(name, args, 1, Some(1))?;
    Ok(Value::Bool(pred(number(ctx, name, args[0])?)))
}

fn int_pred<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    name: &str,
    args: &[Value],
    pred: fn(i64) -> bool,
) -> RunResult<Value> {
    check_arity(name, args, 1, Some(1))?;
    Ok(Value::Bool(pred(int_arg(ctx, name, args[0])?)))
}

fn num_value(n: Num) -> Value {
    match n {
        Num::Int(i) => Value::Int(i),
        Num::Float(f) => Value::Float(f),
    }
}

fn add(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_add(y)),
        _ => Num::Float(a.as_f64() + b.as_f64()),
    }
}

fn sub(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_sub(y)),
        _ => Num::Float(a.as_f64() - b.as_f64()),
    }
}

fn mul(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_mul(y)),
        _ => Num::Float(a.as_f64() * b.as_f64()),
    }
}

/// Division: integer division when evenly divisible, float otherwise.
/// Integer division by zero errors; float division follows IEEE semantics.
fn div(a: Num, b: Num) -> RunResult<Num> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => {
            if y == 0 {
                Err(RunError::division_by_zero())
            } else if x % y == 0 {
                Ok(Num::Int(x / y))
            } else {
                Ok(Num::Float(x as f64 / y as f64))
            }
        }
        _ => Ok(Num::Float(a.as_f64() / b.as_f64())),
    }
}

/// Total order over comparable values: numbers, then by-type comparisons for
/// nil, booleans, chars, strings, keywords, symbols, and vectors.
pub(super) fn compare_values<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    a: Value,
    b: Value,
) -> RunResult<std::cmp::Ordering> {
    use std::cmp::Ordering;
    let ordering = match (a, b) {
        (Value::Nil, Value::Nil) => Ordering::Equal,
        (Value::Nil, _) => Ordering::Less,
        (_, Value::Nil) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(&y),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let x = number(ctx, "compare", a)?.as_f64();
            let y = number(ctx, "compare", b)?.as_f64();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(&y),
        (Value::Char(x), Value::Char(y)) => x.cmp(&y),
        (Value::Keyword(x), Value::Keyword(y)) => {
            let xs = ctx.interns.keyword_text(x);
            let ys = ctx.interns.keyword_text(y);
            xs.cmp(&ys)
        }
        (Value::Symbol(x), Value::Symbol(y)) => {
            let xs = ctx.interns.symbol_text(x);
            let ys = ctx.interns.symbol_text(y);
            xs.cmp(&ys)
        }
        _ => {
            let xs = a.as_str(ctx.heap, ctx.interns);
            let ys = b.as_str(ctx.heap, ctx.interns);
            match (xs, ys) {
                (Some(xs), Some(ys)) => xs.cmp(&ys),
                _ => {
                    return Err(RunError::type_error(format!(
                        "cannot compare {} with {}",
                        a.describe(ctx.heap),
                        b.describe(ctx.heap)
                    )));
                }
            }
        }
    };
    Ok(ordering)
}
