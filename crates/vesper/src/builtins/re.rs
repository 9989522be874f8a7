//! Regex builtins, bridging the in-tree engine into values.

use super::{Builtin, EvalCtx, check_arity, coll, strings::pattern_arg};
use crate::{
    error::{RunError, RunResult},
    heap::HeapData,
    regex::{MatchResult, MatcherState},
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
        Builtin::RePattern => {
            check_arity(name, args, 1, Some(1))?;
            let pattern = pattern_arg(ctx, name, args[0])?;
            Ok(Value::Ref(ctx.heap.alloc(HeapData::Pattern(pattern))?))
        }
        Builtin::ReFind => {
            check_arity(name, args, 1, Some(2))?;
            if args.len() == 1 {
                // (re-find matcher): step the stateful matcher.
                return matcher_find(ctx, args[0]);
            }
            let pattern = pattern_arg(ctx, name, args[0])?;
            let subject = subject_arg(ctx, name, args[1])?;
            match pattern.find(&subject, 0) {
                Some(found) => match_to_value(ctx, &found, &subject),
                None => Ok(Value::Nil),
            }
        }
        Builtin::ReMatches => {
            check_arity(name, args, 2, Some(2))?;
            let pattern = pattern_arg(ctx, name, args[0])?;
            let subject = subject_arg(ctx, name, args[1])?;
            match pattern.matches(&subject) {
                Some(found) => match_to_value(ctx, &found, &subject),
                None => Ok(Value::Nil),
            }
        }
        Builtin::ReSeq => {
            check_arity(name, args, 2, Some(2))?;
            let pattern = pattern_arg(ctx, name, args[0])?;
            let subject = subject_arg(ctx, name, args[1])?;
            let mut matcher = MatcherState::new(pattern, subject.clone());
            let mut results = Vec::new();
            while let Some(found) = matcher.next_match() {
                results.push(match_to_value(ctx, &found, &subject)?);
            }
            if results.is_empty() {
                Ok(Value::Nil)
            } else {
                coll::list_from_values(ctx, &results)
            }
        }
        Builtin::ReMatcher => {
            check_arity(name, args, 2, Some(2))?;
            let pattern = pattern_arg(ctx, name, args[0])?;
            let subject = subject_arg(ctx, name, args[1])?;
            let matcher = MatcherState::new(pattern, subject);
            Ok(Value::Ref(ctx.heap.alloc(HeapData::Matcher(matcher))?))
        }
        Builtin::ReGroups => {
            check_arity(name, args, 1, Some(1))?;
            let Value::Ref(id) = args[0] else {
                return Err(RunError::type_error("re-groups expects a matcher"));
            };
            let HeapData::Matcher(matcher) = ctx.heap.get(id) else {
                return Err(RunError::type_error("re-groups expects a matcher"));
            };
            let subject = matcher.subject.clone();
            match matcher.last_match.clone() {
                Some(found) => match_to_value(ctx, &found, &subject),
                None => Err(RunError::type_error("no match found")),
            }
        }
        _ => Err(RunError::internal(format!("{name} routed to re::call"))),
    }
}

fn subject_arg<T: ResourceTracker>(
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

fn matcher_find<T: ResourceTracker>(ctx: &mut EvalCtx<'_, T>, value: Value) -> RunResult<Value> {
    let Value::Ref(id) = value else {
        return Err(RunError::type_error("re-find expects a matcher or pattern and string"));
    };
    let data = ctx.heap.take(id);
    let HeapData::Matcher(mut matcher) = data else {
        ctx.heap.put_back(id, data);
        return Err(RunError::type_error("re-find expects a matcher or pattern and string"));
    };
    let found = matcher.next_match();
    let subject = matcher.subject.clone();
    ctx.heap.put_back(id, HeapData::Matcher(matcher));
    match found {
        Some(found) => match_to_value(ctx, &found, &subject),
        None => Ok(Value::Nil),
    }
}

/// No groups: the matched string. With groups: `[match g1 g2 ...]` with nil
/// for groups that did not participate.
fn match_to_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    found: &MatchResult,
    subject: &str,
) -> RunResult<Value> {
    let bytes = subject.as_bytes();
    let slice_value = |ctx: &mut EvalCtx<'_, T>, start: usize, end: usize| -> RunResult<Value> {
        let text = String::from_utf8_lossy(&bytes[start..end]).into_owned();
        Ok(Value::Ref(ctx.heap.alloc(HeapData::Str(text))?))
    };
    let whole = slice_value(ctx, found.start, found.end)?;
    if found.groups.is_empty() {
        return Ok(whole);
    }
    let mut items = Vec::with_capacity(found.groups.len() + 1);
    items.push(whole);
    for group in &found.groups {
        match group {
            Some((start, end)) => items.push(slice_value(ctx, *start, *end)?),
            None => items.push(Value::Nil),
        }
    }
    coll::alloc_vector(ctx, items)
}

