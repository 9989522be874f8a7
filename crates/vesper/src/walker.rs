//! The tree-walking evaluator.
//!
//! Walks [`Node`] trees directly. One `Walker` holds the slot vector of the
//! frame being evaluated; user-function calls swap in a fresh slot vector and
//! restore on return. `recur` is a flag-and-buffer: evaluating a `Recur` node
//! stashes the new binding values and returns, and the nearest `Loop` or
//! function body notices the flag, overwrites its slots in place, and goes
//! around again.

use ahash::AHashMap;

use crate::{
    builtins::{Caller, EvalCtx, call_any, error_to_value, poly},
    error::{RawFrame, RunResult},
    function::FnId,
    heap::{HeapData, HeapId},
    node::Node,
    resource::ResourceTracker,
    types::LazySeq,
    value::Value,
};

/// Evaluates one analyzed top-level node.
pub(crate) fn eval_top<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    node: &Node,
    slot_count: u16,
) -> RunResult<Value> {
    let mut walker = Walker::new(slot_count);
    walker.eval(ctx, node)
}

pub(crate) struct Walker {
    slots: Vec<Value>,
    /// Pending `recur` values; set by a `Recur` node, consumed by its target.
    recur: Option<Vec<Value>>,
    depth: usize,
}

impl Walker {
    pub fn new(slot_count: u16) -> Self {
        Self {
            slots: vec![Value::Nil; slot_count as usize],
            recur: None,
            depth: 0,
        }
    }

    fn eval<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        node: &Node,
    ) -> RunResult<Value> {
        ctx.heap.tracker_mut().on_step()?;
        match node {
            Node::Constant(value) => Ok(*value),
            Node::Quote { value } => Ok(*value),
            Node::VarRef { var, .. } => Ok(ctx.env.deref_var(*var)),
            Node::LocalRef { index, name, loc } => {
                self.slots.get(*index as usize).copied().ok_or_else(|| {
                    let text = ctx.interns.symbol_text(*name);
                    crate::error::RunError::undefined_symbol(&text).or_loc(*loc)
                })
            }
            Node::If { test, then, els } => {
                let test = self.eval(ctx, test)?;
                if self.recur.is_some() {
                    return Ok(Value::Nil);
                }
                if test.truthy() {
                    self.eval(ctx, then)
                } else {
                    match els {
                        Some(els) => self.eval(ctx, els),
                        None => Ok(Value::Nil),
                    }
                }
            }
            Node::Do { stmts } => {
                let mut result = Value::Nil;
                for stmt in stmts {
                    result = self.eval(ctx, stmt)?;
                    // A recur firing mid-sequence aborts the rest.
                    if self.recur.is_some() {
                        return Ok(Value::Nil);
                    }
                }
                Ok(result)
            }
            Node::Let { bindings, body } => {
                for binding in bindings {
                    let value = self.eval(ctx, &binding.init)?;
                    self.slots[binding.slot as usize] = value;
                }
                self.eval(ctx, body)
            }
            Node::Loop { bindings, body } => {
                let slot_base = bindings.first().map_or(0, |b| b.slot as usize);
                for binding in bindings {
                    let value = self.eval(ctx, &binding.init)?;
                    self.slots[binding.slot as usize] = value;
                }
                loop {
                    let result = self.eval(ctx, body)?;
                    match self.recur.take() {
                        None => return Ok(result),
                        Some(values) => {
                            for (offset, value) in values.into_iter().enumerate() {
                                self.slots[slot_base + offset] = value;
                            }
                        }
                    }
                }
            }
            Node::Recur { args, .. } => {
                // The pre-sized buffer lives in the recur option itself.
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(ctx, arg)?);
                }
                self.recur = Some(values);
                Ok(Value::Nil)
            }
            Node::Letfn { bindings, body } => {
                // Allocate every closure first (capturing placeholder nils),
                // then patch the letfn slots inside each captured vector.
                let mut ids = Vec::with_capacity(bindings.len());
                for &(slot, _, fn_id) in bindings {
                    let id = self.make_closure(ctx, fn_id)?;
                    self.slots[slot as usize] = Value::Ref(id);
                    ids.push(id);
                }
                for &id in &ids {
                    for &(slot, _, _) in bindings {
                        let value = self.slots[slot as usize];
                        let HeapData::Fn(closure) = ctx.heap.get_mut(id) else {
                            return Err(crate::error::RunError::internal("letfn closure vanished"));
                        };
                        if (slot as usize) < closure.captures.len() {
                            closure.captures[slot as usize] = value;
                        }
                    }
                }
                self.eval(ctx, body)
            }
            Node::Fn { fn_id } => {
                let id = self.make_closure(ctx, *fn_id)?;
                Ok(Value::Ref(id))
            }
            Node::LazySeq { fn_id } => {
                let thunk = self.make_closure(ctx, *fn_id)?;
                let seq = ctx.heap.alloc(HeapData::LazySeq(LazySeq::Thunk {
                    f: Value::Ref(thunk),
                }))?;
                Ok(Value::Ref(seq))
            }
            Node::Call { f, args, loc } => {
                let callee = self.eval(ctx, f)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(ctx, arg)?);
                }
                call_any(ctx, self, callee, &arg_values).map_err(|err| err.or_loc(*loc))
            }
            Node::Def { var, init, is_macro } => {
                let value = match init {
                    Some(init) => self.eval(ctx, init)?,
                    None => Value::Nil,
                };
                let mut memo = AHashMap::new();
                let value = ctx.heap.deep_clone_persistent(value, &mut memo)?;
                ctx.env.var_mut(*var).root = value;
                if *is_macro {
                    ctx.env.var_mut(*var).is_macro = true;
                }
                Ok(Value::Var(*var))
            }
            Node::Throw { expr, loc } => {
                let value = self.eval(ctx, expr)?;
                Err(crate::error::RunError::user_exception(value).or_loc(*loc))
            }
            Node::Try { body, catch, finally } => {
                let outcome = self.eval(ctx, body);
                let outcome = match outcome {
                    Err(err) if err.is_catchable() && catch.is_some() => {
                        let clause = catch.as_ref().expect("checked above");
                        let payload = error_to_value(ctx, &err)?;
                        self.slots[clause.slot as usize] = payload;
                        self.eval(ctx, &clause.body)
                    }
                    other => other,
                };
                if let Some(finally) = finally {
                    // finally runs on every exit path; its own failure wins.
                    let cleanup = self.eval(ctx, finally);
                    cleanup?;
                }
                outcome
            }
            Node::Defmulti { var, name, dispatch } => {
                let dispatch_fn = self.eval(ctx, dispatch)?;
                poly::install_multifn(ctx, *var, *name, dispatch_fn)
            }
            Node::Defmethod {
                var,
                dispatch_val,
                method,
                loc,
            } => {
                let dispatch_value = self.eval(ctx, dispatch_val)?;
                let method = self.eval(ctx, method)?;
                poly::install_method(ctx, *var, dispatch_value, method)
                    .map_err(|err| err.or_loc(*loc))
            }
            Node::Defprotocol {
                var,
                name,
                sigs,
                method_vars,
            } => poly::install_protocol(ctx, *var, *name, sigs, method_vars),
            Node::ExtendType {
                type_kw,
                extensions,
                loc,
            } => {
                for (protocol_var, methods) in extensions {
                    for (method_name, method_node) in methods {
                        let method = self.eval(ctx, method_node)?;
                        poly::extend_type_method(ctx, *protocol_var, *type_kw, *method_name, method)
                            .map_err(|err| err.or_loc(*loc))?;
                    }
                }
                Ok(Value::Nil)
            }
        }
    }

    /// Materializes a closure: a prefix copy of the current slots, plus the
    /// self slot for named fns (patched to point at the closure itself).
    fn make_closure<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        fn_id: FnId,
    ) -> RunResult<HeapId> {
        let def = ctx.fns.get(fn_id);
        let mut captures: Vec<Value> = self
            .slots
            .iter()
            .take(def.capture_count as usize)
            .copied()
            .collect();
        // The analyzer guarantees capture_count live slots in this frame.
        captures.resize(def.capture_count as usize, Value::Nil);
        if def.has_self_slot {
            captures.push(Value::Nil);
        }
        let id = ctx.heap.alloc(HeapData::Fn(crate::function::Closure {
            fn_id,
            captures,
        }))?;
        if def.has_self_slot {
            let self_index = def.capture_count as usize;
            let HeapData::Fn(closure) = ctx.heap.get_mut(id) else {
                return Err(crate::error::RunError::internal("closure vanished"));
            };
            closure.captures[self_index] = Value::Ref(id);
        }
        Ok(id)
    }
}

impl<T: ResourceTracker> Caller<T> for Walker {
    fn call_closure(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        closure: HeapId,
        args: &[Value],
    ) -> RunResult<Value> {
        let HeapData::Fn(data) = ctx.heap.get(closure) else {
            return Err(crate::error::RunError::internal("call_closure on a non-fn"));
        };
        let captures = data.captures.clone();
        let fn_id = data.fn_id;
        let def = ctx.fns.get(fn_id);
        let fn_name = def
            .name
            .map_or_else(|| "<anonymous>".to_owned(), |n| ctx.interns.symbol_text(n));

        let Some(arity_index) = def.select_arity(args.len()) else {
            return Err(crate::error::RunError::arity_error(format!(
                "wrong number of args ({}) passed to {fn_name}",
                args.len()
            )));
        };
        let arity = &def.arities[arity_index];

        ctx.heap.tracker().check_call_depth(self.depth + 1)?;

        // Frame layout: captures (incl. self slot), parameters, body locals.
        let mut slots = captures;
        let fixed = arity.fixed_arity();
        slots.extend_from_slice(&args[..fixed]);
        if arity.variadic {
            if args.len() > fixed {
                let rest = crate::builtins::coll::list_from_values(ctx, &args[fixed..])?;
                slots.push(rest);
            } else {
                slots.push(Value::Nil);
            }
        }
        slots.resize(arity.slot_count as usize, Value::Nil);

        let saved_slots = std::mem::replace(&mut self.slots, slots);
        let saved_recur = self.recur.take();
        self.depth += 1;

        let param_base = def.param_base() as usize;
        let result = loop {
            let outcome = self.eval(ctx, &arity.body);
            match outcome {
                Err(err) => break Err(err),
                Ok(value) => match self.recur.take() {
                    None => break Ok(value),
                    Some(values) => {
                        for (offset, value) in values.into_iter().enumerate() {
                            self.slots[param_base + offset] = value;
                        }
                    }
                },
            }
        };

        self.depth -= 1;
        self.slots = saved_slots;
        self.recur = saved_recur;

        result.map_err(|mut err| {
            let ns = def
                .ns_name
                .map(|n| ctx.interns.symbol_text(n));
            err.push_frame(RawFrame {
                fn_name,
                ns,
                loc: None,
                is_builtin: false,
            });
            err
        })
    }
}
