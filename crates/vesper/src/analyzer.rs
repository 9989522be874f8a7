//! The analyzer: syntactic [`Form`]s to resolved [`Node`]s.
//!
//! Responsibilities: special-form recognition, symbol resolution against the
//! lexical scope and the namespace system, macro expansion (bounded depth,
//! through the same call machinery as everything else), destructuring
//! desugared into `Let` chains, slot allocation, and `recur` tail-position
//! verification. Function bodies are extracted into the function registry at
//! analysis time; the node tree refers to them by id.

use crate::{
    builtins::{Builtin, Caller, EvalCtx, call_any, coll, strings},
    env::VarId,
    error::{ErrorKind, RunError, RunResult},
    form::{Form, FormKind, Loc},
    function::{FnArity, FnDef, FnId},
    heap::HeapData,
    intern::SymbolId,
    node::{Binding, CatchClause, Node},
    resource::ResourceTracker,
    tracer::TraceEvent,
    value::{TypeKw, Value, sequential_elements},
};

/// Expansion ceiling; catches runaway macro expanders.
const MAX_MACRO_DEPTH: u32 = 256;

/// Result of analyzing one top-level form.
#[derive(Debug)]
pub(crate) struct TopLevel {
    pub node: Node,
    /// Slot count of the synthetic top-level frame.
    pub slot_count: u16,
}

/// Analyzes one top-level form.
pub(crate) fn analyze_top<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    form: &Form,
) -> RunResult<TopLevel> {
    let mut analyzer = Analyzer {
        ctx,
        caller,
        frames: vec![FrameCtx::default()],
        macro_depth: 0,
    };
    let node = analyzer.analyze(form, false)?;
    let slot_count = analyzer.frames[0].max_slot;
    Ok(TopLevel { node, slot_count })
}

/// `macroexpand` / `macroexpand-1` over forms-as-values.
pub(crate) fn macroexpand_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
    once: bool,
) -> RunResult<Value> {
    let mut current = value;
    for _ in 0..MAX_MACRO_DEPTH {
        let Some(items) = list_value_items(ctx, current) else {
            return Ok(current);
        };
        let Some(&Value::Symbol(head)) = items.first() else {
            return Ok(current);
        };
        let Some(var) = ctx.env.resolve(head, ctx.interns) else {
            return Ok(current);
        };
        if !ctx.env.var(var).is_macro {
            return Ok(current);
        }
        let expander = ctx.env.var(var).root;
        ctx.tracer.trace(TraceEvent::MacroExpand);
        current = call_expander(ctx, caller, expander, &items[1..])?;
        if once {
            return Ok(current);
        }
    }
    Err(RunError::new(
        ErrorKind::MacroError,
        "macro expansion exceeded depth limit",
    ))
}

fn list_value_items<T: ResourceTracker>(ctx: &EvalCtx<'_, T>, value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::List(_)) => {
            sequential_elements(value, ctx.heap)
        }
        _ => None,
    }
}

/// Invokes a macro expander with unevaluated forms-as-values.
///
/// Native macro builtins are called directly (the ordinary call protocol
/// rejects macros as values); user macros are plain closures.
fn call_expander<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    expander: Value,
    args: &[Value],
) -> RunResult<Value> {
    match expander {
        Value::Builtin(builtin) if builtin.is_macro() => builtin.call(ctx, caller, args),
        other => call_any(ctx, caller, other, args),
    }
}

/// Converts a reader form into the runtime value it quotes to.
///
/// Allocations go to scratch and are deep-cloned into the persistent zone at
/// the end, because quoted constants are embedded in node trees that may be
/// retained by function definitions.
pub(crate) fn form_to_value<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    form: &Form,
) -> RunResult<Value> {
    let scratch = form_to_value_inner(ctx, form)?;
    let mut memo = ahash::AHashMap::new();
    ctx.heap.deep_clone_persistent(scratch, &mut memo)
}

fn form_to_value_inner<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    form: &Form,
) -> RunResult<Value> {
    Ok(match &form.kind {
        FormKind::Nil => Value::Nil,
        FormKind::Bool(b) => Value::Bool(*b),
        FormKind::Int(i) => Value::Int(*i),
        FormKind::Float(f) => Value::Float(*f),
        FormKind::Char(c) => Value::Char(*c),
        FormKind::Str(id) => Value::InternString(*id),
        FormKind::Keyword(id) => Value::Keyword(*id),
        FormKind::Symbol(id) => Value::Symbol(*id),
        FormKind::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(form_to_value_inner(ctx, item)?);
            }
            coll::list_from_values(ctx, &values)?
        }
        FormKind::Vector(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(form_to_value_inner(ctx, item)?);
            }
            coll::alloc_vector(ctx, values)?
        }
        FormKind::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let key = form_to_value_inner(ctx, k)?;
                let value = form_to_value_inner(ctx, v)?;
                pairs.push((key, value));
            }
            coll::map_from_pairs(ctx, &pairs)?
        }
        FormKind::Set(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(form_to_value_inner(ctx, item)?);
            }
            coll::set_from_items(ctx, &values)?
        }
        FormKind::Regex(pattern) => {
            Value::Ref(ctx.heap.alloc(HeapData::Pattern((**pattern).clone()))?)
        }
        FormKind::Tagged { tag, form } => {
            // In quoted data a tagged literal degrades to `(tag form)`.
            let inner = form_to_value_inner(ctx, form)?;
            let items = [Value::Symbol(*tag), inner];
            coll::list_from_values(ctx, &items)?
        }
        FormKind::HostValue(value) => *value,
    })
}

/// Converts a macro-expansion result back into a form for re-analysis.
fn value_to_form<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    value: Value,
    loc: Loc,
) -> Form {
    let kind = match value {
        Value::Nil => FormKind::Nil,
        Value::Bool(b) => FormKind::Bool(b),
        Value::Int(i) => FormKind::Int(i),
        Value::Float(f) => FormKind::Float(f),
        Value::Char(c) => FormKind::Char(c),
        Value::InternString(id) => FormKind::Str(id),
        Value::Keyword(id) => FormKind::Keyword(id),
        Value::Symbol(id) => FormKind::Symbol(id),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::List(_) => match sequential_elements(value, ctx.heap) {
                Some(items) => {
                    let mut forms = Vec::with_capacity(items.len());
                    for item in items {
                        forms.push(value_to_form(ctx, item, loc));
                    }
                    FormKind::List(forms)
                }
                None => FormKind::HostValue(value),
            },
            HeapData::Vector(v) => {
                let items = v.items.clone();
                let mut forms = Vec::with_capacity(items.len());
                for item in items {
                    forms.push(value_to_form(ctx, item, loc));
                }
                FormKind::Vector(forms)
            }
            HeapData::Map(m) => {
                let entries = m.entries.clone();
                let mut forms = Vec::with_capacity(entries.len());
                for (_, k, v) in entries {
                    let key = value_to_form(ctx, k, loc);
                    let val = value_to_form(ctx, v, loc);
                    forms.push((key, val));
                }
                FormKind::Map(forms)
            }
            HeapData::Set(s) => {
                let entries = s.entries.clone();
                let mut forms = Vec::with_capacity(entries.len());
                for (_, e) in entries {
                    forms.push(value_to_form(ctx, e, loc));
                }
                FormKind::Set(forms)
            }
            HeapData::Str(s) => {
                let content = s.clone();
                FormKind::Str(ctx.interns.intern_str(&content))
            }
            _ => FormKind::HostValue(value),
        },
        other => FormKind::HostValue(other),
    };
    Form::new(kind, loc)
}

#[derive(Debug, Clone, Copy)]
struct RecurTarget {
    slot_base: u16,
    arity: usize,
}

#[derive(Debug, Default)]
struct FrameCtx {
    /// Visible bindings, innermost last.
    locals: Vec<(SymbolId, u16)>,
    next_slot: u16,
    max_slot: u16,
    recur_targets: Vec<RecurTarget>,
}

impl FrameCtx {
    fn alloc_slot(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slot = self.max_slot.max(self.next_slot);
        slot
    }
}

struct Analyzer<'a, 'c, T: ResourceTracker> {
    ctx: &'a mut EvalCtx<'c, T>,
    caller: &'a mut dyn Caller<T>,
    frames: Vec<FrameCtx>,
    macro_depth: u32,
}

impl<T: ResourceTracker> Analyzer<'_, '_, T> {
    fn frame(&mut self) -> &mut FrameCtx {
        self.frames.last_mut().expect("analyzer always has a frame")
    }

    fn bind_local(&mut self, name: SymbolId) -> u16 {
        let slot = self.frame().alloc_slot();
        self.frame().locals.push((name, slot));
        slot
    }

    fn lookup_local(&self, name: SymbolId) -> Option<u16> {
        let frame = self.frames.last().expect("analyzer always has a frame");
        frame
            .locals
            .iter()
            .rev()
            .find(|&&(n, _)| n == name)
            .map(|&(_, slot)| slot)
    }

    fn analyze(&mut self, form: &Form, tail: bool) -> RunResult<Node> {
        match &form.kind {
            FormKind::Nil => Ok(Node::Constant(Value::Nil)),
            FormKind::Bool(b) => Ok(Node::Constant(Value::Bool(*b))),
            FormKind::Int(i) => Ok(Node::Constant(Value::Int(*i))),
            FormKind::Float(f) => Ok(Node::Constant(Value::Float(*f))),
            FormKind::Char(c) => Ok(Node::Constant(Value::Char(*c))),
            FormKind::Str(id) => Ok(Node::Constant(Value::InternString(*id))),
            FormKind::Keyword(id) => Ok(Node::Constant(Value::Keyword(*id))),
            FormKind::HostValue(value) => Ok(Node::Constant(*value)),
            FormKind::Regex(pattern) => {
                let id = self
                    .ctx
                    .heap
                    .alloc_persistent(HeapData::Pattern((**pattern).clone()))?;
                Ok(Node::Constant(Value::Ref(id)))
            }
            FormKind::Symbol(id) => self.analyze_symbol(*id, form.loc),
            FormKind::Vector(items) => {
                let args = items
                    .iter()
                    .map(|item| self.analyze(item, false))
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Node::Call {
                    f: Box::new(Node::Constant(Value::Builtin(Builtin::Vector))),
                    args,
                    loc: form.loc,
                })
            }
            FormKind::Map(entries) => {
                let mut args = Vec::with_capacity(entries.len() * 2);
                for (k, v) in entries {
                    args.push(self.analyze(k, false)?);
                    args.push(self.analyze(v, false)?);
                }
                Ok(Node::Call {
                    f: Box::new(Node::Constant(Value::Builtin(Builtin::HashMap))),
                    args,
                    loc: form.loc,
                })
            }
            FormKind::Set(items) => {
                let args = items
                    .iter()
                    .map(|item| self.analyze(item, false))
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Node::Call {
                    f: Box::new(Node::Constant(Value::Builtin(Builtin::HashSet))),
                    args,
                    loc: form.loc,
                })
            }
            FormKind::Tagged { tag, form: inner } => self.analyze_tagged(*tag, inner, form.loc, tail),
            FormKind::List(items) => self.analyze_list(form, items, tail),
        }
    }

    fn analyze_symbol(&mut self, id: SymbolId, loc: Loc) -> RunResult<Node> {
        if self.ctx.interns.symbol_ns(id).is_none()
            && let Some(index) = self.lookup_local(id)
        {
            return Ok(Node::LocalRef { name: id, index, loc });
        }
        match self.ctx.env.resolve(id, self.ctx.interns) {
            Some(var) => {
                if self.ctx.env.var(var).is_macro {
                    let text = self.ctx.interns.symbol_text(id);
                    return Err(RunError::with_loc(
                        ErrorKind::UndefinedSymbol,
                        format!("can't take the value of macro {text}"),
                        loc,
                    ));
                }
                Ok(Node::VarRef { var, loc })
            }
            None => {
                let text = self.ctx.interns.symbol_text(id);
                Err(RunError::undefined_symbol(&text).or_loc(loc))
            }
        }
    }

    fn analyze_tagged(
        &mut self,
        tag: SymbolId,
        inner: &Form,
        loc: Loc,
        tail: bool,
    ) -> RunResult<Node> {
        let reader_fn = self.ctx.env.data_readers.get(&tag).copied();
        let value = form_to_value(self.ctx, inner)?;
        let produced = match reader_fn {
            Some(f) => call_any(self.ctx, self.caller, f, &[value])?,
            None => match self.ctx.env.default_data_reader {
                Some(f) => call_any(self.ctx, self.caller, f, &[Value::Symbol(tag), value])?,
                None => {
                    let text = self.ctx.interns.symbol_text(tag);
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidToken,
                        format!("no reader function for tag {text}"),
                        loc,
                    ));
                }
            },
        };
        let realized = strings::realize_all(self.ctx, self.caller, produced)?;
        let form = value_to_form(self.ctx, realized, loc);
        self.analyze(&form, tail)
    }

    fn analyze_list(&mut self, form: &Form, items: &[Form], tail: bool) -> RunResult<Node> {
        let Some((head, rest)) = items.split_first() else {
            // The empty list evaluates to itself.
            let value = form_to_value(self.ctx, form)?;
            return Ok(Node::Constant(value));
        };
        if let FormKind::Symbol(head_sym) = head.kind
            && self.ctx.interns.symbol_ns(head_sym).is_none()
        {
            let name = self.ctx.interns.symbol_name(head_sym).to_owned();
            // Special forms take precedence over any local of the same name.
            match name.as_str() {
                "if" => return self.analyze_if(rest, form.loc, tail),
                "do" => return self.analyze_body(rest, tail),
                "let" => return self.analyze_let(rest, form.loc, tail),
                "fn" => return self.analyze_fn_form(rest, form.loc).map(|fn_id| Node::Fn { fn_id }),
                "loop" => return self.analyze_loop(rest, form.loc),
                "recur" => return self.analyze_recur(rest, form.loc, tail),
                "quote" => {
                    let [quoted] = rest else {
                        return Err(arity_err("quote", form.loc));
                    };
                    let value = form_to_value(self.ctx, quoted)?;
                    return Ok(Node::Quote { value });
                }
                "def" => return self.analyze_def(rest, form.loc, false),
                "defmacro" => return self.analyze_defmacro(rest, form.loc),
                "var" => {
                    let [sym_form] = rest else {
                        return Err(arity_err("var", form.loc));
                    };
                    let FormKind::Symbol(sym) = sym_form.kind else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "var expects a symbol",
                            form.loc,
                        ));
                    };
                    let var = self.ctx.env.resolve(sym, self.ctx.interns).ok_or_else(|| {
                        let text = self.ctx.interns.symbol_text(sym);
                        RunError::undefined_symbol(&text).or_loc(form.loc)
                    })?;
                    return Ok(Node::Constant(Value::Var(var)));
                }
                "throw" => {
                    let [expr] = rest else {
                        return Err(arity_err("throw", form.loc));
                    };
                    let expr = self.analyze(expr, false)?;
                    return Ok(Node::Throw {
                        expr: Box::new(expr),
                        loc: form.loc,
                    });
                }
                "try" => return self.analyze_try(rest, form.loc, tail),
                "letfn" => return self.analyze_letfn(rest, form.loc, tail),
                "lazy-seq" => {
                    let fn_id = self.register_fn(None, &[(Vec::new(), rest.to_vec())], form.loc)?;
                    return Ok(Node::LazySeq { fn_id });
                }
                "defmulti" => return self.analyze_defmulti(rest, form.loc),
                "defmethod" => return self.analyze_defmethod(rest, form.loc),
                "defprotocol" => return self.analyze_defprotocol(rest, form.loc),
                "extend-type" => return self.analyze_extend_type(rest, form.loc),
                _ => {}
            }
            // Macro call? Locals shadow macros.
            if self.lookup_local(head_sym).is_none()
                && let Some(var) = self.ctx.env.resolve(head_sym, self.ctx.interns)
                && self.ctx.env.var(var).is_macro
            {
                return self.expand_macro(var, rest, form.loc, tail);
            }
        }
        // Plain call.
        let f = self.analyze(head, false)?;
        let args = rest
            .iter()
            .map(|arg| self.analyze(arg, false))
            .collect::<RunResult<Vec<_>>>()?;
        Ok(Node::Call {
            f: Box::new(f),
            args,
            loc: form.loc,
        })
    }

    fn expand_macro(
        &mut self,
        var: VarId,
        rest: &[Form],
        loc: Loc,
        tail: bool,
    ) -> RunResult<Node> {
        self.macro_depth += 1;
        if self.macro_depth > MAX_MACRO_DEPTH {
            self.macro_depth -= 1;
            return Err(RunError::with_loc(
                ErrorKind::MacroError,
                "macro expansion exceeded depth limit",
                loc,
            ));
        }
        let result = (|| {
            let mut args = Vec::with_capacity(rest.len());
            for arg in rest {
                args.push(form_to_value(self.ctx, arg)?);
            }
            let expander = self.ctx.env.var(var).root;
            self.ctx.tracer.trace(TraceEvent::MacroExpand);
            let expanded = call_expander(self.ctx, self.caller, expander, &args).map_err(|err| {
                if err.kind == ErrorKind::UserException {
                    let name = self.ctx.interns.symbol_text(self.ctx.env.var(var).symbol);
                    RunError::with_loc(
                        ErrorKind::MacroError,
                        format!("macro {name} threw during expansion"),
                        loc,
                    )
                } else {
                    err.or_loc(loc)
                }
            })?;
            let realized = strings::realize_all(self.ctx, self.caller, expanded)?;
            let form = value_to_form(self.ctx, realized, loc);
            self.analyze(&form, tail)
        })();
        self.macro_depth -= 1;
        result
    }

    fn analyze_if(&mut self, rest: &[Form], loc: Loc, tail: bool) -> RunResult<Node> {
        let (test, then, els) = match rest {
            [test, then] => (test, then, None),
            [test, then, els] => (test, then, Some(els)),
            _ => return Err(arity_err("if", loc)),
        };
        let test = self.analyze(test, false)?;
        let then = self.analyze(then, tail)?;
        let els = match els {
            Some(form) => Some(Box::new(self.analyze(form, tail)?)),
            None => None,
        };
        Ok(Node::If {
            test: Box::new(test),
            then: Box::new(then),
            els,
        })
    }

    fn analyze_body(&mut self, forms: &[Form], tail: bool) -> RunResult<Node> {
        match forms {
            [] => Ok(Node::Constant(Value::Nil)),
            [single] => self.analyze(single, tail),
            _ => {
                let mut stmts = Vec::with_capacity(forms.len());
                let last = forms.len() - 1;
                for (i, form) in forms.iter().enumerate() {
                    stmts.push(self.analyze(form, tail && i == last)?);
                }
                Ok(Node::Do { stmts })
            }
        }
    }

    fn scope_checkpoint(&mut self) -> (usize, u16) {
        let frame = self.frame();
        (frame.locals.len(), frame.next_slot)
    }

    fn scope_restore(&mut self, checkpoint: (usize, u16)) {
        let frame = self.frame();
        frame.locals.truncate(checkpoint.0);
        frame.next_slot = checkpoint.1;
    }

    fn binding_pairs<'f>(&self, rest: &'f [Form], what: &str, loc: Loc) -> RunResult<(&'f Form, &'f [Form])> {
        let Some((bindings, body)) = rest.split_first() else {
            return Err(arity_err(what, loc));
        };
        let FormKind::Vector(pairs) = &bindings.kind else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                format!("{what} requires a binding vector"),
                loc,
            ));
        };
        if pairs.len() % 2 != 0 {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                format!("{what} requires an even number of binding forms"),
                loc,
            ));
        }
        Ok((bindings, body))
    }

    fn analyze_let(&mut self, rest: &[Form], loc: Loc, tail: bool) -> RunResult<Node> {
        let (bindings_form, body) = self.binding_pairs(rest, "let", loc)?;
        let FormKind::Vector(pairs) = &bindings_form.kind else {
            unreachable!("binding_pairs validated the vector");
        };
        let checkpoint = self.scope_checkpoint();
        let mut bindings = Vec::new();
        for pair in pairs.chunks(2) {
            let init = self.analyze(&pair[1], false)?;
            self.destructure(&pair[0], init, &mut bindings)?;
        }
        let body = self.analyze_body(body, tail)?;
        self.scope_restore(checkpoint);
        Ok(Node::Let {
            bindings,
            body: Box::new(body),
        })
    }

    fn analyze_loop(&mut self, rest: &[Form], loc: Loc) -> RunResult<Node> {
        let (bindings_form, body) = self.binding_pairs(rest, "loop", loc)?;
        let FormKind::Vector(pairs) = &bindings_form.kind else {
            unreachable!("binding_pairs validated the vector");
        };
        let checkpoint = self.scope_checkpoint();
        let mut bindings = Vec::new();
        let mut slot_base = None;
        // Loop bindings themselves must be plain slots so recur can overwrite
        // them; destructuring targets go through a temp and a nested let.
        let mut destructured: Vec<(Form, u16)> = Vec::new();
        for pair in pairs.chunks(2) {
            let init = self.analyze(&pair[1], false)?;
            let (name, needs_destructure) = match pair[0].kind {
                FormKind::Symbol(sym) => (sym, false),
                _ => (self.ctx.interns.gensym("loop"), true),
            };
            let slot = self.bind_local(name);
            slot_base.get_or_insert(slot);
            if needs_destructure {
                destructured.push((pair[0].clone(), slot));
            }
            bindings.push(Binding { slot, name, init });
        }
        let slot_base = slot_base.unwrap_or(self.frame().next_slot);
        let arity = bindings.len();
        self.frame().recur_targets.push(RecurTarget { slot_base, arity });

        let body = if destructured.is_empty() {
            self.analyze_body(body, true)?
        } else {
            let inner_checkpoint = self.scope_checkpoint();
            let mut inner_bindings = Vec::new();
            for (pattern, slot) in &destructured {
                let name = self.ctx.interns.gensym("loop");
                let init = Node::LocalRef {
                    name,
                    index: *slot,
                    loc,
                };
                self.destructure(pattern, init, &mut inner_bindings)?;
            }
            let inner_body = self.analyze_body(body, true)?;
            self.scope_restore(inner_checkpoint);
            Node::Let {
                bindings: inner_bindings,
                body: Box::new(inner_body),
            }
        };
        self.frame().recur_targets.pop();
        self.scope_restore(checkpoint);
        Ok(Node::Loop {
            bindings,
            body: Box::new(body),
        })
    }

    fn analyze_recur(&mut self, rest: &[Form], loc: Loc, tail: bool) -> RunResult<Node> {
        if !tail {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "recur is only allowed in tail position",
                loc,
            ));
        }
        let Some(&target) = self.frames.last().and_then(|f| f.recur_targets.last()) else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "recur outside of loop or fn",
                loc,
            ));
        };
        if rest.len() != target.arity {
            return Err(RunError::with_loc(
                ErrorKind::InvalidArity,
                format!(
                    "recur expects {} args to match its target, got {}",
                    target.arity,
                    rest.len()
                ),
                loc,
            ));
        }
        let args = rest
            .iter()
            .map(|arg| self.analyze(arg, false))
            .collect::<RunResult<Vec<_>>>()?;
        Ok(Node::Recur {
            args,
            slot_base: target.slot_base,
            loc,
        })
    }

    fn analyze_try(&mut self, rest: &[Form], loc: Loc, tail: bool) -> RunResult<Node> {
        let mut body_forms = Vec::new();
        let mut catch: Option<CatchClause> = None;
        let mut finally: Option<Box<Node>> = None;
        for form in rest {
            if let FormKind::List(items) = &form.kind {
                if items.first().is_some_and(|h| h.is_symbol(self.ctx.interns, "catch")) {
                    let [_, _class, binding, handler @ ..] = items.as_slice() else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "catch requires a class and a binding symbol",
                            form.loc,
                        ));
                    };
                    let FormKind::Symbol(name) = binding.kind else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "catch binding must be a symbol",
                            binding.loc,
                        ));
                    };
                    let checkpoint = self.scope_checkpoint();
                    let slot = self.bind_local(name);
                    // The catch body is in tail position iff the try is.
                    let body = self.analyze_body(handler, tail)?;
                    self.scope_restore(checkpoint);
                    catch = Some(CatchClause {
                        slot,
                        name,
                        body: Box::new(body),
                    });
                    continue;
                }
                if items.first().is_some_and(|h| h.is_symbol(self.ctx.interns, "finally")) {
                    let body = self.analyze_body(&items[1..], false)?;
                    finally = Some(Box::new(body));
                    continue;
                }
            }
            if catch.is_some() || finally.is_some() {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidBinding,
                    "try body forms must precede catch and finally",
                    form.loc,
                ));
            }
            body_forms.push(form.clone());
        }
        // Body results may unwind; never a recur tail position.
        let body = self.analyze_body(&body_forms, false)?;
        let _ = loc;
        Ok(Node::Try {
            body: Box::new(body),
            catch,
            finally,
        })
    }

    fn analyze_letfn(&mut self, rest: &[Form], loc: Loc, tail: bool) -> RunResult<Node> {
        let Some((bindings_form, body)) = rest.split_first() else {
            return Err(arity_err("letfn", loc));
        };
        let FormKind::Vector(fn_forms) = &bindings_form.kind else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "letfn requires a vector of fn definitions",
                loc,
            ));
        };
        let checkpoint = self.scope_checkpoint();
        // Bind every name first so the fns can see each other.
        let mut names = Vec::with_capacity(fn_forms.len());
        for fn_form in fn_forms {
            let FormKind::List(items) = &fn_form.kind else {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidBinding,
                    "letfn bindings must be (name [params] body) lists",
                    fn_form.loc,
                ));
            };
            let Some(FormKind::Symbol(name)) = items.first().map(|f| f.kind.clone()) else {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidBinding,
                    "letfn bindings must start with a name symbol",
                    fn_form.loc,
                ));
            };
            let slot = self.bind_local(name);
            names.push((name, slot));
        }
        let mut bindings = Vec::with_capacity(fn_forms.len());
        for (fn_form, &(name, slot)) in fn_forms.iter().zip(&names) {
            let FormKind::List(items) = &fn_form.kind else {
                unreachable!("validated above");
            };
            let fn_id = self.analyze_fn_form(&items[1..], fn_form.loc)?;
            bindings.push((slot, name, fn_id));
        }
        let body = self.analyze_body(body, tail)?;
        self.scope_restore(checkpoint);
        Ok(Node::Letfn {
            bindings,
            body: Box::new(body),
        })
    }

    fn analyze_def(&mut self, rest: &[Form], loc: Loc, is_macro: bool) -> RunResult<Node> {
        let (name_form, doc, init_form) = match rest {
            [name] => (name, None, None),
            [name, init] => (name, None, Some(init)),
            [name, doc, init] if matches!(doc.kind, FormKind::Str(_)) => {
                (name, Some(doc), Some(init))
            }
            _ => return Err(arity_err("def", loc)),
        };
        let FormKind::Symbol(name) = name_form.kind else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "def expects a symbol name",
                loc,
            ));
        };
        let current_ns = self.ctx.env.current_ns;
        let var = self.ctx.env.intern_var(current_ns, name, self.ctx.interns);
        if is_macro {
            self.ctx.env.var_mut(var).is_macro = true;
        }
        if let Some(FormKind::Str(doc_id)) = doc.map(|d| d.kind.clone()) {
            self.ctx.env.var_mut(var).doc = Some(doc_id);
        }
        self.apply_var_meta(var, name_form)?;
        let init = match init_form {
            Some(form) => Some(Box::new(self.analyze(form, false)?)),
            None => None,
        };
        Ok(Node::Def { var, init, is_macro })
    }

    /// Reads `^{:dynamic true}`-style metadata on a def name symbol.
    fn apply_var_meta(&mut self, var: VarId, name_form: &Form) -> RunResult<()> {
        let Some(meta) = &name_form.meta else {
            return Ok(());
        };
        let FormKind::Map(entries) = &meta.kind else {
            return Ok(());
        };
        let entries = entries.clone();
        for (key, value) in &entries {
            if key.is_keyword(self.ctx.interns, "dynamic") {
                self.ctx.env.var_mut(var).dynamic = matches!(value.kind, FormKind::Bool(true));
            } else if key.is_keyword(self.ctx.interns, "private") {
                self.ctx.env.var_mut(var).private = matches!(value.kind, FormKind::Bool(true));
            } else if key.is_keyword(self.ctx.interns, "doc") {
                if let FormKind::Str(doc) = value.kind {
                    self.ctx.env.var_mut(var).doc = Some(doc);
                }
            }
        }
        let meta_value = form_to_value(self.ctx, meta)?;
        self.ctx.env.var_mut(var).meta = Some(meta_value);
        Ok(())
    }

    fn analyze_defmacro(&mut self, rest: &[Form], loc: Loc) -> RunResult<Node> {
        let Some((name_form, fn_tail)) = rest.split_first() else {
            return Err(arity_err("defmacro", loc));
        };
        let FormKind::Symbol(name) = name_form.kind else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "defmacro expects a symbol name",
                loc,
            ));
        };
        let current_ns = self.ctx.env.current_ns;
        let var = self.ctx.env.intern_var(current_ns, name, self.ctx.interns);
        self.ctx.env.var_mut(var).is_macro = true;
        let fn_id = self.analyze_fn_tail(Some(name), fn_tail, loc)?;
        Ok(Node::Def {
            var,
            init: Some(Box::new(Node::Fn { fn_id })),
            is_macro: true,
        })
    }

    fn analyze_defmulti(&mut self, rest: &[Form], loc: Loc) -> RunResult<Node> {
        let [name_form, dispatch] = rest else {
            return Err(arity_err("defmulti", loc));
        };
        let FormKind::Symbol(name) = name_form.kind else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "defmulti expects a symbol name",
                loc,
            ));
        };
        let current_ns = self.ctx.env.current_ns;
        let var = self.ctx.env.intern_var(current_ns, name, self.ctx.interns);
        let dispatch = self.analyze(dispatch, false)?;
        Ok(Node::Defmulti {
            var,
            name,
            dispatch: Box::new(dispatch),
        })
    }

    fn analyze_defmethod(&mut self, rest: &[Form], loc: Loc) -> RunResult<Node> {
        let [name_form, dispatch_val, fn_tail @ ..] = rest else {
            return Err(arity_err("defmethod", loc));
        };
        if fn_tail.is_empty() {
            return Err(arity_err("defmethod", loc));
        }
        let FormKind::Symbol(name) = name_form.kind else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "defmethod expects a multimethod name",
                loc,
            ));
        };
        let var = self.ctx.env.resolve(name, self.ctx.interns).ok_or_else(|| {
            let text = self.ctx.interns.symbol_text(name);
            RunError::undefined_symbol(&text).or_loc(loc)
        })?;
        let dispatch_val = self.analyze(dispatch_val, false)?;
        let fn_id = self.analyze_fn_tail(None, fn_tail, loc)?;
        Ok(Node::Defmethod {
            var,
            dispatch_val: Box::new(dispatch_val),
            method: Box::new(Node::Fn { fn_id }),
            loc,
        })
    }

    fn analyze_defprotocol(&mut self, rest: &[Form], loc: Loc) -> RunResult<Node> {
        let Some((name_form, sig_forms)) = rest.split_first() else {
            return Err(arity_err("defprotocol", loc));
        };
        let FormKind::Symbol(name) = name_form.kind else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "defprotocol expects a symbol name",
                loc,
            ));
        };
        let current_ns = self.ctx.env.current_ns;
        let var = self.ctx.env.intern_var(current_ns, name, self.ctx.interns);
        let mut sigs = Vec::new();
        let mut method_vars = Vec::new();
        for sig in sig_forms {
            let FormKind::List(items) = &sig.kind else {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidBinding,
                    "protocol signatures must be (name [this ...]) lists",
                    sig.loc,
                ));
            };
            let [method_name_form, params, ..] = items.as_slice() else {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidBinding,
                    "protocol signatures must be (name [this ...]) lists",
                    sig.loc,
                ));
            };
            let FormKind::Symbol(method_sym) = method_name_form.kind else {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidBinding,
                    "protocol method name must be a symbol",
                    sig.loc,
                ));
            };
            let FormKind::Vector(param_forms) = &params.kind else {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidBinding,
                    "protocol method signature needs a parameter vector",
                    sig.loc,
                ));
            };
            let method_name = self.ctx.interns.symbol(method_sym).name;
            let arity = u8::try_from(param_forms.len()).unwrap_or(u8::MAX);
            let method_var = self.ctx.env.intern_var(current_ns, method_sym, self.ctx.interns);
            sigs.push((method_name, arity));
            method_vars.push(method_var);
        }
        Ok(Node::Defprotocol {
            var,
            name,
            sigs,
            method_vars,
        })
    }

    fn analyze_extend_type(&mut self, rest: &[Form], loc: Loc) -> RunResult<Node> {
        let Some((type_form, clauses)) = rest.split_first() else {
            return Err(arity_err("extend-type", loc));
        };
        let FormKind::Symbol(type_sym) = type_form.kind else {
            return Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                "extend-type expects a type name symbol",
                loc,
            ));
        };
        let type_name = self.ctx.interns.symbol_name(type_sym).to_owned();
        let Some(type_kw) = TypeKw::from_type_name(&type_name) else {
            return Err(RunError::with_loc(
                ErrorKind::TypeError,
                format!("unknown type name {type_name}"),
                type_form.loc,
            ));
        };
        let mut extensions: Vec<(VarId, Vec<(crate::intern::StringId, Node)>)> = Vec::new();
        for clause in clauses {
            match &clause.kind {
                FormKind::Symbol(protocol_sym) => {
                    let var = self
                        .ctx
                        .env
                        .resolve(*protocol_sym, self.ctx.interns)
                        .ok_or_else(|| {
                            let text = self.ctx.interns.symbol_text(*protocol_sym);
                            RunError::undefined_symbol(&text).or_loc(clause.loc)
                        })?;
                    extensions.push((var, Vec::new()));
                }
                FormKind::List(items) => {
                    let Some(target) = extensions.last_mut() else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "extend-type methods must follow a protocol name",
                            clause.loc,
                        ));
                    };
                    let [method_name_form, ..] = items.as_slice() else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "extend-type method must be (name [this ...] body)",
                            clause.loc,
                        ));
                    };
                    let FormKind::Symbol(method_sym) = method_name_form.kind else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "extend-type method name must be a symbol",
                            clause.loc,
                        ));
                    };
                    let method_name = self.ctx.interns.symbol(method_sym).name;
                    let fn_id = self.analyze_fn_tail(None, &items[1..], clause.loc)?;
                    target.1.push((method_name, Node::Fn { fn_id }));
                }
                _ => {
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidBinding,
                        "extend-type clauses must be protocol names or method lists",
                        clause.loc,
                    ));
                }
            }
        }
        Ok(Node::ExtendType {
            type_kw,
            extensions,
            loc,
        })
    }

    /// Analyzes the tail of a `fn` form: optional name then arities.
    fn analyze_fn_form(&mut self, rest: &[Form], loc: Loc) -> RunResult<FnId> {
        let (name, tail) = match rest.split_first() {
            Some((first, tail)) if matches!(first.kind, FormKind::Symbol(_)) => {
                let FormKind::Symbol(name) = first.kind else {
                    unreachable!("checked above");
                };
                (Some(name), tail)
            }
            _ => (None, rest),
        };
        self.analyze_fn_tail(name, tail, loc)
    }

    /// Analyzes arity clauses: either `[params] body...` or
    /// `([params] body...)+`.
    fn analyze_fn_tail(
        &mut self,
        name: Option<SymbolId>,
        tail: &[Form],
        loc: Loc,
    ) -> RunResult<FnId> {
        let mut arities: Vec<(Vec<Form>, Vec<Form>)> = Vec::new();
        match tail.first().map(|f| &f.kind) {
            Some(FormKind::Vector(params)) => {
                arities.push((params.clone(), tail[1..].to_vec()));
            }
            Some(FormKind::List(_)) => {
                for clause in tail {
                    let FormKind::List(items) = &clause.kind else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "fn arity clause must be a list",
                            clause.loc,
                        ));
                    };
                    let Some((params, body)) = items.split_first() else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "fn arity clause must start with a parameter vector",
                            clause.loc,
                        ));
                    };
                    let FormKind::Vector(param_forms) = &params.kind else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "fn arity clause must start with a parameter vector",
                            params.loc,
                        ));
                    };
                    arities.push((param_forms.clone(), body.to_vec()));
                }
            }
            _ => {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidBinding,
                    "fn requires a parameter vector",
                    loc,
                ));
            }
        }
        self.register_fn(name, &arities, loc)
    }

    /// Builds and registers the `FnDef` for a set of arity clauses.
    fn register_fn(
        &mut self,
        name: Option<SymbolId>,
        arities: &[(Vec<Form>, Vec<Form>)],
        loc: Loc,
    ) -> RunResult<FnId> {
        let capture_count = self.frames.last().expect("frame exists").next_slot;
        let has_self_slot = name.is_some();
        let current_ns_name = self.ctx.env.ns(self.ctx.env.current_ns).name;
        let ns_sym = {
            let text = self.ctx.interns.get_str(current_ns_name).to_owned();
            self.ctx.interns.intern_symbol(None, &text)
        };

        let mut compiled_arities = Vec::with_capacity(arities.len());
        for (param_forms, body_forms) in arities {
            // The closure frame: captured slots keep their indices, then the
            // self slot for named fns, then parameters.
            let outer_locals = self.frames.last().expect("frame exists").locals.clone();
            let mut frame = FrameCtx {
                locals: outer_locals,
                next_slot: capture_count,
                max_slot: capture_count,
                recur_targets: Vec::new(),
            };
            if let Some(self_name) = name {
                let slot = frame.alloc_slot();
                frame.locals.push((self_name, slot));
            }
            self.frames.push(frame);

            let mut params = Vec::new();
            let mut variadic = false;
            let mut destructured: Vec<(Form, u16)> = Vec::new();
            let param_base = self.frame().next_slot;
            let mut iter = param_forms.iter().peekable();
            while let Some(param) = iter.next() {
                if param.is_symbol(self.ctx.interns, "&") {
                    let Some(rest_param) = iter.next() else {
                        self.frames.pop();
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "& must be followed by a rest parameter",
                            loc,
                        ));
                    };
                    if iter.peek().is_some() {
                        self.frames.pop();
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            "only one rest parameter is allowed",
                            loc,
                        ));
                    }
                    variadic = true;
                    let (sym, slot) = self.bind_param(rest_param, &mut destructured);
                    params.push(sym);
                    let _ = slot;
                    break;
                }
                let (sym, slot) = self.bind_param(param, &mut destructured);
                params.push(sym);
                let _ = slot;
            }

            self.frame()
                .recur_targets
                .push(RecurTarget { slot_base: param_base, arity: params.len() });

            let body = if destructured.is_empty() {
                self.analyze_body(body_forms, true)?
            } else {
                let mut bindings = Vec::new();
                for (pattern, slot) in &destructured {
                    let tmp_name = self.ctx.interns.gensym("p");
                    let init = Node::LocalRef {
                        name: tmp_name,
                        index: *slot,
                        loc,
                    };
                    self.destructure(pattern, init, &mut bindings)?;
                }
                let inner = self.analyze_body(body_forms, true)?;
                Node::Let {
                    bindings,
                    body: Box::new(inner),
                }
            };

            let frame = self.frames.pop().expect("arity frame");
            compiled_arities.push(FnArity {
                params,
                variadic,
                slot_count: frame.max_slot,
                body,
            });
        }

        let def = FnDef {
            name,
            ns_name: Some(ns_sym),
            arities: compiled_arities,
            capture_count,
            has_self_slot,
        };
        Ok(self.ctx.fns.register(def))
    }

    /// Binds one parameter: plain symbols get their slot directly,
    /// destructuring patterns get a temp slot resolved in the body prelude.
    fn bind_param(&mut self, param: &Form, destructured: &mut Vec<(Form, u16)>) -> (SymbolId, u16) {
        match param.kind {
            FormKind::Symbol(sym) => {
                let slot = self.bind_local(sym);
                (sym, slot)
            }
            _ => {
                let tmp = self.ctx.interns.gensym("p");
                let slot = self.bind_local(tmp);
                destructured.push((param.clone(), slot));
                (tmp, slot)
            }
        }
    }

    /// Desugars a binding target against an init expression into a flat list
    /// of slot bindings. Handles sequential and associative patterns with
    /// arbitrary nesting.
    fn destructure(
        &mut self,
        target: &Form,
        init: Node,
        out: &mut Vec<Binding>,
    ) -> RunResult<()> {
        match &target.kind {
            FormKind::Symbol(sym) => {
                if self.ctx.interns.symbol_ns(*sym).is_some() {
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidBinding,
                        "cannot bind a qualified symbol",
                        target.loc,
                    ));
                }
                let slot = self.bind_local(*sym);
                out.push(Binding {
                    slot,
                    name: *sym,
                    init,
                });
                Ok(())
            }
            FormKind::Vector(items) => self.destructure_sequential(items, init, target.loc, out),
            FormKind::Map(entries) => self.destructure_associative(entries, init, target.loc, out),
            _ => Err(RunError::with_loc(
                ErrorKind::InvalidBinding,
                format!("unsupported binding target: {}", target.kind.describe()),
                target.loc,
            )),
        }
    }

    fn destructure_sequential(
        &mut self,
        items: &[Form],
        init: Node,
        loc: Loc,
        out: &mut Vec<Binding>,
    ) -> RunResult<()> {
        let tmp = self.ctx.interns.gensym("vec");
        let tmp_slot = self.bind_local(tmp);
        out.push(Binding {
            slot: tmp_slot,
            name: tmp,
            init,
        });
        let tmp_ref = |name, loc| Node::LocalRef { name, index: tmp_slot, loc };

        let mut index = 0i64;
        let mut iter = items.iter().peekable();
        while let Some(item) = iter.next() {
            if item.is_symbol(self.ctx.interns, "&") {
                let Some(rest_target) = iter.next() else {
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidBinding,
                        "& must be followed by a rest binding",
                        loc,
                    ));
                };
                // (seq (drop index tmp))
                let drop_call = Node::Call {
                    f: Box::new(Node::Constant(Value::Builtin(Builtin::Drop))),
                    args: vec![Node::Constant(Value::Int(index)), tmp_ref(tmp, loc)],
                    loc,
                };
                let rest_init = Node::Call {
                    f: Box::new(Node::Constant(Value::Builtin(Builtin::Seq))),
                    args: vec![drop_call],
                    loc,
                };
                self.destructure(rest_target, rest_init, out)?;
                continue;
            }
            if item.is_keyword(self.ctx.interns, "as") {
                let Some(as_target) = iter.next() else {
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidBinding,
                        ":as must be followed by a binding symbol",
                        loc,
                    ));
                };
                self.destructure(as_target, tmp_ref(tmp, loc), out)?;
                continue;
            }
            let elem_init = Node::Call {
                f: Box::new(Node::Constant(Value::Builtin(Builtin::Nth))),
                args: vec![
                    tmp_ref(tmp, loc),
                    Node::Constant(Value::Int(index)),
                    Node::Constant(Value::Nil),
                ],
                loc,
            };
            self.destructure(item, elem_init, out)?;
            index += 1;
        }
        Ok(())
    }

    fn destructure_associative(
        &mut self,
        entries: &[(Form, Form)],
        init: Node,
        loc: Loc,
        out: &mut Vec<Binding>,
    ) -> RunResult<()> {
        let tmp = self.ctx.interns.gensym("map");
        let tmp_slot = self.bind_local(tmp);
        out.push(Binding {
            slot: tmp_slot,
            name: tmp,
            init,
        });
        let tmp_ref = |name, loc| Node::LocalRef { name, index: tmp_slot, loc };

        // Collect :or defaults first; they apply to any key-bound symbol.
        let mut defaults: Vec<(SymbolId, Form)> = Vec::new();
        for (key, value) in entries {
            if key.is_keyword(self.ctx.interns, "or") {
                let FormKind::Map(default_entries) = &value.kind else {
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidBinding,
                        ":or requires a map of defaults",
                        value.loc,
                    ));
                };
                for (dk, dv) in default_entries {
                    let FormKind::Symbol(sym) = dk.kind else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            ":or keys must be symbols",
                            dk.loc,
                        ));
                    };
                    defaults.push((sym, dv.clone()));
                }
            }
        }
        let default_for = |analyzer: &mut Self, sym: SymbolId| -> RunResult<Node> {
            for (name, form) in &defaults {
                if *name == sym {
                    return analyzer.analyze(form, false);
                }
            }
            Ok(Node::Constant(Value::Nil))
        };

        for (key, value) in entries {
            if key.is_keyword(self.ctx.interns, "or") {
                continue;
            }
            if key.is_keyword(self.ctx.interns, "as") {
                self.destructure(value, tmp_ref(tmp, loc), out)?;
                continue;
            }
            let shorthand = if key.is_keyword(self.ctx.interns, "keys") {
                Some(Shorthand::Keys)
            } else if key.is_keyword(self.ctx.interns, "strs") {
                Some(Shorthand::Strs)
            } else if key.is_keyword(self.ctx.interns, "syms") {
                Some(Shorthand::Syms)
            } else {
                None
            };
            if let Some(shorthand) = shorthand {
                let FormKind::Vector(symbols) = &value.kind else {
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidBinding,
                        ":keys/:strs/:syms require a vector of symbols",
                        value.loc,
                    ));
                };
                for symbol_form in symbols {
                    let FormKind::Symbol(sym) = symbol_form.kind else {
                        return Err(RunError::with_loc(
                            ErrorKind::InvalidBinding,
                            ":keys/:strs/:syms entries must be symbols",
                            symbol_form.loc,
                        ));
                    };
                    let name = self.ctx.interns.symbol_name(sym).to_owned();
                    let key_value = match shorthand {
                        Shorthand::Keys => {
                            Value::Keyword(self.ctx.interns.intern_keyword(None, &name))
                        }
                        Shorthand::Strs => {
                            Value::InternString(self.ctx.interns.intern_str(&name))
                        }
                        Shorthand::Syms => {
                            Value::Symbol(self.ctx.interns.intern_symbol(None, &name))
                        }
                    };
                    let default = default_for(self, sym)?;
                    let get_call = Node::Call {
                        f: Box::new(Node::Constant(Value::Builtin(Builtin::Get))),
                        args: vec![tmp_ref(tmp, loc), Node::Constant(key_value), default],
                        loc,
                    };
                    let slot = self.bind_local(sym);
                    out.push(Binding {
                        slot,
                        name: sym,
                        init: get_call,
                    });
                }
                continue;
            }
            // `pattern key-literal` entry.
            let key_value = form_to_value(self.ctx, value)?;
            let default = match key.kind {
                FormKind::Symbol(sym) => default_for(self, sym)?,
                _ => Node::Constant(Value::Nil),
            };
            let get_call = Node::Call {
                f: Box::new(Node::Constant(Value::Builtin(Builtin::Get))),
                args: vec![tmp_ref(tmp, loc), Node::Constant(key_value), default],
                loc,
            };
            self.destructure(key, get_call, out)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Shorthand {
    Keys,
    Strs,
    Syms,
}

fn arity_err(what: &str, loc: Loc) -> RunError {
    RunError::with_loc(
        ErrorKind::InvalidArity,
        format!("wrong number of forms for {what}"),
        loc,
    )
}
