//! The stack VM.
//!
//! State: a bounded value stack, a bounded call-frame stack, and a bounded
//! exception-handler stack. Each frame pre-reserves its proto's `local_count`
//! slots at `base`; expression evaluation happens above them. Builtins that
//! need to invoke user functions re-enter the VM through the [`Caller`]
//! implementation, which runs nested frames to completion.

use smallvec::SmallVec;

use crate::{
    builtins::{Caller, EvalCtx, call_any, coll, error_to_value, poly, strings},
    bytecode::{Chunk, Instruction, Opcode, compiler::ensure_compiled},
    error::{RawFrame, RunError, RunResult},
    heap::{HeapData, HeapId},
    resource::ResourceTracker,
    types::LazySeq,
    value::{TypeKw, Value, sequential_elements},
};

const STACK_SIZE: usize = 16384;
const FRAME_STACK_SIZE: usize = 512;
const HANDLER_STACK_SIZE: usize = 256;

/// Where a frame's instructions live: the top-level chunk or a compiled proto.
#[derive(Debug, Clone, Copy)]
enum FrameCode {
    Top,
    Proto(HeapId),
}

#[derive(Debug)]
struct Frame {
    code: FrameCode,
    ip: usize,
    /// Stack index of slot 0.
    base: usize,
    /// Stack is truncated here on return; the callee cell sits at this index.
    ret_sp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerKind {
    Catch,
    Finally,
}

#[derive(Debug)]
struct Handler {
    kind: HandlerKind,
    catch_ip: usize,
    sp: usize,
    frame_count: usize,
}

pub(crate) struct Vm {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    handlers: Vec<Handler>,
    /// Internal error travelling through a finally region, re-raised by the
    /// `throw_ex` at the end of the exceptional path.
    pending_rethrow: Option<RunError>,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            handlers: Vec::new(),
            pending_rethrow: None,
        }
    }

    /// Runs one compiled top-level chunk to completion.
    pub fn run_top<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        chunk: &Chunk,
    ) -> RunResult<Value> {
        self.stack.clear();
        self.frames.clear();
        self.handlers.clear();
        self.pending_rethrow = None;
        self.frames.push(Frame {
            code: FrameCode::Top,
            ip: 0,
            base: 0,
            ret_sp: 0,
        });
        self.exec(ctx, Some(chunk), 0)
    }

    fn exec<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        chunk: Option<&Chunk>,
        until_depth: usize,
    ) -> RunResult<Value> {
        loop {
            match self.step(ctx, chunk, until_depth) {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(err) => self.unwind(ctx, err, until_depth)?,
            }
        }
    }

    /// Delivers an error to the innermost eligible handler, or propagates.
    fn unwind<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        err: RunError,
        until_depth: usize,
    ) -> RunResult<()> {
        // A new error during a finally region supersedes the pending one.
        self.pending_rethrow = None;
        if !err.is_catchable() {
            return Err(err);
        }
        let eligible = self
            .handlers
            .last()
            .is_some_and(|handler| handler.frame_count > until_depth);
        if !eligible {
            return Err(err);
        }
        let handler = self.handlers.pop().expect("eligibility checked");
        self.frames.truncate(handler.frame_count);
        self.stack.truncate(handler.sp);
        match handler.kind {
            HandlerKind::Catch => {
                let payload = error_to_value(ctx, &err)?;
                self.push(payload)?;
            }
            HandlerKind::Finally => {
                // The compiled rethrow site re-raises the original error.
                self.pending_rethrow = Some(err);
                self.push(Value::Nil)?;
            }
        }
        self.frames
            .last_mut()
            .expect("handler frame survives unwinding")
            .ip = handler.catch_ip;
        Ok(())
    }

    fn push(&mut self, value: Value) -> RunResult<()> {
        if self.stack.len() >= STACK_SIZE {
            return Err(RunError::internal("value stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::internal("value stack underflow"))
    }

    fn fetch<T: ResourceTracker>(
        &self,
        ctx: &EvalCtx<'_, T>,
        chunk: Option<&Chunk>,
        code: FrameCode,
        ip: usize,
    ) -> RunResult<Instruction> {
        match code {
            FrameCode::Top => chunk
                .and_then(|c| c.code.get(ip))
                .copied()
                .ok_or_else(|| RunError::internal("instruction pointer out of range")),
            FrameCode::Proto(id) => match ctx.heap.get(id) {
                HeapData::FnProto(proto) => proto
                    .code
                    .get(ip)
                    .copied()
                    .ok_or_else(|| RunError::internal("instruction pointer out of range")),
                _ => Err(RunError::internal("frame proto vanished")),
            },
        }
    }

    fn const_at<T: ResourceTracker>(
        &self,
        ctx: &EvalCtx<'_, T>,
        chunk: Option<&Chunk>,
        code: FrameCode,
        index: u16,
    ) -> RunResult<Value> {
        match code {
            FrameCode::Top => chunk
                .and_then(|c| c.constants.get(index as usize))
                .copied()
                .ok_or_else(|| RunError::internal("constant index out of range")),
            FrameCode::Proto(id) => match ctx.heap.get(id) {
                HeapData::FnProto(proto) => proto
                    .constants
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| RunError::internal("constant index out of range")),
                _ => Err(RunError::internal("frame proto vanished")),
            },
        }
    }

    fn const_var<T: ResourceTracker>(
        &self,
        ctx: &EvalCtx<'_, T>,
        chunk: Option<&Chunk>,
        code: FrameCode,
        index: u16,
    ) -> RunResult<crate::env::VarId> {
        match self.const_at(ctx, chunk, code, index)? {
            Value::Var(var) => Ok(var),
            _ => Err(RunError::internal("expected a var constant")),
        }
    }

    #[expect(clippy::too_many_lines, reason = "the dispatch loop is one match")]
    fn step<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        chunk: Option<&Chunk>,
        until_depth: usize,
    ) -> RunResult<Option<Value>> {
        ctx.heap.tracker_mut().on_step()?;
        let (code, ip, base) = {
            let frame = self
                .frames
                .last()
                .ok_or_else(|| RunError::internal("execution without a frame"))?;
            (frame.code, frame.ip, frame.base)
        };
        let instr = self.fetch(ctx, chunk, code, ip)?;
        self.frames.last_mut().expect("frame exists").ip = ip + 1;

        match instr.opcode {
            Opcode::ConstLoad => {
                let value = self.const_at(ctx, chunk, code, instr.operand)?;
                self.push(value)?;
            }
            Opcode::Nil => self.push(Value::Nil)?,
            Opcode::TrueVal => self.push(Value::Bool(true))?,
            Opcode::FalseVal => self.push(Value::Bool(false))?,
            Opcode::Int0 => self.push(Value::Int(0))?,
            Opcode::Int1 => self.push(Value::Int(1))?,
            Opcode::IntNeg1 => self.push(Value::Int(-1))?,
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = *self
                    .stack
                    .last()
                    .ok_or_else(|| RunError::internal("dup on empty stack"))?;
                self.push(top)?;
            }
            Opcode::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(RunError::internal("swap needs two stack values"));
                }
                self.stack.swap(len - 1, len - 2);
            }
            Opcode::ScopeExit => {
                let result = self.pop()?;
                for _ in 0..instr.operand {
                    self.pop()?;
                }
                self.push(result)?;
            }
            Opcode::LocalLoad => self.local_load(base, instr.operand)?,
            Opcode::LocalLoad0 => self.local_load(base, 0)?,
            Opcode::LocalLoad1 => self.local_load(base, 1)?,
            Opcode::LocalLoad2 => self.local_load(base, 2)?,
            Opcode::LocalLoad3 => self.local_load(base, 3)?,
            Opcode::LocalStore => {
                let value = self.pop()?;
                let slot = base + instr.operand as usize;
                if slot >= self.stack.len() {
                    return Err(RunError::internal("local store out of frame"));
                }
                self.stack[slot] = value;
            }
            Opcode::VarLoad | Opcode::VarLoadDynamic => {
                let var = self.const_var(ctx, chunk, code, instr.operand)?;
                self.push(ctx.env.deref_var(var))?;
            }
            Opcode::Def | Opcode::DefMacro => {
                let var = self.const_var(ctx, chunk, code, instr.operand)?;
                let init = self.pop()?;
                let mut memo = ahash::AHashMap::new();
                let init = ctx.heap.deep_clone_persistent(init, &mut memo)?;
                ctx.env.var_mut(var).root = init;
                if instr.opcode == Opcode::DefMacro {
                    ctx.env.var_mut(var).is_macro = true;
                }
                self.push(Value::Var(var))?;
            }
            Opcode::Defmulti => {
                let packed = self.const_at(ctx, chunk, code, instr.operand)?;
                let items = sequential_elements(packed, ctx.heap)
                    .ok_or_else(|| RunError::internal("malformed defmulti constant"))?;
                let (Value::Var(var), Value::Symbol(name)) = (items[0], items[1]) else {
                    return Err(RunError::internal("malformed defmulti constant"));
                };
                let dispatch_fn = self.pop()?;
                let result = poly::install_multifn(ctx, var, name, dispatch_fn)?;
                self.push(result)?;
            }
            Opcode::Defmethod => {
                let var = self.const_var(ctx, chunk, code, instr.operand)?;
                let method = self.pop()?;
                let dispatch_value = self.pop()?;
                let result = poly::install_method(ctx, var, dispatch_value, method)?;
                self.push(result)?;
            }
            Opcode::Defprotocol => {
                let packed = self.const_at(ctx, chunk, code, instr.operand)?;
                let result = self.install_protocol_packed(ctx, packed)?;
                self.push(result)?;
            }
            Opcode::ExtendTypeMethod => {
                let packed = self.const_at(ctx, chunk, code, instr.operand)?;
                let items = sequential_elements(packed, ctx.heap)
                    .ok_or_else(|| RunError::internal("malformed extend-type constant"))?;
                let (Value::Var(var), Value::Keyword(type_name), Value::InternString(method_name)) =
                    (items[0], items[1], items[2])
                else {
                    return Err(RunError::internal("malformed extend-type constant"));
                };
                let type_kw = TypeKw::from_type_name(ctx.interns.keyword_name(type_name))
                    .ok_or_else(|| RunError::internal("malformed extend-type type keyword"))?;
                let method = self.pop()?;
                poly::extend_type_method(ctx, var, type_kw, method_name, method)?;
            }
            Opcode::Jump => self.jump_relative(instr.signed())?,
            Opcode::JumpIfFalse => {
                let value = self.pop()?;
                if !value.truthy() {
                    self.jump_relative(instr.signed())?;
                }
            }
            Opcode::JumpIfTrue => {
                let value = self.pop()?;
                if value.truthy() {
                    self.jump_relative(instr.signed())?;
                }
            }
            Opcode::JumpIfNil => {
                let value = self.pop()?;
                if matches!(value, Value::Nil) {
                    self.jump_relative(instr.signed())?;
                }
            }
            Opcode::JumpBack => {
                let frame = self.frames.last_mut().expect("frame exists");
                frame.ip = frame
                    .ip
                    .checked_sub(instr.operand as usize)
                    .ok_or_else(|| RunError::internal("backward jump before chunk start"))?;
            }
            Opcode::Call => self.do_call(ctx, instr.operand as usize, false)?,
            Opcode::Call0 => self.do_call(ctx, 0, false)?,
            Opcode::Call1 => self.do_call(ctx, 1, false)?,
            Opcode::Call2 => self.do_call(ctx, 2, false)?,
            Opcode::Call3 => self.do_call(ctx, 3, false)?,
            Opcode::TailCall => self.do_call(ctx, instr.operand as usize, true)?,
            Opcode::Ret => {
                let result = self.pop()?;
                let frame = self
                    .frames
                    .pop()
                    .ok_or_else(|| RunError::internal("return without a frame"))?;
                if self.frames.len() == until_depth {
                    return Ok(Some(result));
                }
                self.stack.truncate(frame.ret_sp);
                self.push(result)?;
            }
            Opcode::Closure | Opcode::ClosureMulti | Opcode::LazySeq => {
                let constant = self.const_at(ctx, chunk, code, instr.operand)?;
                let closure = self.make_closure(ctx, base, constant)?;
                if instr.opcode == Opcode::LazySeq {
                    let seq = ctx
                        .heap
                        .alloc(HeapData::LazySeq(LazySeq::Thunk { f: closure }))?;
                    self.push(Value::Ref(seq))?;
                } else {
                    self.push(closure)?;
                }
            }
            Opcode::LoopStart | Opcode::Nop => {}
            Opcode::Recur => {
                let slot_base = (instr.operand >> 8) as usize;
                let count = (instr.operand & 0xff) as usize;
                let mut values: SmallVec<[Value; 8]> = SmallVec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.pop()?);
                }
                values.reverse();
                let entry_sp = base + slot_base + count;
                if self.stack.len() < entry_sp {
                    return Err(RunError::internal("recur with an unbalanced stack"));
                }
                for (offset, value) in values.into_iter().enumerate() {
                    self.stack[base + slot_base + offset] = value;
                }
                // Reset any expression temporaries left above the loop slots.
                self.stack.truncate(entry_sp);
            }
            Opcode::LetfnFixup => {
                let slot_base = (instr.operand >> 8) as usize;
                let count = (instr.operand & 0xff) as usize;
                let values: Vec<Value> = (0..count)
                    .map(|i| self.stack[base + slot_base + i])
                    .collect();
                for &closure_value in &values {
                    let Value::Ref(id) = closure_value else { continue };
                    for (offset, &value) in values.iter().enumerate() {
                        let HeapData::Fn(closure) = ctx.heap.get_mut(id) else {
                            continue;
                        };
                        let capture_index = slot_base + offset;
                        if capture_index < closure.captures.len() {
                            closure.captures[capture_index] = value;
                        }
                    }
                }
            }
            Opcode::TryBegin | Opcode::FinallyBegin => {
                if self.handlers.len() >= HANDLER_STACK_SIZE {
                    return Err(RunError::internal("exception handler stack overflow"));
                }
                let kind = if instr.opcode == Opcode::TryBegin {
                    HandlerKind::Catch
                } else {
                    HandlerKind::Finally
                };
                let frame_ip = self.frames.last().expect("frame exists").ip;
                self.handlers.push(Handler {
                    kind,
                    catch_ip: frame_ip + instr.operand as usize,
                    sp: self.stack.len(),
                    frame_count: self.frames.len(),
                });
            }
            Opcode::CatchBegin | Opcode::TryEnd => {
                self.handlers
                    .pop()
                    .ok_or_else(|| RunError::internal("handler stack underflow"))?;
            }
            Opcode::ThrowEx => {
                let value = self.pop()?;
                if let Some(err) = self.pending_rethrow.take() {
                    return Err(err);
                }
                return Err(RunError::user_exception(value));
            }
            Opcode::DebugPrint => {
                let value = self.pop()?;
                let text = strings::stringify(ctx, self, value, true)?;
                ctx.print.write(&text);
                ctx.print.newline();
            }
        }
        Ok(None)
    }

    fn local_load(&mut self, base: usize, slot: u16) -> RunResult<()> {
        let index = base + slot as usize;
        let value = *self
            .stack
            .get(index)
            .ok_or_else(|| RunError::internal("local load out of frame"))?;
        self.push(value)
    }

    fn jump_relative(&mut self, delta: i16) -> RunResult<()> {
        let frame = self.frames.last_mut().expect("frame exists");
        let target = i64::try_from(frame.ip).expect("ip fits i64") + i64::from(delta);
        frame.ip = usize::try_from(target)
            .map_err(|_| RunError::internal("jump produced a negative instruction pointer"))?;
        Ok(())
    }

    fn install_protocol_packed<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        packed: Value,
    ) -> RunResult<Value> {
        let items = sequential_elements(packed, ctx.heap)
            .ok_or_else(|| RunError::internal("malformed defprotocol constant"))?;
        let (Value::Var(var), Value::Symbol(name)) = (items[0], items[1]) else {
            return Err(RunError::internal("malformed defprotocol constant"));
        };
        let sig_entries = sequential_elements(items[2], ctx.heap)
            .ok_or_else(|| RunError::internal("malformed defprotocol constant"))?;
        let mut sigs = Vec::with_capacity(sig_entries.len());
        let mut method_vars = Vec::with_capacity(sig_entries.len());
        for entry in sig_entries {
            let parts = sequential_elements(entry, ctx.heap)
                .ok_or_else(|| RunError::internal("malformed defprotocol constant"))?;
            let (Value::Var(method_var), Value::InternString(method_name), Value::Int(arity)) =
                (parts[0], parts[1], parts[2])
            else {
                return Err(RunError::internal("malformed defprotocol constant"));
            };
            sigs.push((method_name, u8::try_from(arity).unwrap_or(u8::MAX)));
            method_vars.push(method_var);
        }
        poly::install_protocol(ctx, var, name, &sigs, &method_vars)
    }

    /// Builds a closure over the current frame's slot prefix.
    fn make_closure<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        base: usize,
        constant: Value,
    ) -> RunResult<Value> {
        let proto_id = match constant {
            Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::FnProto(_)) => id,
            Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Vector(_)) => {
                let items = sequential_elements(constant, ctx.heap)
                    .ok_or_else(|| RunError::internal("malformed closure constant"))?;
                match items.first() {
                    Some(Value::Ref(first)) => *first,
                    _ => return Err(RunError::internal("malformed closure constant")),
                }
            }
            _ => return Err(RunError::internal("malformed closure constant")),
        };
        let HeapData::FnProto(proto) = ctx.heap.get(proto_id) else {
            return Err(RunError::internal("malformed closure constant"));
        };
        let fn_id = proto.fn_id;
        let capture_count = proto.capture_count as usize;
        let def = ctx.fns.get(fn_id);

        let mut captures = Vec::with_capacity(capture_count + usize::from(def.has_self_slot));
        for offset in 0..capture_count {
            captures.push(self.stack.get(base + offset).copied().unwrap_or(Value::Nil));
        }
        if def.has_self_slot {
            captures.push(Value::Nil);
        }
        let id = ctx.heap.alloc(HeapData::Fn(crate::function::Closure {
            fn_id,
            captures,
        }))?;
        if def.has_self_slot {
            let self_index = capture_count;
            let HeapData::Fn(closure) = ctx.heap.get_mut(id) else {
                return Err(RunError::internal("closure vanished"));
            };
            closure.captures[self_index] = Value::Ref(id);
        }
        Ok(Value::Ref(id))
    }

    fn do_call<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        argc: usize,
        tail: bool,
    ) -> RunResult<()> {
        let sp = self.stack.len();
        if sp < argc + 1 {
            return Err(RunError::internal("call without enough stack values"));
        }
        let callee_index = sp - argc - 1;
        let callee = self.stack[callee_index];
        let resolved = match callee {
            Value::Var(var) => ctx.env.deref_var(var),
            other => other,
        };
        let is_closure = matches!(
            resolved,
            Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Fn(_))
        );
        if is_closure {
            let Value::Ref(closure_id) = resolved else {
                unreachable!("checked above");
            };
            let args: SmallVec<[Value; 8]> = self.stack[callee_index + 1..].into();
            ctx.tracer.trace(crate::tracer::TraceEvent::Call);
            if tail {
                // Reuse the current frame: pop it and call in its place.
                let frame = self
                    .frames
                    .pop()
                    .ok_or_else(|| RunError::internal("tail call without a frame"))?;
                self.stack.truncate(frame.ret_sp);
                self.push_closure_frame(ctx, closure_id, &args, frame.ret_sp)?;
            } else {
                self.stack.truncate(callee_index);
                self.push_closure_frame(ctx, closure_id, &args, callee_index)?;
            }
            Ok(())
        } else {
            let args: Vec<Value> = self.stack[callee_index + 1..].to_vec();
            self.stack.truncate(callee_index);
            let result = call_any(ctx, self, callee, &args)?;
            self.push(result)
        }
    }

    fn push_closure_frame<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        closure_id: HeapId,
        args: &[Value],
        ret_sp: usize,
    ) -> RunResult<()> {
        if self.frames.len() >= FRAME_STACK_SIZE {
            return Err(RunError::internal("call frame stack overflow"));
        }
        ctx.heap.tracker().check_call_depth(self.frames.len() + 1)?;

        let HeapData::Fn(closure) = ctx.heap.get(closure_id) else {
            return Err(RunError::internal("call target is not a closure"));
        };
        let captures = closure.captures.clone();
        let fn_id = closure.fn_id;
        ensure_compiled(ctx, fn_id)?;
        let def = ctx.fns.get(fn_id);
        let fn_name = def
            .name
            .map_or_else(|| "<anonymous>".to_owned(), |n| ctx.interns.symbol_text(n));
        let Some(arity_index) = def.select_arity(args.len()) else {
            return Err(RunError::arity_error(format!(
                "wrong number of args ({}) passed to {fn_name}",
                args.len()
            )));
        };
        let protos = ctx.fns.compiled(fn_id).expect("compiled above");
        let proto_id = protos[arity_index];
        let arity = &def.arities[arity_index];
        let fixed = arity.fixed_arity();
        let local_count = arity.slot_count as usize;
        let variadic = arity.variadic;

        let base = self.stack.len();
        if base + local_count >= STACK_SIZE {
            return Err(RunError::internal("value stack overflow"));
        }
        self.stack.extend_from_slice(&captures);
        self.stack.extend_from_slice(&args[..fixed]);
        if variadic {
            if args.len() > fixed {
                let rest = coll::list_from_values(ctx, &args[fixed..])?;
                self.stack.push(rest);
            } else {
                self.stack.push(Value::Nil);
            }
        }
        while self.stack.len() < base + local_count {
            self.stack.push(Value::Nil);
        }
        self.frames.push(Frame {
            code: FrameCode::Proto(proto_id),
            ip: 0,
            base,
            ret_sp,
        });
        Ok(())
    }
}

impl<T: ResourceTracker> Caller<T> for Vm {
    fn call_closure(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        closure: HeapId,
        args: &[Value],
    ) -> RunResult<Value> {
        let entry_depth = self.frames.len();
        let entry_sp = self.stack.len();
        self.push_closure_frame(ctx, closure, args, entry_sp)?;
        match self.exec(ctx, None, entry_depth) {
            Ok(value) => Ok(value),
            Err(mut err) => {
                self.frames.truncate(entry_depth);
                self.stack.truncate(entry_sp);
                let def_name = match ctx.heap.get(closure) {
                    HeapData::Fn(data) => ctx
                        .fns
                        .get(data.fn_id)
                        .name
                        .map(|n| ctx.interns.symbol_text(n)),
                    _ => None,
                };
                err.push_frame(RawFrame {
                    fn_name: def_name.unwrap_or_else(|| "<anonymous>".to_owned()),
                    ns: None,
                    loc: None,
                    is_builtin: false,
                });
                Err(err)
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
