//! Node-tree to bytecode lowering.
//!
//! Frame layout: every frame pre-reserves `local_count` slots at its base
//! (captures and parameters filled by the call protocol, the rest nil), and
//! expression evaluation uses the stack above them. `let` therefore compiles
//! to init + `local_store`, and `recur` is a stack-and-slot reset followed by
//! a backward jump. Function protos are compiled once per definition and
//! memoized in the function registry.

use super::{
    chunk::{Chunk, FnProto, Instruction},
    op::Opcode,
};
use crate::{
    builtins::EvalCtx,
    error::{RunError, RunResult},
    function::FnId,
    heap::HeapData,
    node::Node,
    resource::ResourceTracker,
    types::Vector,
    value::Value,
};

/// Compiles one analyzed top-level node into a chunk.
///
/// The chunk begins by reserving the top-level frame's slots and ends with
/// `ret`.
pub(crate) fn compile_top<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    node: &Node,
    slot_count: u16,
) -> RunResult<Chunk> {
    let mut builder = ChunkBuilder::default();
    for _ in 0..slot_count {
        builder.emit(Opcode::Nil);
    }
    let mut compiler = Compiler {
        loops: Vec::new(),
        in_fn: false,
    };
    compiler.compile(ctx, &mut builder, node, false)?;
    builder.emit(Opcode::Ret);
    Ok(Chunk {
        code: builder.code,
        constants: builder.constants,
    })
}

/// Compiles every arity of a function definition to protos, memoized in the
/// registry. Also reachable from the VM for closures created by the walker.
pub(crate) fn ensure_compiled<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    fn_id: FnId,
) -> RunResult<()> {
    if ctx.fns.compiled(fn_id).is_some() {
        return Ok(());
    }
    let def = ctx.fns.get(fn_id);
    let name = def.name.map(|n| ctx.interns.symbol_text(n));
    let mut protos = Vec::with_capacity(def.arities.len());
    for arity in &def.arities {
        let mut builder = ChunkBuilder::default();
        let mut compiler = Compiler {
            loops: vec![LoopCtx {
                slot_base: def.param_base(),
                body_start: 0,
            }],
            in_fn: true,
        };
        compiler.compile(ctx, &mut builder, &arity.body, true)?;
        builder.emit(Opcode::Ret);
        let proto = FnProto {
            name: name.clone(),
            fn_id,
            arity: u8::try_from(arity.fixed_arity()).map_err(|_| {
                RunError::internal("function arity exceeds encodable range")
            })?,
            variadic: arity.variadic,
            local_count: arity.slot_count,
            code: builder.code,
            constants: builder.constants,
            capture_offset: 0,
            capture_count: def.capture_count,
        };
        let id = ctx.heap.alloc_persistent(HeapData::FnProto(proto))?;
        protos.push(id);
    }
    ctx.fns.set_compiled(fn_id, protos);
    Ok(())
}

#[derive(Debug, Default)]
struct ChunkBuilder {
    code: Vec<Instruction>,
    constants: Vec<Value>,
}

impl ChunkBuilder {
    fn emit(&mut self, opcode: Opcode) {
        self.code.push(Instruction::new(opcode));
    }

    fn emit_with(&mut self, opcode: Opcode, operand: u16) {
        self.code.push(Instruction::with(opcode, operand));
    }

    fn add_const(&mut self, value: Value) -> RunResult<u16> {
        let index = u16::try_from(self.constants.len())
            .map_err(|_| RunError::internal("constant pool exceeds 65536 entries"))?;
        self.constants.push(value);
        Ok(index)
    }

    /// Emits a forward jump with a placeholder offset; patch later.
    fn emit_jump(&mut self, opcode: Opcode) -> usize {
        let at = self.code.len();
        self.emit_with(opcode, 0);
        at
    }

    /// Patches a forward jump to target the next emitted instruction.
    fn patch_jump(&mut self, at: usize) -> RunResult<()> {
        let delta = self.code.len() - at - 1;
        self.code[at].operand = u16::try_from(delta)
            .map_err(|_| RunError::internal("jump offset exceeds encodable range"))?;
        Ok(())
    }

    /// Emits a backward jump to an absolute instruction index.
    fn emit_jump_back(&mut self, target: usize) -> RunResult<()> {
        let delta = self.code.len() + 1 - target;
        let operand = u16::try_from(delta)
            .map_err(|_| RunError::internal("backward jump exceeds encodable range"))?;
        self.emit_with(Opcode::JumpBack, operand);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct LoopCtx {
    slot_base: u16,
    body_start: usize,
}

struct Compiler {
    loops: Vec<LoopCtx>,
    /// Tail calls only reuse frames inside compiled function bodies.
    in_fn: bool,
}

fn pack_slots(slot_base: u16, count: usize) -> RunResult<u16> {
    if slot_base > 0xff || count > 0xff {
        return Err(RunError::internal(
            "loop binding layout exceeds encodable range",
        ));
    }
    Ok((slot_base << 8) | u16::try_from(count).expect("count checked above"))
}

impl Compiler {
    fn compile<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        b: &mut ChunkBuilder,
        node: &Node,
        tail: bool,
    ) -> RunResult<()> {
        match node {
            Node::Constant(value) | Node::Quote { value } => self.compile_constant(b, *value),
            Node::VarRef { var, .. } => {
                let index = b.add_const(Value::Var(*var))?;
                if ctx.env.var(*var).dynamic {
                    b.emit_with(Opcode::VarLoadDynamic, index);
                } else {
                    b.emit_with(Opcode::VarLoad, index);
                }
                Ok(())
            }
            Node::LocalRef { index, .. } => {
                match index {
                    0 => b.emit(Opcode::LocalLoad0),
                    1 => b.emit(Opcode::LocalLoad1),
                    2 => b.emit(Opcode::LocalLoad2),
                    3 => b.emit(Opcode::LocalLoad3),
                    _ => b.emit_with(Opcode::LocalLoad, *index),
                }
                Ok(())
            }
            Node::If { test, then, els } => {
                self.compile(ctx, b, test, false)?;
                let to_else = b.emit_jump(Opcode::JumpIfFalse);
                self.compile(ctx, b, then, tail)?;
                let to_end = b.emit_jump(Opcode::Jump);
                b.patch_jump(to_else)?;
                match els {
                    Some(els) => self.compile(ctx, b, els, tail)?,
                    None => b.emit(Opcode::Nil),
                }
                b.patch_jump(to_end)
            }
            Node::Do { stmts } => {
                let Some((last, rest)) = stmts.split_last() else {
                    b.emit(Opcode::Nil);
                    return Ok(());
                };
                for stmt in rest {
                    self.compile(ctx, b, stmt, false)?;
                    b.emit(Opcode::Pop);
                }
                self.compile(ctx, b, last, tail)
            }
            Node::Let { bindings, body } => {
                for binding in bindings {
                    self.compile(ctx, b, &binding.init, false)?;
                    b.emit_with(Opcode::LocalStore, binding.slot);
                }
                self.compile(ctx, b, body, tail)
            }
            Node::Loop { bindings, body } => {
                let slot_base = bindings.first().map_or(0, |binding| binding.slot);
                for binding in bindings {
                    self.compile(ctx, b, &binding.init, false)?;
                    b.emit_with(Opcode::LocalStore, binding.slot);
                }
                b.emit_with(Opcode::LoopStart, slot_base);
                let body_start = b.code.len();
                self.loops.push(LoopCtx { slot_base, body_start });
                // The loop body is its own recur target; calls in it are not
                // frame-reusing tail calls of the enclosing function.
                self.compile(ctx, b, body, false)?;
                self.loops.pop();
                Ok(())
            }
            Node::Recur { args, slot_base, loc } => {
                let Some(target) = self.loops.last().copied() else {
                    return Err(RunError::with_loc(
                        crate::error::ErrorKind::InvalidBinding,
                        "recur outside of loop or fn",
                        *loc,
                    ));
                };
                debug_assert_eq!(target.slot_base, *slot_base);
                for arg in args {
                    self.compile(ctx, b, arg, false)?;
                }
                b.emit_with(Opcode::Recur, pack_slots(target.slot_base, args.len())?);
                b.emit_jump_back(target.body_start)
            }
            Node::Letfn { bindings, body } => {
                let Some(first) = bindings.first() else {
                    return self.compile(ctx, b, body, tail);
                };
                for &(slot, _, fn_id) in bindings {
                    self.emit_closure(ctx, b, fn_id, Opcode::Closure)?;
                    b.emit_with(Opcode::LocalStore, slot);
                }
                b.emit_with(Opcode::LetfnFixup, pack_slots(first.0, bindings.len())?);
                self.compile(ctx, b, body, tail)
            }
            Node::Fn { fn_id } => self.emit_closure(ctx, b, *fn_id, Opcode::Closure),
            Node::LazySeq { fn_id } => self.emit_closure(ctx, b, *fn_id, Opcode::LazySeq),
            Node::Call { f, args, .. } => {
                self.compile(ctx, b, f, false)?;
                for arg in args {
                    self.compile(ctx, b, arg, false)?;
                }
                let argc = u16::try_from(args.len())
                    .map_err(|_| RunError::internal("call argument count exceeds range"))?;
                if tail && self.in_fn {
                    b.emit_with(Opcode::TailCall, argc);
                } else {
                    match argc {
                        0 => b.emit(Opcode::Call0),
                        1 => b.emit(Opcode::Call1),
                        2 => b.emit(Opcode::Call2),
                        3 => b.emit(Opcode::Call3),
                        n => b.emit_with(Opcode::Call, n),
                    }
                }
                Ok(())
            }
            Node::Def { var, init, is_macro } => {
                match init {
                    Some(init) => self.compile(ctx, b, init, false)?,
                    None => b.emit(Opcode::Nil),
                }
                let index = b.add_const(Value::Var(*var))?;
                b.emit_with(
                    if *is_macro { Opcode::DefMacro } else { Opcode::Def },
                    index,
                );
                Ok(())
            }
            Node::Throw { expr, .. } => {
                self.compile(ctx, b, expr, false)?;
                b.emit(Opcode::ThrowEx);
                Ok(())
            }
            Node::Try { body, catch, finally } => self.compile_try(ctx, b, body, catch, finally),
            Node::Defmulti { var, name, dispatch } => {
                self.compile(ctx, b, dispatch, false)?;
                let packed = persistent_vector(ctx, vec![Value::Var(*var), Value::Symbol(*name)])?;
                let index = b.add_const(packed)?;
                b.emit_with(Opcode::Defmulti, index);
                Ok(())
            }
            Node::Defmethod {
                var,
                dispatch_val,
                method,
                ..
            } => {
                self.compile(ctx, b, dispatch_val, false)?;
                self.compile(ctx, b, method, false)?;
                let index = b.add_const(Value::Var(*var))?;
                b.emit_with(Opcode::Defmethod, index);
                Ok(())
            }
            Node::Defprotocol {
                var,
                name,
                sigs,
                method_vars,
            } => {
                // Pack [var name [[mvar name-str arity] ...]] as one constant.
                let mut sig_values = Vec::with_capacity(sigs.len());
                for (&(method_name, arity), &method_var) in sigs.iter().zip(method_vars) {
                    let entry = persistent_vector(
                        ctx,
                        vec![
                            Value::Var(method_var),
                            Value::InternString(method_name),
                            Value::Int(i64::from(arity)),
                        ],
                    )?;
                    sig_values.push(entry);
                }
                let sig_vector = persistent_vector(ctx, sig_values)?;
                let packed = persistent_vector(
                    ctx,
                    vec![Value::Var(*var), Value::Symbol(*name), sig_vector],
                )?;
                let index = b.add_const(packed)?;
                b.emit_with(Opcode::Defprotocol, index);
                Ok(())
            }
            Node::ExtendType {
                type_kw,
                extensions,
                ..
            } => {
                let type_name: &'static str = (*type_kw).into();
                let type_value = Value::Keyword(ctx.interns.intern_keyword(None, type_name));
                for (protocol_var, methods) in extensions {
                    for (method_name, method_node) in methods {
                        self.compile(ctx, b, method_node, false)?;
                        let packed = persistent_vector(
                            ctx,
                            vec![
                                Value::Var(*protocol_var),
                                type_value,
                                Value::InternString(*method_name),
                            ],
                        )?;
                        let index = b.add_const(packed)?;
                        b.emit_with(Opcode::ExtendTypeMethod, index);
                    }
                }
                b.emit(Opcode::Nil);
                Ok(())
            }
        }
    }

    fn compile_constant(&mut self, b: &mut ChunkBuilder, value: Value) -> RunResult<()> {
        match value {
            Value::Nil => b.emit(Opcode::Nil),
            Value::Bool(true) => b.emit(Opcode::TrueVal),
            Value::Bool(false) => b.emit(Opcode::FalseVal),
            Value::Int(0) => b.emit(Opcode::Int0),
            Value::Int(1) => b.emit(Opcode::Int1),
            Value::Int(-1) => b.emit(Opcode::IntNeg1),
            other => {
                let index = b.add_const(other)?;
                b.emit_with(Opcode::ConstLoad, index);
            }
        }
        Ok(())
    }

    fn emit_closure<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        b: &mut ChunkBuilder,
        fn_id: FnId,
        single_op: Opcode,
    ) -> RunResult<()> {
        ensure_compiled(ctx, fn_id)?;
        let protos = ctx
            .fns
            .compiled(fn_id)
            .expect("ensure_compiled populated protos")
            .to_vec();
        if protos.len() == 1 {
            let index = b.add_const(Value::Ref(protos[0]))?;
            b.emit_with(single_op, index);
        } else {
            let refs: Vec<Value> = protos.into_iter().map(Value::Ref).collect();
            let vector = persistent_vector(ctx, refs)?;
            let index = b.add_const(vector)?;
            b.emit_with(Opcode::ClosureMulti, index);
        }
        Ok(())
    }

    fn compile_try<T: ResourceTracker>(
        &mut self,
        ctx: &mut EvalCtx<'_, T>,
        b: &mut ChunkBuilder,
        body: &Node,
        catch: &Option<crate::node::CatchClause>,
        finally: &Option<Box<Node>>,
    ) -> RunResult<()> {
        match (catch, finally) {
            (None, None) => self.compile(ctx, b, body, false),
            (Some(clause), None) => {
                let to_handler = b.emit_jump(Opcode::TryBegin);
                self.compile(ctx, b, body, false)?;
                b.emit(Opcode::CatchBegin);
                let to_end = b.emit_jump(Opcode::Jump);
                b.patch_jump(to_handler)?;
                b.emit_with(Opcode::LocalStore, clause.slot);
                self.compile(ctx, b, &clause.body, false)?;
                b.patch_jump(to_end)
            }
            (None, Some(cleanup)) => {
                let to_finally = b.emit_jump(Opcode::FinallyBegin);
                self.compile(ctx, b, body, false)?;
                b.emit(Opcode::TryEnd);
                self.compile(ctx, b, cleanup, false)?;
                b.emit(Opcode::Pop);
                let to_end = b.emit_jump(Opcode::Jump);
                b.patch_jump(to_finally)?;
                // Exceptional path: payload on stack beneath the cleanup.
                self.compile(ctx, b, cleanup, false)?;
                b.emit(Opcode::Pop);
                b.emit(Opcode::ThrowEx);
                b.patch_jump(to_end)
            }
            (Some(clause), Some(cleanup)) => {
                let to_finally = b.emit_jump(Opcode::FinallyBegin);
                let to_handler = b.emit_jump(Opcode::TryBegin);
                self.compile(ctx, b, body, false)?;
                b.emit(Opcode::CatchBegin);
                let to_merge = b.emit_jump(Opcode::Jump);
                b.patch_jump(to_handler)?;
                b.emit_with(Opcode::LocalStore, clause.slot);
                self.compile(ctx, b, &clause.body, false)?;
                b.patch_jump(to_merge)?;
                b.emit(Opcode::TryEnd);
                self.compile(ctx, b, cleanup, false)?;
                b.emit(Opcode::Pop);
                let to_end = b.emit_jump(Opcode::Jump);
                b.patch_jump(to_finally)?;
                self.compile(ctx, b, cleanup, false)?;
                b.emit(Opcode::Pop);
                b.emit(Opcode::ThrowEx);
                b.patch_jump(to_end)
            }
        }
    }
}

fn persistent_vector<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    items: Vec<Value>,
) -> RunResult<Value> {
    Ok(Value::Ref(
        ctx.heap.alloc_persistent(HeapData::Vector(Vector::new(items)))?,
    ))
}
