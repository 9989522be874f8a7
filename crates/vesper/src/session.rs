//! The embedding surface: sessions, configuration, and the top-level
//! read-analyze-eval loop.
//!
//! A [`Session`] owns the process-wide state (heap, interns, environment,
//! function registry) for one interpreter instance. `eval_str` drives the
//! pipeline one top-level form at a time: read, analyze, evaluate on the
//! configured backend, detach the result, then reset the scratch arena and —
//! when enough persistent bytes have accumulated — run the mark-sweep
//! collector.

use std::path::Path;

use ahash::AHashMap;

use crate::{
    analyzer,
    builtins::{Builtin, EvalCtx},
    bytecode::{Vm, compile_top},
    env::Env,
    error::{CodeLoc, ErrorKind, Exception, Phase, RunError, StackFrame},
    form::Form,
    function::FnRegistry,
    heap::{Heap, HeapStats, collect_garbage},
    intern::Interns,
    io::{PrintWriter, StdPrint},
    object::{Object, value_to_object},
    reader::{ReadState, Reader},
    resource::{NoLimitTracker, ResourceTracker},
    tracer::{EvalTracer, NoopTracer, TraceEvent},
    value::Value,
    walker::Walker,
};

/// Which execution engine runs analyzed nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Direct interpretation of the node tree.
    #[default]
    TreeWalker,
    /// Bytecode compilation plus the stack VM.
    Vm,
}

/// Engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub backend: Backend,
    /// Persistent bytes allocated since the last collection that trigger a
    /// mark-sweep pass between top-level expressions.
    pub gc_threshold_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            gc_threshold_bytes: 1024 * 1024,
        }
    }
}

/// One interpreter instance.
pub struct Session<T: ResourceTracker = NoLimitTracker> {
    heap: Heap<T>,
    interns: Interns,
    env: Env,
    fns: FnRegistry,
    config: EngineConfig,
}

/// Cursor over one source string for the step-wise [`Session::read`] entry
/// point; tracks byte offset and line numbers between forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadCursor {
    state: ReadState,
}

impl ReadCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// An opaque top-level form produced by [`Session::read`].
#[derive(Debug)]
pub struct TopForm {
    form: Form,
}

/// An analyzed top-level form, ready for [`Session::eval`].
///
/// Stays valid across evaluations of other forms, but an explicit
/// [`Session::collect_now`] may reclaim definitions it references; analyze
/// and evaluate promptly when driving the engine at this level.
#[derive(Debug)]
pub struct Analyzed {
    top: analyzer::TopLevel,
}

impl Session<NoLimitTracker> {
    /// A session with default configuration and no resource limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracker(EngineConfig::default(), NoLimitTracker)
    }

    /// A session running the bytecode VM backend.
    #[must_use]
    pub fn new_vm() -> Self {
        Self::with_tracker(
            EngineConfig {
                backend: Backend::Vm,
                ..EngineConfig::default()
            },
            NoLimitTracker,
        )
    }
}

impl Default for Session<NoLimitTracker> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResourceTracker> Session<T> {
    /// A session with explicit configuration and resource tracker.
    pub fn with_tracker(config: EngineConfig, tracker: T) -> Self {
        let mut interns = Interns::new();
        let mut env = Env::new(&mut interns);
        bootstrap(&mut env, &mut interns);
        Self {
            heap: Heap::new(tracker),
            interns,
            env,
            fns: FnRegistry::new(),
            config,
        }
    }

    pub fn set_backend(&mut self, backend: Backend) {
        self.config.backend = backend;
    }

    #[must_use]
    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    /// Evaluates every top-level form in `source`, returning the last value.
    ///
    /// Output goes to stdout; pass a writer via [`Session::eval_str_with`]
    /// to capture it.
    pub fn eval_str(&mut self, source: &str, file: &str) -> Result<Object, Exception> {
        self.eval_str_with(source, file, &mut StdPrint, &mut NoopTracer)
    }

    /// Evaluates with an explicit print writer and tracer.
    pub fn eval_str_with(
        &mut self,
        source: &str,
        file: &str,
        print: &mut dyn PrintWriter,
        tracer: &mut dyn EvalTracer,
    ) -> Result<Object, Exception> {
        let mut result = Object::Nil;
        let mut state = ReadState::default();
        // The reader borrows the interner (which evaluation also needs), so
        // forms are pulled one at a time through a resumable read state.
        loop {
            let read = {
                let mut reader =
                    Reader::with_state(source, file, state, &mut self.interns, &self.env);
                let outcome = reader.read();
                let delta = reader.state_delta();
                state.byte_offset += delta.byte_offset;
                state.line = delta.line;
                state.column = delta.column;
                outcome
            };
            let form = match read {
                Ok(Some(form)) => form,
                Ok(None) => break,
                Err(err) => {
                    // The scratch arena resets between top-level expressions
                    // regardless of success or failure.
                    self.finish_top_level(tracer);
                    return Err(self.to_exception(err, Phase::Parse));
                }
            };
            let outcome = self.eval_form(&form, print, tracer);
            self.finish_top_level(tracer);
            result = outcome?;
        }
        Ok(result)
    }

    /// Reads the next top-level form from `source`, advancing the cursor.
    ///
    /// Returns `None` on clean end of input.
    pub fn read(
        &mut self,
        source: &str,
        file: &str,
        cursor: &mut ReadCursor,
    ) -> Result<Option<TopForm>, Exception> {
        let mut reader =
            Reader::with_state(source, file, cursor.state, &mut self.interns, &self.env);
        let outcome = reader.read();
        let delta = reader.state_delta();
        cursor.state.byte_offset += delta.byte_offset;
        cursor.state.line = delta.line;
        cursor.state.column = delta.column;
        match outcome {
            Ok(form) => Ok(form.map(|form| TopForm { form })),
            Err(err) => Err(self.to_exception(err, Phase::Parse)),
        }
    }

    /// Analyzes one form: scope resolution, macro expansion, destructuring.
    pub fn analyze(&mut self, form: &TopForm) -> Result<Analyzed, Exception> {
        let mut print = StdPrint;
        let mut tracer = NoopTracer;
        let mut ctx = EvalCtx {
            heap: &mut self.heap,
            interns: &mut self.interns,
            env: &mut self.env,
            fns: &mut self.fns,
            print: &mut print,
            tracer: &mut tracer,
        };
        let mut macro_walker = Walker::new(0);
        match analyzer::analyze_top(&mut ctx, &mut macro_walker, &form.form) {
            Ok(top) => Ok(Analyzed { top }),
            Err(err) => {
                let phase = if err.kind == ErrorKind::MacroError {
                    Phase::Macroexpand
                } else {
                    Phase::Analysis
                };
                Err(Self::to_exception_with(&mut ctx, err, phase))
            }
        }
    }

    /// Evaluates an analyzed form on the configured backend, resetting the
    /// scratch arena afterwards. Output goes to stdout.
    pub fn eval(&mut self, analyzed: &Analyzed) -> Result<Object, Exception> {
        let outcome = self.eval_analyzed(&analyzed.top, &mut StdPrint, &mut NoopTracer);
        self.persist_binding_frames();
        self.heap.reset_scratch();
        outcome
    }

    /// Reads, analyzes, and evaluates one file (`load_file` entry point).
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Object, Exception> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| Exception {
            kind: ErrorKind::InternalError,
            phase: Phase::Parse,
            message: format!("cannot read {}: {err}", path.display()),
            loc: None,
            payload_repr: None,
            callstack: Vec::new(),
        })?;
        let name = path.display().to_string();
        self.eval_str(&source, &name)
    }

    /// Analyzes and evaluates one already-read form.
    fn eval_form(
        &mut self,
        form: &Form,
        print: &mut dyn PrintWriter,
        tracer: &mut dyn EvalTracer,
    ) -> Result<Object, Exception> {
        tracer.trace(TraceEvent::TopLevelStart);
        let top = {
            let mut ctx = EvalCtx {
                heap: &mut self.heap,
                interns: &mut self.interns,
                env: &mut self.env,
                fns: &mut self.fns,
                print,
                tracer,
            };
            // Macro expansion during analysis always runs on the tree walker.
            let mut macro_walker = Walker::new(0);
            match analyzer::analyze_top(&mut ctx, &mut macro_walker, form) {
                Ok(top) => top,
                Err(err) => {
                    let phase = if err.kind == ErrorKind::MacroError {
                        Phase::Macroexpand
                    } else {
                        Phase::Analysis
                    };
                    return Err(Self::to_exception_with(&mut ctx, err, phase));
                }
            }
        };
        self.eval_analyzed(&top, print, tracer)
    }

    /// Runs an analyzed top-level node on the configured backend and
    /// detaches the result.
    fn eval_analyzed(
        &mut self,
        top: &analyzer::TopLevel,
        print: &mut dyn PrintWriter,
        tracer: &mut dyn EvalTracer,
    ) -> Result<Object, Exception> {
        let backend = self.config.backend;
        let mut ctx = EvalCtx {
            heap: &mut self.heap,
            interns: &mut self.interns,
            env: &mut self.env,
            fns: &mut self.fns,
            print,
            tracer,
        };
        let outcome = match backend {
            Backend::TreeWalker => crate::walker::eval_top(&mut ctx, &top.node, top.slot_count),
            Backend::Vm => compile_top(&mut ctx, &top.node, top.slot_count)
                .and_then(|chunk| Vm::new().run_top(&mut ctx, &chunk)),
        };
        match outcome {
            Ok(value) => {
                let mut detach_walker = Walker::new(0);
                value_to_object(&mut ctx, &mut detach_walker, value)
                    .map_err(|err| Self::to_exception_with(&mut ctx, err, Phase::Eval))
            }
            Err(err) => Err(Self::to_exception_with(&mut ctx, err, Phase::Eval)),
        }
    }

    /// Top-level boundary: persist any values still referenced by dynamic
    /// binding frames, reset the scratch arena, and collect when pressure
    /// crosses the threshold.
    fn finish_top_level(&mut self, tracer: &mut dyn EvalTracer) {
        self.persist_binding_frames();
        self.heap.reset_scratch();
        if self.heap.gc_pressure() >= self.config.gc_threshold_bytes {
            let swept = collect_garbage(&mut self.heap, &self.env, &mut self.fns);
            tracer.trace(TraceEvent::GcSweep(swept));
        }
    }

    /// Values bound by an unpaired `push-thread-bindings` must survive the
    /// scratch reset.
    fn persist_binding_frames(&mut self) {
        if self.env.binding_depth() == 0 {
            return;
        }
        let mut frames = Vec::new();
        while let Some(frame) = self.env.pop_binding_frame() {
            frames.push(frame);
        }
        for frame in frames.iter_mut().rev() {
            for entry in &mut frame.entries {
                let mut memo = AHashMap::new();
                if let Ok(value) = self.heap.deep_clone_persistent(entry.1, &mut memo) {
                    entry.1 = value;
                }
            }
        }
        for frame in frames.into_iter().rev() {
            self.env.push_binding_frame(frame);
        }
    }

    /// Runs the collector immediately; returns the number of swept objects.
    pub fn collect_now(&mut self) -> usize {
        collect_garbage(&mut self.heap, &self.env, &mut self.fns)
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Current dynamic-binding stack depth; zero at every balanced top-level
    /// boundary.
    #[must_use]
    pub fn binding_depth(&self) -> usize {
        self.env.binding_depth()
    }

    /// Checks the arena-safety invariant: no persistent object may reference
    /// the scratch zone. Test hook.
    pub fn validate_heap(&self) -> Result<(), String> {
        self.heap.debug_validate()
    }

    fn to_exception(&mut self, err: RunError, phase: Phase) -> Exception {
        let loc = err.loc.map(|loc| CodeLoc {
            file: self.interns.get_str(loc.file).to_owned(),
            line: loc.line,
            column: loc.column,
        });
        Exception {
            kind: err.kind,
            phase,
            message: err.message.clone(),
            loc,
            payload_repr: None,
            callstack: convert_frames(&err, &self.interns),
        }
    }

    fn to_exception_with(ctx: &mut EvalCtx<'_, T>, err: RunError, phase: Phase) -> Exception {
        let payload_repr = err.payload.map(|payload| {
            let mut out = String::new();
            crate::value::write_value(&mut out, payload, ctx.heap, ctx.interns, ctx.env, true);
            out
        });
        let loc = err.loc.map(|loc| CodeLoc {
            file: ctx.interns.get_str(loc.file).to_owned(),
            line: loc.line,
            column: loc.column,
        });
        Exception {
            kind: err.kind,
            phase,
            message: err.message.clone(),
            loc,
            payload_repr,
            callstack: convert_frames(&err, ctx.interns),
        }
    }
}

fn convert_frames(err: &RunError, interns: &Interns) -> Vec<StackFrame> {
    err.frames
        .iter()
        .map(|frame| StackFrame {
            fn_name: frame.fn_name.clone(),
            ns: frame.ns.clone(),
            loc: frame.loc.map(|loc| CodeLoc {
                file: interns.get_str(loc.file).to_owned(),
                line: loc.line,
                column: loc.column,
            }),
            is_builtin: frame.is_builtin,
        })
        .collect()
}

/// Interns every builtin into the core namespace and installs the default
/// `isa?` hierarchy edges.
fn bootstrap(env: &mut Env, interns: &mut Interns) {
    let core = env.core_ns();
    for &builtin in Builtin::all() {
        let symbol = interns.intern_symbol(None, builtin.name());
        let var = env.intern_var(core, symbol, interns);
        env.var_mut(var).root = Value::Builtin(builtin);
        env.var_mut(var).is_macro = builtin.is_macro();
    }
    // Default tag ancestry for multimethod dispatch.
    let edges: &[(&str, &str)] = &[
        ("integer", "number"),
        ("float", "number"),
        ("list", "sequential"),
        ("vector", "sequential"),
        ("lazy-seq", "sequential"),
        ("list", "coll"),
        ("vector", "coll"),
        ("map", "coll"),
        ("set", "coll"),
        ("lazy-seq", "coll"),
        ("map", "associative"),
        ("vector", "associative"),
    ];
    for &(child, parent) in edges {
        let child_kw = Value::Keyword(interns.intern_keyword(None, child));
        let parent_kw = Value::Keyword(interns.intern_keyword(None, parent));
        env.derive(child_kw, parent_kw);
    }
}
