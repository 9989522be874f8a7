//! Execution tracing hooks.
//!
//! Both backends report coarse events through an [`EvalTracer`]. The default
//! [`NoopTracer`] compiles to nothing; [`StderrTracer`] is a debugging aid and
//! [`CountingTracer`] backs tests that assert how much work ran (for example
//! that forcing five elements of a lazy sequence evaluates exactly five
//! thunks).

/// One traceable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// A top-level expression is about to be evaluated.
    TopLevelStart,
    /// A function call was dispatched (user fn, builtin, or polymorphic).
    Call,
    /// One lazy-sequence step was forced.
    LazyStep,
    /// A macro was expanded.
    MacroExpand,
    /// The garbage collector ran; payload is the number of swept objects.
    GcSweep(usize),
}

/// Receiver for [`TraceEvent`]s.
pub trait EvalTracer {
    fn trace(&mut self, event: TraceEvent);
}

/// Tracer that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {
    #[inline]
    fn trace(&mut self, _event: TraceEvent) {}
}

/// Tracer that logs every event to stderr; debugging aid.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl EvalTracer for StderrTracer {
    fn trace(&mut self, event: TraceEvent) {
        eprintln!("[trace] {event:?}");
    }
}

/// Tracer that counts events by kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingTracer {
    pub calls: u64,
    pub lazy_steps: u64,
    pub macro_expansions: u64,
    pub gc_runs: u64,
}

impl EvalTracer for CountingTracer {
    fn trace(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::TopLevelStart => {}
            TraceEvent::Call => self.calls += 1,
            TraceEvent::LazyStep => self.lazy_steps += 1,
            TraceEvent::MacroExpand => self.macro_expansions += 1,
            TraceEvent::GcSweep(_) => self.gc_runs += 1,
        }
    }
}
