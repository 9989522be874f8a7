//! Engine invariants: arena safety, GC, persistent immutability, binding
//! stack pairing, lazy stepping, resource limits, and captured output.

use vesper::{
    CollectStringPrint, EngineConfig, ErrorKind, LimitedTracker, NoopTracer, Object, Phase,
    ResourceLimits, Session,
};

#[test]
fn arena_is_safe_after_every_top_level_expression() {
    let mut session = Session::new();
    session
        .eval_str(
            "(def make-adder (fn [n] (fn [x] (+ x n))))
             (def add5 (make-adder 5))
             (def table {:xs [1 2 3] :f add5})
             (def cached (atom nil))
             (reset! cached (map inc [1 2 3]))",
            "arena.vsp",
        )
        .unwrap();
    session.validate_heap().expect("no persistent->scratch refs");
    // Escaped closures keep working after the scratch reset.
    assert_eq!(
        session.eval_str("(add5 10)", "arena.vsp").unwrap(),
        Object::Int(15)
    );
    assert_eq!(
        session.eval_str("((:f table) 1)", "arena.vsp").unwrap(),
        Object::Int(6)
    );
    assert_eq!(
        session.eval_str("(count @cached)", "arena.vsp").unwrap(),
        Object::Int(3)
    );
    session.validate_heap().expect("still clean after reuse");
}

#[test]
fn gc_reclaims_unreachable_definitions() {
    let mut session = Session::new();
    session
        .eval_str("(def keep (fn [x] (* x 2)))", "gc.vsp")
        .unwrap();
    // Generate persistent garbage by redefining repeatedly.
    for i in 0..50 {
        session
            .eval_str(&format!("(def churn (fn [x] (+ x {i})))"), "gc.vsp")
            .unwrap();
    }
    let before = session.heap_stats().live_persistent;
    let swept = session.collect_now();
    let after = session.heap_stats().live_persistent;
    assert!(swept > 0, "expected the collector to sweep redefinition garbage");
    assert!(after < before);
    session.validate_heap().expect("collection preserves the invariant");
    // Both survivors still work.
    assert_eq!(
        session.eval_str("[(keep 21) (churn 0)]", "gc.vsp").unwrap(),
        Object::Vector(vec![Object::Int(42), Object::Int(49)])
    );
}

#[test]
fn persistent_collections_are_immutable_under_update() {
    let mut session = Session::new();
    let result = session
        .eval_str(
            "(def v [1 2 3])
             (def v2 (conj v 4))
             (def m {:a 1})
             (def m2 (assoc m :b 2))
             (def s #{1})
             (def s2 (conj s 2))
             [(count v) (count v2) (count m) (count m2) (count s) (count s2)]",
            "immut.vsp",
        )
        .unwrap();
    assert_eq!(
        result,
        Object::Vector(vec![
            Object::Int(3),
            Object::Int(4),
            Object::Int(1),
            Object::Int(2),
            Object::Int(1),
            Object::Int(2),
        ])
    );
}

#[test]
fn binding_stack_depth_restores_at_top_level_boundaries() {
    let mut session = Session::new();
    session
        .eval_str("(def ^:dynamic *level* 0)", "bind.vsp")
        .unwrap();
    assert_eq!(session.binding_depth(), 0);
    session
        .eval_str("(binding [*level* 1] (binding [*level* 2] *level*))", "bind.vsp")
        .unwrap();
    assert_eq!(session.binding_depth(), 0);
    // Pairing holds across exception unwinding too.
    session
        .eval_str(
            "(try (binding [*level* 9] (throw :x)) (catch Exception e e))",
            "bind.vsp",
        )
        .unwrap();
    assert_eq!(session.binding_depth(), 0);
}

#[test]
fn lazy_map_forces_one_step_at_a_time() {
    let mut session = Session::new();
    session
        .eval_str(
            "(def forced (atom 0))
             (def s (map (fn [x] (do (swap! forced inc) x)) [1 2 3 4 5 6]))",
            "lazy.vsp",
        )
        .unwrap();
    assert_eq!(session.eval_str("@forced", "lazy.vsp").unwrap(), Object::Int(0));
    assert_eq!(session.eval_str("(first s)", "lazy.vsp").unwrap(), Object::Int(1));
    assert_eq!(session.eval_str("@forced", "lazy.vsp").unwrap(), Object::Int(1));
    session.eval_str("(doall (take 3 s))", "lazy.vsp").unwrap();
    assert_eq!(session.eval_str("@forced", "lazy.vsp").unwrap(), Object::Int(3));
    // Already-forced steps are cached, not recomputed.
    session.eval_str("(first s)", "lazy.vsp").unwrap();
    assert_eq!(session.eval_str("@forced", "lazy.vsp").unwrap(), Object::Int(3));
}

#[test]
fn take_five_from_iterate_forces_exactly_five_steps() {
    let mut session = Session::new();
    let result = session
        .eval_str(
            "(def calls (atom 0))
             (def stepper (fn [x] (do (swap! calls inc) (inc x))))
             [(doall (take 5 (iterate stepper 0))) @calls]",
            "steps.vsp",
        )
        .unwrap();
    assert_eq!(
        result,
        Object::Vector(vec![
            Object::List((0..5).map(Object::Int).collect()),
            Object::Int(5),
        ])
    );
}

#[test]
fn step_limit_interrupts_runaway_loops() {
    let limits = ResourceLimits {
        max_memory_bytes: None,
        max_steps: Some(100_000),
        max_call_depth: 64,
    };
    let mut session =
        Session::with_tracker(EngineConfig::default(), LimitedTracker::new(limits));
    let err = session
        .eval_str("(loop [n 0] (recur (inc n)))", "limit.vsp")
        .expect_err("infinite loop must hit the step budget");
    assert_eq!(err.kind, ErrorKind::InternalError);
    assert_eq!(err.phase, Phase::Eval);
}

#[test]
fn call_depth_limit_reports_runaway_recursion() {
    let mut session = Session::new();
    let err = session
        .eval_str("(do (defn f [n] (f (inc n))) (f 0))", "depth.vsp")
        .expect_err("unbounded recursion must fail");
    assert_eq!(err.kind, ErrorKind::InternalError);
}

#[test]
fn print_output_is_captured_in_program_order() {
    let mut session = Session::new();
    let mut print = CollectStringPrint::new();
    session
        .eval_str_with(
            "(println \"a\" 1) (print :x) (newline) (prn \"quoted\")",
            "print.vsp",
            &mut print,
            &mut NoopTracer,
        )
        .unwrap();
    assert_eq!(print.output(), "a 1\n:x\n\"quoted\"\n");
}

#[test]
fn uncaught_user_exception_carries_payload_repr() {
    let mut session = Session::new();
    let err = session
        .eval_str("(throw {:oops 1})", "throw.vsp")
        .expect_err("uncaught throw surfaces");
    assert_eq!(err.kind, ErrorKind::UserException);
    let repr = err.payload_repr.expect("payload repr present");
    assert!(repr.contains(":oops"), "repr was {repr}");
}

#[test]
fn eval_errors_carry_callstacks() {
    let mut session = Session::new();
    let err = session
        .eval_str(
            "(defn inner [] (/ 1 0))
             (defn outer [] (inner))
             (outer)",
            "stack.vsp",
        )
        .expect_err("division by zero surfaces");
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    let names: Vec<&str> = err.callstack.iter().map(|f| f.fn_name.as_str()).collect();
    assert!(names.contains(&"inner"), "callstack was {names:?}");
    assert!(names.contains(&"outer"), "callstack was {names:?}");
}

#[test]
fn analysis_rejects_non_tail_recur() {
    let mut session = Session::new();
    let err = session
        .eval_str("(loop [n 0] (+ 1 (recur n)))", "recur.vsp")
        .expect_err("non-tail recur is rejected");
    assert_eq!(err.phase, Phase::Analysis);
    assert_eq!(err.kind, ErrorKind::InvalidBinding);
}

#[test]
fn analysis_rejects_recur_arity_mismatch() {
    let mut session = Session::new();
    let err = session
        .eval_str("(loop [a 1 b 2] (recur a))", "recur.vsp")
        .expect_err("recur arity must match its target");
    assert_eq!(err.kind, ErrorKind::InvalidArity);
}

#[test]
fn undefined_symbol_is_an_analysis_error() {
    let mut session = Session::new();
    let err = session
        .eval_str("(no-such-fn 1)", "undef.vsp")
        .expect_err("unresolved symbol fails analysis");
    assert_eq!(err.phase, Phase::Analysis);
    assert_eq!(err.kind, ErrorKind::UndefinedSymbol);
}

#[test]
fn runaway_macro_expansion_is_bounded() {
    let mut session = Session::new();
    let err = session
        .eval_str(
            "(defmacro forever [] `(forever))
             (forever)",
            "macro.vsp",
        )
        .expect_err("self-expanding macro must hit the depth limit");
    assert_eq!(err.kind, ErrorKind::MacroError);
    assert_eq!(err.phase, Phase::Macroexpand);
}

#[test]
fn deref_of_undelivered_promise_errors() {
    let mut session = Session::new();
    let err = session
        .eval_str("(do (def p (promise)) @p)", "promise.vsp")
        .expect_err("single-threaded deref before deliver cannot block");
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn spent_transients_reject_further_updates() {
    let mut session = Session::new();
    let err = session
        .eval_str(
            "(do (def t (transient [1])) (persistent! t) (conj! t 2))",
            "transient.vsp",
        )
        .expect_err("spent transient must reject conj!");
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn stepwise_read_analyze_eval_entry_points() {
    use vesper::ReadCursor;
    let mut session = Session::new();
    let source = "(def base 40) (+ base 2)";
    let mut cursor = ReadCursor::new();
    let mut last = Object::Nil;
    while let Some(form) = session.read(source, "step.vsp", &mut cursor).unwrap() {
        let analyzed = session.analyze(&form).unwrap();
        last = session.eval(&analyzed).unwrap();
    }
    assert_eq!(last, Object::Int(42));
    session.validate_heap().expect("stepwise path keeps the arena safe");
}

#[test]
fn printed_values_read_back_to_equal_values() {
    // Round-trip: evaluating the printed representation of a value yields an
    // equal value. Printed data re-reads as literals, so it is re-evaluated
    // under quote to avoid treating lists as calls.
    let sources = [
        "[1 2.5 :k \"s\" \\a nil true]",
        "{:a [1 2] :b #{3}}",
        "'(a b (c))",
        "(list 1 (vector 2 3) {:k 'x})",
    ];
    for source in sources {
        let mut session = Session::new();
        let first = session.eval_str(source, "rt.vsp").unwrap();
        let printed = session
            .eval_str(&format!("(pr-str {source})"), "rt.vsp")
            .unwrap();
        let Object::String(text) = printed else {
            panic!("pr-str did not produce a string for {source}");
        };
        let reread = session
            .eval_str(&format!("(quote {text})"), "rt.vsp")
            .unwrap();
        assert_eq!(first, reread, "round-trip diverged for {source}");
    }
}

#[test]
fn objects_serialize_for_host_interop() {
    let mut session = Session::new();
    let value = session
        .eval_str("{:name \"ada\" :tags [:x :y] :n 3}", "serde.vsp")
        .unwrap();
    let json = serde_json::to_string(&value).expect("objects serialize");
    let back: Object = serde_json::from_str(&json).expect("objects deserialize");
    assert_eq!(value, back);
}
