//! Backend equivalence: a battery of programs evaluated on the tree walker
//! and the VM, asserting identical results.

use vesper::{Object, Session};

fn eval_both(source: &str) -> Object {
    let walker_result = Session::new()
        .eval_str(source, "eq.vsp")
        .unwrap_or_else(|err| panic!("tree walker failed on {source}: {err}"));
    let vm_result = Session::new_vm()
        .eval_str(source, "eq.vsp")
        .unwrap_or_else(|err| panic!("vm failed on {source}: {err}"));
    assert_eq!(walker_result, vm_result, "backends diverge on {source}");
    walker_result
}

#[test]
fn arithmetic_and_comparison() {
    assert_eq!(eval_both("(+ 1 2 3 4)"), Object::Int(10));
    assert_eq!(eval_both("(- 10 1 2)"), Object::Int(7));
    assert_eq!(eval_both("(* 2 3 4)"), Object::Int(24));
    assert_eq!(eval_both("(/ 6 3)"), Object::Int(2));
    assert_eq!(eval_both("(/ 1 2)"), Object::Float(0.5));
    assert_eq!(eval_both("(mod -7 3)"), Object::Int(2));
    assert_eq!(eval_both("(rem -7 3)"), Object::Int(-1));
    assert_eq!(eval_both("(quot 7 2)"), Object::Int(3));
    assert_eq!(eval_both("(< 1 2 3)"), Object::Bool(true));
    assert_eq!(eval_both("(<= 1 1 2)"), Object::Bool(true));
    assert_eq!(eval_both("(max 1 9 4)"), Object::Int(9));
    assert_eq!(eval_both("(min 1 9 4)"), Object::Int(1));
    assert_eq!(eval_both("(+ 1 2.5)"), Object::Float(3.5));
}

#[test]
fn numeric_equality_collapses_integral_floats() {
    assert_eq!(eval_both("(= 1 1.0)"), Object::Bool(true));
    assert_eq!(eval_both("(= 1 1.5)"), Object::Bool(false));
    assert_eq!(eval_both("(= (hash 1) (hash 1.0))"), Object::Bool(true));
    assert_eq!(eval_both("(get {1 :a} 1.0)"), Object::keyword("a"));
}

#[test]
fn collection_operations() {
    assert_eq!(eval_both("(count [1 2 3])"), Object::Int(3));
    assert_eq!(eval_both("(nth [10 20 30] 1)"), Object::Int(20));
    assert_eq!(eval_both("(get {:a 1 :b 2} :b)"), Object::Int(2));
    assert_eq!(eval_both("(get {:a 1} :missing :dflt)"), Object::keyword("dflt"));
    assert_eq!(eval_both("(:a {:a 1})"), Object::Int(1));
    assert_eq!(eval_both("({:a 1} :a)"), Object::Int(1));
    assert_eq!(eval_both("([10 20] 1)"), Object::Int(20));
    assert_eq!(eval_both("(count (assoc {:a 1} :b 2))"), Object::Int(2));
    assert_eq!(eval_both("(count (dissoc {:a 1 :b 2} :a))"), Object::Int(1));
    assert_eq!(eval_both("(contains? #{1 2} 2)"), Object::Bool(true));
    assert_eq!(eval_both("(count (conj #{1 2} 2))"), Object::Int(2));
    assert_eq!(eval_both("(first (conj '(2 3) 1))"), Object::Int(1));
    assert_eq!(eval_both("(peek [1 2 3])"), Object::Int(3));
    assert_eq!(eval_both("(count (pop [1 2 3]))"), Object::Int(2));
    assert_eq!(
        eval_both("(into [] '(1 2 3))"),
        Object::Vector(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
    assert_eq!(
        eval_both("(sort '(3 1 2))"),
        Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
    assert_eq!(
        eval_both("(reverse [1 2 3])"),
        Object::List(vec![Object::Int(3), Object::Int(2), Object::Int(1)])
    );
    assert_eq!(
        eval_both("(subvec [1 2 3 4] 1 3)"),
        Object::Vector(vec![Object::Int(2), Object::Int(3)])
    );
}

#[test]
fn sequence_pipeline() {
    assert_eq!(
        eval_both("(map inc [1 2 3])"),
        Object::List(vec![Object::Int(2), Object::Int(3), Object::Int(4)])
    );
    assert_eq!(
        eval_both("(filter even? (range 10))"),
        Object::List(vec![0, 2, 4, 6, 8].into_iter().map(Object::Int).collect())
    );
    assert_eq!(eval_both("(reduce + 0 (range 11))"), Object::Int(55));
    assert_eq!(eval_both("(reduce + [1 2 3])"), Object::Int(6));
    assert_eq!(
        eval_both("(take 3 (repeat :x))"),
        Object::List(vec![
            Object::keyword("x"),
            Object::keyword("x"),
            Object::keyword("x")
        ])
    );
    assert_eq!(
        eval_both("(take 5 (cycle [1 2]))"),
        Object::List(vec![1, 2, 1, 2, 1].into_iter().map(Object::Int).collect())
    );
    assert_eq!(
        eval_both("(concat [1] '(2) [3])"),
        Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
    assert_eq!(
        eval_both("(drop 2 [1 2 3 4])"),
        Object::List(vec![Object::Int(3), Object::Int(4)])
    );
    assert_eq!(eval_both("(apply + 1 2 [3 4])"), Object::Int(10));
    assert_eq!(eval_both("((partial + 10) 5)"), Object::Int(15));
    assert_eq!(eval_both("((comp inc inc) 1)"), Object::Int(3));
    assert_eq!(
        eval_both("(interleave [1 3] [2 4])"),
        Object::List(vec![1, 2, 3, 4].into_iter().map(Object::Int).collect())
    );
    assert_eq!(
        eval_both("(distinct [1 2 1 3 2])"),
        Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
    );
    assert_eq!(eval_both("(last [1 2 3])"), Object::Int(3));
    assert_eq!(eval_both("(count (butlast [1 2 3]))"), Object::Int(2));
    assert_eq!(
        eval_both("(reduce (fn [acc x] (if (= x 3) (reduced acc) (+ acc x))) 0 [1 2 3 4])"),
        Object::Int(3)
    );
}

#[test]
fn fn_arities_and_variadics() {
    assert_eq!(
        eval_both(
            "(do (defn f ([x] x) ([x y] (+ x y)) ([x y & more] (+ x y (count more))))
                 (+ (f 1) (f 1 2) (f 1 2 3 4)))"
        ),
        Object::Int(9)
    );
    assert_eq!(eval_both("((fn [& xs] (count xs)) 1 2 3)"), Object::Int(3));
    assert_eq!(eval_both("((fn [& xs] (count xs)))"), Object::Int(0));
    assert_eq!(eval_both("(#(+ % %2) 1 2)"), Object::Int(3));
    assert_eq!(eval_both("(#(apply + %&) 1 2 3)"), Object::Int(6));
}

#[test]
fn named_fn_self_recursion() {
    assert_eq!(
        eval_both("((fn fact [n] (if (= n 0) 1 (* n (fact (- n 1))))) 10)"),
        Object::Int(3_628_800)
    );
    assert_eq!(
        eval_both("(do (defn fib [n] (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))) (fib 15))"),
        Object::Int(610)
    );
}

#[test]
fn recur_in_fn_tail_position() {
    assert_eq!(
        eval_both("(do (defn sum [n acc] (if (= n 0) acc (recur (- n 1) (+ acc n)))) (sum 1000 0))"),
        Object::Int(500_500)
    );
}

#[test]
fn letfn_mutual_recursion() {
    assert_eq!(
        eval_both(
            "(letfn [(even2? [n] (if (= n 0) true (odd2? (- n 1))))
                     (odd2? [n] (if (= n 0) false (even2? (- n 1))))]
               (even2? 100))"
        ),
        Object::Bool(true)
    );
}

#[test]
fn associative_destructuring() {
    assert_eq!(
        eval_both("(let [{a :x b :y :or {b 9}} {:x 1}] (+ a b))"),
        Object::Int(10)
    );
    assert_eq!(
        eval_both("(let [{:keys [p q] :or {q 5}} {:p 2}] (+ p q))"),
        Object::Int(7)
    );
    assert_eq!(
        eval_both("(let [{:strs [s]} {\"s\" 3}] s)"),
        Object::Int(3)
    );
    assert_eq!(
        eval_both("(let [{:syms [r]} {'r 4}] r)"),
        Object::Int(4)
    );
    assert_eq!(
        eval_both("(let [{m :m :as whole} {:m 1 :n 2}] (+ m (count whole)))"),
        Object::Int(3)
    );
    assert_eq!(
        eval_both("(let [[[a b] [c]] [[1 2] [3]]] (+ a b c))"),
        Object::Int(6)
    );
    assert_eq!(
        eval_both("((fn [[a b]] (+ a b)) [3 4])"),
        Object::Int(7)
    );
}

#[test]
fn atoms_and_watches() {
    assert_eq!(
        eval_both("(do (def a (atom 0)) (swap! a + 5) (swap! a inc) @a)"),
        Object::Int(6)
    );
    assert_eq!(
        eval_both(
            "(do (def a (atom 0))
                 (def seen (atom nil))
                 (add-watch a :w (fn [k r old new] (reset! seen [old new])))
                 (reset! a 3)
                 @seen)"
        ),
        Object::Vector(vec![Object::Int(0), Object::Int(3)])
    );
}

#[test]
fn delays_volatiles_promises() {
    assert_eq!(
        eval_both("(do (def d (delay (+ 1 2))) [(realized? d) @d (realized? d)])"),
        Object::Vector(vec![Object::Bool(false), Object::Int(3), Object::Bool(true)])
    );
    assert_eq!(
        eval_both("(do (def v (volatile! 1)) (vswap! v + 10) @v)"),
        Object::Int(11)
    );
    assert_eq!(
        eval_both("(do (def p (promise)) (deliver p 42) @p)"),
        Object::Int(42)
    );
}

#[test]
fn transients_build_and_freeze() {
    assert_eq!(
        eval_both("(persistent! (conj! (conj! (transient []) 1) 2))"),
        Object::Vector(vec![Object::Int(1), Object::Int(2)])
    );
    assert_eq!(
        eval_both("(get (persistent! (assoc! (transient {}) :a 1)) :a)"),
        Object::Int(1)
    );
}

#[test]
fn string_operations() {
    assert_eq!(eval_both("(str \"a\" 1 :k nil)"), Object::String("a1:k".to_owned()));
    assert_eq!(eval_both("(subs \"hello\" 1 3)"), Object::String("el".to_owned()));
    assert_eq!(eval_both("(upper-case \"abc\")"), Object::String("ABC".to_owned()));
    assert_eq!(
        eval_both("(split \"a,b,c\" #\",\")"),
        Object::Vector(vec![
            Object::String("a".to_owned()),
            Object::String("b".to_owned()),
            Object::String("c".to_owned()),
        ])
    );
    assert_eq!(
        eval_both("(join \"-\" [1 2 3])"),
        Object::String("1-2-3".to_owned())
    );
    assert_eq!(
        eval_both("(replace \"aXbX\" \"X\" \"-\")"),
        Object::String("a-b-".to_owned())
    );
    assert_eq!(eval_both("(includes? \"abc\" \"bc\")"), Object::Bool(true));
    assert_eq!(eval_both("(name :ns/kw)"), Object::String("kw".to_owned()));
    assert_eq!(eval_both("(namespace :ns/kw)"), Object::String("ns".to_owned()));
    assert_eq!(eval_both("(keyword \"k\")"), Object::keyword("k"));
}

#[test]
fn exceptions_and_finally() {
    assert_eq!(
        eval_both("(try (throw {:code 7}) (catch Exception e (:code e)))"),
        Object::Int(7)
    );
    assert_eq!(
        eval_both(
            "(do (def log (atom []))
                 (try (throw :boom) (catch Exception e (swap! log conj :caught))
                      (finally (swap! log conj :cleanup)))
                 @log)"
        ),
        Object::Vector(vec![Object::keyword("caught"), Object::keyword("cleanup")])
    );
    assert_eq!(
        eval_both(
            "(do (def log (atom []))
                 (try (try (throw :inner) (finally (swap! log conj :f1)))
                      (catch Exception e (swap! log conj [:caught e])))
                 @log)"
        ),
        Object::Vector(vec![
            Object::keyword("f1"),
            Object::Vector(vec![Object::keyword("caught"), Object::keyword("inner")]),
        ])
    );
    assert_eq!(
        eval_both("(try (nth [1] 5) (catch Exception e (:type e)))"),
        Object::keyword("index-out-of-bounds")
    );
}

#[test]
fn dynamic_binding_frames() {
    assert_eq!(
        eval_both(
            "(do (def ^:dynamic *depth* 0)
                 (defn probe [] *depth*)
                 [(probe) (binding [*depth* 5] (probe)) (probe)])"
        ),
        Object::Vector(vec![Object::Int(0), Object::Int(5), Object::Int(0)])
    );
    assert_eq!(
        eval_both(
            "(do (def ^:dynamic *x* 1)
                 (try (binding [*x* 2] (throw :boom)) (catch Exception e nil))
                 *x*)"
        ),
        Object::Int(1)
    );
}

#[test]
fn native_macros() {
    assert_eq!(eval_both("(when true 1 2 3)"), Object::Int(3));
    assert_eq!(eval_both("(when false 1)"), Object::Nil);
    assert_eq!(eval_both("(and 1 2 3)"), Object::Int(3));
    assert_eq!(eval_both("(and 1 nil 3)"), Object::Nil);
    assert_eq!(eval_both("(or nil false 3)"), Object::Int(3));
    assert_eq!(eval_both("(or nil nil)"), Object::Nil);
    assert_eq!(
        eval_both("(cond (= 1 2) :a (= 1 1) :b :else :c)"),
        Object::keyword("b")
    );
    assert_eq!(eval_both("(-> 1 inc (+ 10))"), Object::Int(12));
    assert_eq!(eval_both("(->> [1 2 3] (map inc) (reduce +))"), Object::Int(9));
    assert_eq!(
        eval_both("(do (def n (atom 0)) (dotimes [i 4] (swap! n + i)) @n)"),
        Object::Int(6)
    );
}

#[test]
fn user_macros_and_syntax_quote() {
    assert_eq!(
        eval_both("(do (defmacro twice [form] `(do ~form ~form)) (def c (atom 0)) (twice (swap! c inc)) @c)"),
        Object::Int(2)
    );
    assert_eq!(
        eval_both("(do (defmacro unless [t a b] `(if ~t ~b ~a)) (unless false 1 2))"),
        Object::Int(1)
    );
    assert_eq!(eval_both("(count `(1 ~@[2 3] 4))"), Object::Int(4));
    assert_eq!(
        eval_both("(do (defmacro swap-args [f a b] `(~f ~b ~a)) (swap-args - 1 10))"),
        Object::Int(9)
    );
}

#[test]
fn multimethods_with_hierarchy() {
    assert_eq!(
        eval_both(
            "(do (defmulti area :shape)
                 (defmethod area :square [s] (* (:side s) (:side s)))
                 (defmethod area :circle [c] (* 3 (:r c) (:r c)))
                 [(area {:shape :square :side 4}) (area {:shape :circle :r 2})])"
        ),
        Object::Vector(vec![Object::Int(16), Object::Int(12)])
    );
    assert_eq!(
        eval_both(
            "(do (defmulti kind type)
                 (defmethod kind :number [x] :num)
                 (defmethod kind :default [x] :other)
                 [(kind 1) (kind 1.5) (kind \"s\")])"
        ),
        Object::Vector(vec![
            Object::keyword("num"),
            Object::keyword("num"),
            Object::keyword("other"),
        ])
    );
    assert_eq!(
        eval_both(
            "(do (derive :dog :animal)
                 (defmulti speak identity)
                 (defmethod speak :animal [x] :generic)
                 (speak :dog))"
        ),
        Object::keyword("generic")
    );
}

#[test]
fn protocols_over_builtin_types() {
    assert_eq!(
        eval_both(
            "(do (defprotocol Sized (size-of [this]))
                 (extend-type Vector Sized (size-of [this] (count this)))
                 (extend-type String Sized (size-of [this] (count this)))
                 [(size-of [1 2 3]) (size-of \"abcd\") (satisfies? Sized [1]) (satisfies? Sized 7)])"
        ),
        Object::Vector(vec![
            Object::Int(3),
            Object::Int(4),
            Object::Bool(true),
            Object::Bool(false),
        ])
    );
}

#[test]
fn quoting_and_symbols() {
    assert_eq!(eval_both("(first '(a b))"), Object::symbol("a"));
    assert_eq!(eval_both("(count '(1 2 3))"), Object::Int(3));
    assert_eq!(eval_both("'sym"), Object::symbol("sym"));
    assert_eq!(eval_both("(= 'a 'a)"), Object::Bool(true));
}

#[test]
fn lazy_seq_special_form() {
    assert_eq!(
        eval_both(
            "(do (defn nums [n] (lazy-seq (cons n (nums (inc n)))))
                 (take 4 (nums 10)))"
        ),
        Object::List(vec![10, 11, 12, 13].into_iter().map(Object::Int).collect())
    );
}

#[test]
fn equality_is_shape_aware() {
    assert_eq!(eval_both("(= [1 2] '(1 2))"), Object::Bool(true));
    assert_eq!(eval_both("(= [1 2] (map inc [0 1]))"), Object::Bool(true));
    assert_eq!(eval_both("(= {:a 1} {:a 1})"), Object::Bool(true));
    assert_eq!(eval_both("(= #{1 2} #{2 1})"), Object::Bool(true));
    assert_eq!(eval_both("(= {:a 1} {:a 2})"), Object::Bool(false));
    assert_eq!(eval_both("(not= 1 2)"), Object::Bool(true));
}

#[test]
fn regex_builtins() {
    assert_eq!(
        eval_both("(re-matches #\"\\d+\" \"123\")"),
        Object::String("123".to_owned())
    );
    assert_eq!(eval_both("(re-matches #\"\\d+\" \"12x\")"), Object::Nil);
    assert_eq!(
        eval_both("(re-seq #\"\\d+\" \"a1b22c333\")"),
        Object::List(vec![
            Object::String("1".to_owned()),
            Object::String("22".to_owned()),
            Object::String("333".to_owned()),
        ])
    );
    assert_eq!(
        eval_both("(do (def m (re-matcher #\"\\d+\" \"a1b22\")) [(re-find m) (re-find m) (re-find m)])"),
        Object::Vector(vec![
            Object::String("1".to_owned()),
            Object::String("22".to_owned()),
            Object::Nil,
        ])
    );
}

#[test]
fn namespaces_and_vars() {
    // Namespace switches take effect between top-level forms: the qualified
    // reference below is only resolvable because the earlier forms already ran.
    assert_eq!(
        eval_both(
            "(in-ns 'app.main)
             (def shared 41)
             (in-ns 'user)
             (+ app.main/shared 1)"
        ),
        Object::Int(42)
    );
    assert_eq!(
        eval_both("(do (def x 7) @(var x))"),
        Object::Int(7)
    );
    assert_eq!(
        eval_both("(do (def x 7) @#'x)"),
        Object::Int(7)
    );
}
