//! End-to-end scenarios, each run through both backends.

use vesper::{Object, Session};

/// Evaluates on the tree walker and the VM, asserting both agree, and
/// returns the shared result.
fn eval_both(source: &str) -> Object {
    let walker_result = Session::new()
        .eval_str(source, "scenario.vsp")
        .unwrap_or_else(|err| panic!("tree walker failed on {source}: {err}"));
    let vm_result = Session::new_vm()
        .eval_str(source, "scenario.vsp")
        .unwrap_or_else(|err| panic!("vm failed on {source}: {err}"));
    assert_eq!(walker_result, vm_result, "backends diverge on {source}");
    walker_result
}

#[test]
fn loop_recur_sum() {
    let result = eval_both("(loop [n 5 acc 0] (if (= n 0) acc (recur (- n 1) (+ acc n))))");
    assert_eq!(result, Object::Int(15));
}

#[test]
fn closure_captures_let_binding() {
    let result = eval_both("(let [x 10] ((fn [y] (+ x y)) 5))");
    assert_eq!(result, Object::Int(15));
}

#[test]
fn multimethod_default_dispatch() {
    let result = eval_both(
        "(do (defmulti f (fn [x] (:t x)))
             (defmethod f :a [x] 1)
             (defmethod f :default [x] 99)
             (f {:t :z}))",
    );
    assert_eq!(result, Object::Int(99));
}

#[test]
fn protocol_extension_on_string() {
    let result = eval_both(
        "(do (defprotocol IFoo (foo [this]))
             (extend-type String IFoo (foo [this] (str \"foo:\" this)))
             (foo \"bar\"))",
    );
    assert_eq!(result, Object::String("foo:bar".to_owned()));
}

#[test]
fn take_from_infinite_iterate() {
    let result = eval_both("(take 5 (iterate inc 0))");
    assert_eq!(
        result,
        Object::List((0..5).map(Object::Int).collect())
    );
}

#[test]
fn division_by_zero_is_catchable_as_info_map() {
    let result = eval_both("(try (/ 1 0) (catch Exception e (:type e)))");
    assert_eq!(result, Object::keyword("division-by-zero"));
}

#[test]
fn regex_find_with_groups() {
    let result = eval_both("(re-find #\"(\\d+)-(\\d+)\" \"12-34\")");
    assert_eq!(
        result,
        Object::Vector(vec![
            Object::String("12-34".to_owned()),
            Object::String("12".to_owned()),
            Object::String("34".to_owned()),
        ])
    );
}

#[test]
fn sequential_destructuring_with_rest_and_as() {
    let result = eval_both("(let [[a & rest :as all] [1 2 3]] (+ a (count rest) (count all)))");
    assert_eq!(result, Object::Int(6));
}
