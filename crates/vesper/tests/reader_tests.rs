//! Reader coverage: literal syntax, dispatch macros, and parse failures.

use vesper::{ErrorKind, Object, Phase, Session};

fn eval(source: &str) -> Object {
    Session::new()
        .eval_str(source, "reader.vsp")
        .unwrap_or_else(|err| panic!("eval failed on {source}: {err}"))
}

fn parse_error(source: &str) -> ErrorKind {
    let err = Session::new()
        .eval_str(source, "reader.vsp")
        .expect_err("expected a failure");
    assert_eq!(err.phase, Phase::Parse, "wrong phase for {source}: {err}");
    err.kind
}

#[test]
fn numeric_literals() {
    assert_eq!(eval("123"), Object::Int(123));
    assert_eq!(eval("-42"), Object::Int(-42));
    assert_eq!(eval("0x2A"), Object::Int(42));
    assert_eq!(eval("0b101"), Object::Int(5));
    assert_eq!(eval("07"), Object::Int(7));
    assert_eq!(eval("017"), Object::Int(15));
    assert_eq!(eval("3.14"), Object::Float(3.14));
    assert_eq!(eval("1e9"), Object::Float(1e9));
    assert_eq!(eval("-2.5e-2"), Object::Float(-2.5e-2));
    assert_eq!(eval("##Inf"), Object::Float(f64::INFINITY));
    assert_eq!(eval("##-Inf"), Object::Float(f64::NEG_INFINITY));
    let Object::Float(nan) = eval("##NaN") else {
        panic!("##NaN did not read as a float");
    };
    assert!(nan.is_nan());
}

#[test]
fn character_literals() {
    assert_eq!(eval("\\a"), Object::Char('a'));
    assert_eq!(eval("\\newline"), Object::Char('\n'));
    assert_eq!(eval("\\space"), Object::Char(' '));
    assert_eq!(eval("\\tab"), Object::Char('\t'));
    assert_eq!(eval("\\u0041"), Object::Char('A'));
}

#[test]
fn string_escapes() {
    assert_eq!(
        eval("\"a\\nb\\t\\\\\\\"\\u0041\""),
        Object::String("a\nb\t\\\"A".to_owned())
    );
}

#[test]
fn keywords_and_auto_namespace() {
    assert_eq!(eval(":k"), Object::keyword("k"));
    assert_eq!(
        eval(":ns/k"),
        Object::Keyword {
            ns: Some("ns".to_owned()),
            name: "k".to_owned()
        }
    );
    assert_eq!(
        eval("::local"),
        Object::Keyword {
            ns: Some("user".to_owned()),
            name: "local".to_owned()
        }
    );
}

#[test]
fn collection_literals() {
    assert_eq!(
        eval("[1 \"two\" :three]"),
        Object::Vector(vec![
            Object::Int(1),
            Object::String("two".to_owned()),
            Object::keyword("three"),
        ])
    );
    assert_eq!(eval("(count #{1 2 3})"), Object::Int(3));
    assert_eq!(eval("(count {})"), Object::Int(0));
    // Commas are whitespace.
    assert_eq!(eval("(count [1, 2, 3])"), Object::Int(3));
}

#[test]
fn comments_and_discard() {
    assert_eq!(eval("; leading comment\n41 ; trailing"), Object::Int(41));
    assert_eq!(eval("(+ 1 #_2 3)"), Object::Int(4));
    assert_eq!(eval("#_(nope) 9"), Object::Int(9));
}

#[test]
fn quote_family() {
    assert_eq!(eval("'(1 2)"), Object::List(vec![Object::Int(1), Object::Int(2)]));
    assert_eq!(eval("(count '(a b c))"), Object::Int(3));
    assert_eq!(eval("(first `(~(+ 1 2)))"), Object::Int(3));
    // @form reads as (deref form).
    assert_eq!(eval("(do (def a (atom 5)) @a)"), Object::Int(5));
}

#[test]
fn syntax_quote_auto_gensym_is_consistent() {
    assert_eq!(
        eval("(do (defmacro with-tmp [v] `(let [x# ~v] (+ x# x#))) (with-tmp 21))"),
        Object::Int(42)
    );
}

#[test]
fn anonymous_fn_dispatch() {
    assert_eq!(eval("(#(+ % 1) 41)"), Object::Int(42));
    assert_eq!(eval("(#(- %2 %1) 1 10)"), Object::Int(9));
    assert_eq!(eval("(#(count %&) 1 2 3 4)"), Object::Int(4));
}

#[test]
fn reader_conditionals() {
    assert_eq!(eval("#?(:vesper 1 :default 2)"), Object::Int(1));
    assert_eq!(eval("#?(:clj 1 :default 2)"), Object::Int(2));
    // No matching feature: the conditional reads as nothing.
    assert_eq!(eval("(do #?(:clj 1) 5)"), Object::Int(5));
}

#[test]
fn metadata_shorthand() {
    assert_eq!(eval("(do (def ^:private hidden 1) hidden)"), Object::Int(1));
    assert_eq!(eval("^{:note \"x\"} [1 2]").to_string(), "[1 2]");
}

#[test]
fn regex_literal_validates_at_read_time() {
    assert_eq!(parse_error("#\"(unclosed\""), ErrorKind::InvalidRegex);
}

#[test]
fn parse_failure_kinds() {
    assert_eq!(parse_error("(+ 1 2"), ErrorKind::UnexpectedEof);
    assert_eq!(parse_error(")"), ErrorKind::UnmatchedDelimiter);
    assert_eq!(parse_error("[1 2)"), ErrorKind::UnmatchedDelimiter);
    assert_eq!(parse_error("\"abc"), ErrorKind::UnexpectedEof);
    assert_eq!(parse_error("{:a 1 :a 2}"), ErrorKind::DuplicateKey);
    assert_eq!(parse_error("#{1 1}"), ErrorKind::DuplicateKey);
    assert_eq!(parse_error("{:a 1 :b}"), ErrorKind::InvalidToken);
    assert_eq!(parse_error("\"bad \\q escape\""), ErrorKind::InvalidString);
}

#[test]
fn parse_errors_carry_locations() {
    let err = Session::new()
        .eval_str("(+ 1\n   )extra)", "located.vsp")
        .expect_err("expected a failure");
    let loc = err.loc.expect("parse error has a location");
    assert_eq!(loc.file, "located.vsp");
    assert!(loc.line >= 1);
}

#[test]
fn subsequent_reads_survive_a_parse_error() {
    let mut session = Session::new();
    assert!(session.eval_str(")", "recover.vsp").is_err());
    assert_eq!(session.eval_str("(+ 1 2)", "recover.vsp").unwrap(), Object::Int(3));
}

#[test]
fn multiple_top_level_forms_evaluate_in_order() {
    assert_eq!(
        eval("(def counter (atom 0)) (swap! counter inc) (swap! counter inc) @counter"),
        Object::Int(2)
    );
}
