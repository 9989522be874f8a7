//! The runtime value model.
//!
//! `Value` is a small `Copy` tagged sum: immediates are stored inline and
//! everything heap-shaped is a `Ref(HeapId)` into the two-zone [`Heap`].
//! Equality is structural for data and identity for callables and reference
//! cells; hashing is consistent with equality, including the numeric collapse
//! of integers and integral floats.

use std::fmt::Write as _;

use strum::IntoStaticStr;

use crate::{
    builtins::Builtin,
    env::{Env, VarId},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, KeywordId, StringId, SymbolId},
    resource::ResourceTracker,
    types::{LazySeq, List, Transient},
};

/// A runtime value. Immediate variants live inline; `Ref` points into the heap.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    /// An interned string literal; runtime-built strings live in the heap.
    InternString(StringId),
    Keyword(KeywordId),
    Symbol(SymbolId),
    /// A host-native builtin function or macro expander.
    Builtin(Builtin),
    /// A namespace var; `deref` goes through dynamic bindings when applicable.
    Var(VarId),
    Ref(HeapId),
}

/// Runtime type tags, used for protocol dispatch and the `type` builtin.
///
/// The kebab-case names (via strum) are the user-visible type keywords:
/// `TypeKw::LazySeq` is `:lazy-seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub(crate) enum TypeKw {
    Nil,
    Bool,
    Integer,
    Float,
    Char,
    String,
    Keyword,
    Symbol,
    List,
    Vector,
    Map,
    Set,
    Fn,
    MultiFn,
    Protocol,
    ProtocolFn,
    LazySeq,
    Atom,
    Delay,
    Volatile,
    Promise,
    Reduced,
    Transient,
    Pattern,
    Matcher,
    Var,
}

impl TypeKw {
    /// Maps a type name as written in `extend-type` to a tag.
    ///
    /// Accepts the conventional capitalized names (`String`, `Long`, ...) and
    /// the keyword-style lowercase names (`string`, `integer`, ...).
    pub fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "String" | "string" => Self::String,
            "Integer" | "Long" | "integer" => Self::Integer,
            "Float" | "Double" | "float" => Self::Float,
            "Boolean" | "bool" => Self::Bool,
            "Character" | "char" => Self::Char,
            "Keyword" | "keyword" => Self::Keyword,
            "Symbol" | "symbol" => Self::Symbol,
            "List" | "PersistentList" | "list" => Self::List,
            "Vector" | "PersistentVector" | "vector" => Self::Vector,
            "Map" | "PersistentMap" | "map" => Self::Map,
            "Set" | "PersistentSet" | "set" => Self::Set,
            "Fn" | "IFn" | "fn" => Self::Fn,
            "LazySeq" | "lazy-seq" => Self::LazySeq,
            "Atom" | "atom" => Self::Atom,
            "Pattern" | "pattern" => Self::Pattern,
            "Var" | "var" => Self::Var,
            "nil" => Self::Nil,
            _ => return None,
        })
    }
}

impl Value {
    /// Truthiness: everything except `nil` and `false`.
    #[inline]
    pub fn truthy(self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    /// The heap id behind a `Ref`, if any.
    #[inline]
    pub fn ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// Runtime type tag of this value.
    pub fn type_keyword(self, heap: &Heap<impl ResourceTracker>) -> TypeKw {
        match self {
            Self::Nil => TypeKw::Nil,
            Self::Bool(_) => TypeKw::Bool,
            Self::Int(_) => TypeKw::Integer,
            Self::Float(_) => TypeKw::Float,
            Self::Char(_) => TypeKw::Char,
            Self::InternString(_) => TypeKw::String,
            Self::Keyword(_) => TypeKw::Keyword,
            Self::Symbol(_) => TypeKw::Symbol,
            Self::Builtin(_) => TypeKw::Fn,
            Self::Var(_) => TypeKw::Var,
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(_) => TypeKw::String,
                HeapData::List(_) => TypeKw::List,
                HeapData::Vector(_) => TypeKw::Vector,
                HeapData::Map(_) => TypeKw::Map,
                HeapData::Set(_) => TypeKw::Set,
                HeapData::Fn(_) | HeapData::Partial(_) | HeapData::Comp(_) | HeapData::FnProto(_) => TypeKw::Fn,
                HeapData::MultiFn(_) => TypeKw::MultiFn,
                HeapData::Protocol(_) => TypeKw::Protocol,
                HeapData::ProtocolFn(_) => TypeKw::ProtocolFn,
                HeapData::LazySeq(_) => TypeKw::LazySeq,
                HeapData::Atom(_) => TypeKw::Atom,
                HeapData::Delay(_) => TypeKw::Delay,
                HeapData::Volatile(_) => TypeKw::Volatile,
                HeapData::Promise(_) => TypeKw::Promise,
                HeapData::Reduced(_) => TypeKw::Reduced,
                HeapData::Transient(_) => TypeKw::Transient,
                HeapData::Pattern(_) => TypeKw::Pattern,
                HeapData::Matcher(_) => TypeKw::Matcher,
            },
        }
    }

    /// Short type noun for error messages.
    pub fn describe(self, heap: &Heap<impl ResourceTracker>) -> &'static str {
        self.type_keyword(heap).into()
    }

    /// String content when this value is a string (interned or heap).
    pub fn as_str(self, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> Option<String> {
        match self {
            Self::InternString(id) => Some(interns.get_str(id).to_owned()),
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => Some(s.clone()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Structural equality.
///
/// Numeric equality collapses `int == float` when the float is integral.
/// Lists and vectors are equal iff same length and element-wise equal.
/// Callables, reference cells, and unrealized lazy sequences compare by
/// identity (the `=` builtin realizes sequences before comparing).
pub(crate) fn value_eq(
    a: Value,
    b: Value,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
            y.fract() == 0.0 && y == x as f64
        }
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Keyword(x), Value::Keyword(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Var(x), Value::Var(y)) => x == y,
        (Value::InternString(x), Value::InternString(y)) => x == y,
        (Value::InternString(s), Value::Ref(id)) | (Value::Ref(id), Value::InternString(s)) => {
            matches!(heap.get(id), HeapData::Str(content) if content == interns.get_str(s))
        }
        (Value::Ref(x), Value::Ref(y)) => {
            if x == y {
                return true;
            }
            heap_eq(x, y, heap, interns)
        }
        _ => false,
    }
}

fn heap_eq(a: HeapId, b: HeapId, heap: &Heap<impl ResourceTracker>, interns: &Interns) -> bool {
    match (heap.get(a), heap.get(b)) {
        (HeapData::Str(x), HeapData::Str(y)) => x == y,
        (HeapData::Vector(_) | HeapData::List(_), HeapData::Vector(_) | HeapData::List(_)) => {
            let xs = sequential_elements(Value::Ref(a), heap);
            let ys = sequential_elements(Value::Ref(b), heap);
            match (xs, ys) {
                (Some(xs), Some(ys)) => {
                    xs.len() == ys.len()
                        && xs
                            .iter()
                            .zip(&ys)
                            .all(|(&x, &y)| value_eq(x, y, heap, interns))
                }
                _ => false,
            }
        }
        (HeapData::Map(x), HeapData::Map(y)) => {
            x.len() == y.len()
                && x.entries.iter().all(|&(hash, key, val)| {
                    let Some(start) = y.hash_start(hash) else {
                        return false;
                    };
                    y.entries[start..]
                        .iter()
                        .take_while(|entry| entry.0 == hash)
                        .any(|&(_, k2, v2)| {
                            value_eq(key, k2, heap, interns) && value_eq(val, v2, heap, interns)
                        })
                })
        }
        (HeapData::Set(x), HeapData::Set(y)) => {
            x.len() == y.len()
                && x.entries.iter().all(|&(hash, elem)| {
                    let Some(start) = y.hash_start(hash) else {
                        return false;
                    };
                    y.entries[start..]
                        .iter()
                        .take_while(|entry| entry.0 == hash)
                        .any(|&(_, e2)| value_eq(elem, e2, heap, interns))
                })
        }
        (HeapData::Reduced(x), HeapData::Reduced(y)) => value_eq(*x, *y, heap, interns),
        // Identity for everything else (callables, cells, patterns, ...).
        _ => false,
    }
}

/// Collects the elements of a list or vector without forcing anything.
///
/// Returns `None` for non-sequential values and for lists whose chain is
/// interrupted by an unrealized lazy tail.
pub(crate) fn sequential_elements(
    value: Value,
    heap: &Heap<impl ResourceTracker>,
) -> Option<Vec<Value>> {
    match value {
        Value::Ref(id) => match heap.get(id) {
            HeapData::Vector(vector) => Some(vector.items.clone()),
            HeapData::List(_) => {
                let mut out = Vec::new();
                let mut cursor = value;
                loop {
                    match cursor {
                        Value::Ref(id) => match heap.get(id) {
                            HeapData::List(List::Empty) => return Some(out),
                            HeapData::List(List::Cons { first, rest, .. }) => {
                                out.push(*first);
                                cursor = *rest;
                            }
                            HeapData::LazySeq(LazySeq::Realized { seq }) => cursor = *seq,
                            _ => return None,
                        },
                        Value::Nil => return Some(out),
                        _ => return None,
                    }
                }
            }
            _ => None,
        },
        _ => None,
    }
}

const HASH_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv_bytes(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn mix_tag(tag: u64, hash: u64) -> u64 {
    fnv_bytes(HASH_SEED ^ tag.wrapping_mul(0x9e37_79b9_7f4a_7c15), &hash.to_le_bytes())
}

fn hash_int(value: i64) -> u64 {
    mix_tag(1, u64::from_ne_bytes(value.to_ne_bytes()))
}

fn hash_str(content: &str) -> u64 {
    mix_tag(2, fnv_bytes(HASH_SEED, content.as_bytes()))
}

/// Hashes a value consistently with [`value_eq`]:
/// `a == b` implies `hash(a) == hash(b)`, including `(int 1) == (float 1.0)`.
/// Ordered collections hash order-dependently; maps and sets are
/// order-independent.
pub(crate) fn value_hash(
    value: Value,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> u64 {
    match value {
        Value::Nil => mix_tag(0, 0),
        Value::Bool(b) => mix_tag(0, 1 + u64::from(b)),
        Value::Int(i) => hash_int(i),
        Value::Float(f) => {
            // Integral floats collapse to the int hash so 1 and 1.0 agree.
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                hash_int(f as i64)
            } else {
                mix_tag(3, f.to_bits())
            }
        }
        Value::Char(c) => mix_tag(4, u64::from(u32::from(c))),
        Value::InternString(id) => hash_str(interns.get_str(id)),
        Value::Keyword(id) => {
            let parts = interns.keyword(id);
            let ns_hash = parts.ns.map_or(0, |n| fnv_bytes(HASH_SEED, interns.get_str(n).as_bytes()));
            mix_tag(5, ns_hash ^ fnv_bytes(HASH_SEED, interns.get_str(parts.name).as_bytes()))
        }
        Value::Symbol(id) => {
            let parts = interns.symbol(id);
            let ns_hash = parts.ns.map_or(0, |n| fnv_bytes(HASH_SEED, interns.get_str(n).as_bytes()));
            mix_tag(6, ns_hash ^ fnv_bytes(HASH_SEED, interns.get_str(parts.name).as_bytes()))
        }
        Value::Builtin(b) => mix_tag(7, b as u64),
        Value::Var(id) => mix_tag(8, id.index() as u64),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => hash_str(s),
            HeapData::Vector(_) | HeapData::List(_) => {
                match sequential_elements(value, heap) {
                    Some(items) => {
                        let mut hash: u64 = 1;
                        for item in items {
                            hash = hash
                                .wrapping_mul(31)
                                .wrapping_add(value_hash(item, heap, interns));
                        }
                        mix_tag(9, hash)
                    }
                    None => mix_tag(13, id.index() as u64),
                }
            }
            HeapData::Map(map) => {
                let mut hash: u64 = 0;
                for &(_, key, val) in &map.entries {
                    hash = hash.wrapping_add(
                        value_hash(key, heap, interns) ^ value_hash(val, heap, interns),
                    );
                }
                mix_tag(10, hash)
            }
            HeapData::Set(set) => {
                let mut hash: u64 = 0;
                for &(_, elem) in &set.entries {
                    hash = hash.wrapping_add(value_hash(elem, heap, interns));
                }
                mix_tag(11, hash)
            }
            HeapData::Reduced(inner) => mix_tag(12, value_hash(*inner, heap, interns)),
            // Identity hash for callables, cells, and unrealized sequences.
            _ => mix_tag(13, id.index() as u64),
        },
    }
}

/// Writes the printed representation of a value.
///
/// `readably` selects `pr`-style output (strings quoted, chars as literals);
/// `print`-style output renders strings and chars raw. Unrealized lazy
/// sequences print as an opaque handle; the printing builtins realize
/// sequences before calling this.
pub(crate) fn write_value(
    out: &mut String,
    value: Value,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    env: &Env,
    readably: bool,
) {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => write_float(out, f),
        Value::Char(c) => {
            if readably {
                write_char_literal(out, c);
            } else {
                out.push(c);
            }
        }
        Value::InternString(id) => write_str(out, interns.get_str(id), readably),
        Value::Keyword(id) => out.push_str(&interns.keyword_text(id)),
        Value::Symbol(id) => out.push_str(&interns.symbol_text(id)),
        Value::Builtin(b) => {
            let _ = write!(out, "#<builtin {}>", b.name());
        }
        Value::Var(id) => {
            let var = env.var(id);
            let _ = write!(
                out,
                "#'{}/{}",
                interns.get_str(var.ns_name),
                interns.symbol_text(var.symbol)
            );
        }
        Value::Ref(id) => write_heap_value(out, id, heap, interns, env, readably),
    }
}

fn write_heap_value(
    out: &mut String,
    id: HeapId,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    env: &Env,
    readably: bool,
) {
    match heap.get(id) {
        HeapData::Str(s) => write_str(out, s, readably),
        HeapData::List(_) => {
            out.push('(');
            if let Some(items) = sequential_elements(Value::Ref(id), heap) {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    write_value(out, *item, heap, interns, env, readably);
                }
            }
            out.push(')');
        }
        HeapData::Vector(vector) => {
            out.push('[');
            for (i, item) in vector.items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, *item, heap, interns, env, readably);
            }
            out.push(']');
        }
        HeapData::Map(map) => {
            out.push('{');
            for (i, &(_, key, val)) in map.entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, key, heap, interns, env, readably);
                out.push(' ');
                write_value(out, val, heap, interns, env, readably);
            }
            out.push('}');
        }
        HeapData::Set(set) => {
            out.push_str("#{");
            for (i, &(_, elem)) in set.entries.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, elem, heap, interns, env, readably);
            }
            out.push('}');
        }
        HeapData::Fn(closure) => {
            let def = &closure.fn_id;
            let _ = write!(out, "#<fn:{}>", def.index());
        }
        HeapData::Partial(_) => out.push_str("#<partial>"),
        HeapData::Comp(_) => out.push_str("#<comp>"),
        HeapData::FnProto(proto) => {
            let _ = write!(out, "#<fn-proto arity:{}>", proto.arity);
        }
        HeapData::MultiFn(multi) => {
            let _ = write!(out, "#<multifn {}>", interns.symbol_text(multi.name));
        }
        HeapData::Protocol(protocol) => {
            let _ = write!(out, "#<protocol {}>", interns.symbol_text(protocol.name));
        }
        HeapData::ProtocolFn(pfn) => {
            let _ = write!(out, "#<protocol-fn {}>", interns.get_str(pfn.method));
        }
        HeapData::LazySeq(LazySeq::Realized { seq }) => {
            write_value(out, *seq, heap, interns, env, readably);
        }
        HeapData::LazySeq(_) => out.push_str("#<lazy-seq>"),
        HeapData::Atom(atom) => {
            out.push_str("#<atom ");
            write_value(out, atom.value, heap, interns, env, readably);
            out.push('>');
        }
        HeapData::Delay(_) => out.push_str("#<delay>"),
        HeapData::Volatile(v) => {
            out.push_str("#<volatile ");
            write_value(out, v.value, heap, interns, env, readably);
            out.push('>');
        }
        HeapData::Promise(_) => out.push_str("#<promise>"),
        HeapData::Reduced(inner) => {
            out.push_str("#<reduced ");
            write_value(out, *inner, heap, interns, env, readably);
            out.push('>');
        }
        HeapData::Transient(transient) => {
            let _ = write!(out, "#<{}>", Transient::describe(transient));
        }
        HeapData::Pattern(pattern) => {
            let _ = write!(out, "#\"{}\"", pattern.source);
        }
        HeapData::Matcher(_) => out.push_str("#<matcher>"),
    }
}

fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("##NaN");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "##Inf" } else { "##-Inf" });
    } else {
        let mut buffer = ryu::Buffer::new();
        out.push_str(buffer.format(f));
    }
}

fn write_str(out: &mut String, content: &str, readably: bool) {
    if !readably {
        out.push_str(content);
        return;
    }
    out.push('"');
    for c in content.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{c}' => out.push_str("\\f"),
            '\u{8}' => out.push_str("\\b"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn write_char_literal(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("\\newline"),
        ' ' => out.push_str("\\space"),
        '\t' => out.push_str("\\tab"),
        '\r' => out.push_str("\\return"),
        '\u{c}' => out.push_str("\\formfeed"),
        '\u{8}' => out.push_str("\\backspace"),
        _ => {
            out.push('\\');
            out.push(c);
        }
    }
}
