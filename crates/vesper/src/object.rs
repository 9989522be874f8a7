//! Host-facing values.
//!
//! An [`Object`] is a self-contained copy of a runtime value: no heap ids, no
//! interner handles. Evaluation results cross the embedding boundary as
//! objects (lazy sequences fully realized), so hosts can inspect, serialize,
//! and compare them without touching engine internals.

use std::fmt::{self, Display, Write as _};

use crate::{
    builtins::{Caller, EvalCtx, seqs, strings},
    error::RunResult,
    heap::HeapData,
    resource::ResourceTracker,
    value::Value,
};

/// A detached, host-owned value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
    Keyword { ns: Option<String>, name: String },
    Symbol { ns: Option<String>, name: String },
    List(Vec<Object>),
    Vector(Vec<Object>),
    /// Map entries in the engine's internal order.
    Map(Vec<(Object, Object)>),
    Set(Vec<Object>),
    /// Opaque printed representation for functions, reference cells,
    /// patterns, and other non-data values.
    Repr(String),
}

impl Object {
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// The integer payload, if this is an `Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The string payload, if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convenience constructor for an unqualified keyword.
    #[must_use]
    pub fn keyword(name: &str) -> Self {
        Self::Keyword {
            ns: None,
            name: name.to_owned(),
        }
    }

    /// Convenience constructor for an unqualified symbol.
    #[must_use]
    pub fn symbol(name: &str) -> Self {
        Self::Symbol {
            ns: None,
            name: name.to_owned(),
        }
    }
}

impl Display for Object {
    /// Prints in data-literal syntax (`pr` style).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => {
                if x.is_nan() {
                    f.write_str("##NaN")
                } else if x.is_infinite() {
                    f.write_str(if *x > 0.0 { "##Inf" } else { "##-Inf" })
                } else {
                    let mut buffer = ryu::Buffer::new();
                    f.write_str(buffer.format(*x))
                }
            }
            Self::Char(c) => write!(f, "\\{c}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Keyword { ns, name } => match ns {
                Some(ns) => write!(f, ":{ns}/{name}"),
                None => write!(f, ":{name}"),
            },
            Self::Symbol { ns, name } => match ns {
                Some(ns) => write!(f, "{ns}/{name}"),
                None => write!(f, "{name}"),
            },
            Self::List(items) => write_seq(f, items, "(", ")"),
            Self::Vector(items) => write_seq(f, items, "[", "]"),
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} {v}")?;
                }
                f.write_str("}")
            }
            Self::Set(items) => write_seq(f, items, "#{", "}"),
            Self::Repr(text) => f.write_str(text),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Object], open: &str, close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_char(' ')?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}

/// Detaches a runtime value into an [`Object`], realizing lazy sequences.
pub(crate) fn value_to_object<T: ResourceTracker>(
    ctx: &mut EvalCtx<'_, T>,
    caller: &mut dyn Caller<T>,
    value: Value,
) -> RunResult<Object> {
    Ok(match value {
        Value::Nil => Object::Nil,
        Value::Bool(b) => Object::Bool(b),
        Value::Int(i) => Object::Int(i),
        Value::Float(f) => Object::Float(f),
        Value::Char(c) => Object::Char(c),
        Value::InternString(id) => Object::String(ctx.interns.get_str(id).to_owned()),
        Value::Keyword(id) => Object::Keyword {
            ns: ctx.interns.keyword_ns(id).map(str::to_owned),
            name: ctx.interns.keyword_name(id).to_owned(),
        },
        Value::Symbol(id) => Object::Symbol {
            ns: ctx.interns.symbol_ns(id).map(str::to_owned),
            name: ctx.interns.symbol_name(id).to_owned(),
        },
        Value::Builtin(_) | Value::Var(_) => {
            Object::Repr(strings::stringify(ctx, caller, value, true)?)
        }
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => Object::String(s.clone()),
            HeapData::List(_) | HeapData::LazySeq(_) => {
                let items = seqs::realize_to_vec(ctx, caller, value, None)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(value_to_object(ctx, caller, item)?);
                }
                Object::List(out)
            }
            HeapData::Vector(vector) => {
                let items = vector.items.clone();
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(value_to_object(ctx, caller, item)?);
                }
                Object::Vector(out)
            }
            HeapData::Map(map) => {
                let entries: Vec<(Value, Value)> =
                    map.entries.iter().map(|&(_, k, v)| (k, v)).collect();
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = value_to_object(ctx, caller, k)?;
                    let val = value_to_object(ctx, caller, v)?;
                    out.push((key, val));
                }
                Object::Map(out)
            }
            HeapData::Set(set) => {
                let items: Vec<Value> = set.entries.iter().map(|&(_, e)| e).collect();
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(value_to_object(ctx, caller, item)?);
                }
                Object::Set(out)
            }
            _ => Object::Repr(strings::stringify(ctx, caller, value, true)?),
        },
    })
}
