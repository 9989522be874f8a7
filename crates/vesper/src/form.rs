//! Syntactic forms — the reader's output.
//!
//! A [`Form`] is structural but unresolved: symbols have not been looked up,
//! macros have not been expanded, and collection literals are still literals.
//! Forms are transient; the analyzer consumes them and nothing retains them
//! past the current top-level expression.

use crate::{
    intern::{Interns, KeywordId, StringId, SymbolId},
    regex::Pattern,
};

/// A source location: file, 1-based line, 1-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Loc {
    /// Interned file name.
    pub file: StringId,
    pub line: u32,
    pub column: u32,
}

/// A reader form together with its source location and optional metadata.
///
/// Metadata comes from `^{...}` / `^:kw` / `^Tag` prefixes and is itself a
/// form (always a map after reader normalization).
#[derive(Debug, Clone)]
pub(crate) struct Form {
    pub kind: FormKind,
    pub loc: Loc,
    pub meta: Option<Box<Form>>,
}

impl Form {
    pub fn new(kind: FormKind, loc: Loc) -> Self {
        Self { kind, loc, meta: None }
    }

    /// True when this form is the unqualified symbol `name`.
    pub fn is_symbol(&self, interns: &Interns, name: &str) -> bool {
        matches!(self.kind, FormKind::Symbol(id)
            if interns.symbol_ns(id).is_none() && interns.symbol_name(id) == name)
    }

    /// True when this form is the keyword `:name` (unqualified).
    pub fn is_keyword(&self, interns: &Interns, name: &str) -> bool {
        matches!(self.kind, FormKind::Keyword(id)
            if interns.keyword_ns(id).is_none() && interns.keyword_name(id) == name)
    }
}

/// The structural variants a reader form can take.
#[derive(Debug, Clone)]
pub(crate) enum FormKind {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    /// Interned string literal content.
    Str(StringId),
    Keyword(KeywordId),
    Symbol(SymbolId),
    List(Vec<Form>),
    Vector(Vec<Form>),
    /// Map literal entries in source order. Duplicate keys are rejected by the reader.
    Map(Vec<(Form, Form)>),
    Set(Vec<Form>),
    /// A `#"..."` literal with its pattern already parsed and validated.
    Regex(Box<Pattern>),
    /// A `#tag form` literal, dispatched through the Env's data readers
    /// during analysis.
    Tagged { tag: SymbolId, form: Box<Form> },
    /// A runtime value spliced in by macro expansion; never produced by the
    /// reader. Analyzed as a constant when it is not list/vector/map data.
    HostValue(crate::value::Value),
}

impl FormKind {
    /// Short noun used in error messages ("list", "symbol", ...).
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Char(_) => "character",
            Self::Str(_) => "string",
            Self::Keyword(_) => "keyword",
            Self::Symbol(_) => "symbol",
            Self::List(_) => "list",
            Self::Vector(_) => "vector",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Regex(_) => "regex",
            Self::Tagged { .. } => "tagged literal",
            Self::HostValue(_) => "value",
        }
    }
}
