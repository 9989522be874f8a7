//! Error taxonomy, internal error carrier, and the public exception type.
//!
//! Internally everything propagates as [`RunError`] through `RunResult`.
//! A `RunError` is either an internal error (carrying an [`ErrorKind`]) or a
//! user exception carrying the thrown `Value` as payload — there is no
//! side-channel for thrown values. At the public boundary errors are converted
//! to [`Exception`], which is self-contained (no interner or heap required).

use std::fmt::{self, Display};

use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::{form::Loc, resource::ResourceError, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Every failure class the pipeline can produce.
///
/// The kebab-case string form (via strum) doubles as the `:type` keyword in
/// the error-info map delivered to `catch` scopes, e.g.
/// `DivisionByZero` -> `:division-by-zero`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    UnexpectedEof,
    InvalidToken,
    UnmatchedDelimiter,
    InvalidNumber,
    InvalidCharacter,
    InvalidString,
    InvalidRegex,
    InvalidKeyword,
    UndefinedSymbol,
    InvalidArity,
    InvalidBinding,
    DuplicateKey,
    MacroError,
    DivisionByZero,
    IndexOutOfBounds,
    TypeError,
    AssertionError,
    UserException,
    OutOfMemory,
    InternalError,
}

/// Which pipeline stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Parse,
    Analysis,
    Macroexpand,
    Eval,
}

/// One entry of an evaluation callstack.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StackFrame {
    /// The function name, or `"<top-level>"` / `"<anonymous>"`.
    pub fn_name: String,
    /// Namespace the function was defined in, when known.
    pub ns: Option<String>,
    pub loc: Option<CodeLoc>,
    pub is_builtin: bool,
}

/// A self-contained source location for public error reporting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Internal error carrier used across the reader, analyzer, and both backends.
#[derive(Debug, Clone)]
pub(crate) struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Option<Loc>,
    /// Thrown payload; only present when `kind == UserException`.
    pub payload: Option<Value>,
    /// Innermost-first call frames accumulated during unwinding.
    pub frames: Vec<RawFrame>,
}

/// A callstack frame before conversion to the public [`StackFrame`].
#[derive(Debug, Clone)]
pub(crate) struct RawFrame {
    pub fn_name: String,
    pub ns: Option<String>,
    pub loc: Option<Loc>,
    pub is_builtin: bool,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: None,
            payload: None,
            frames: Vec::new(),
        }
    }

    pub fn with_loc(kind: ErrorKind, message: impl Into<String>, loc: Loc) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: Some(loc),
            payload: None,
            frames: Vec::new(),
        }
    }

    /// A user `throw`: the payload value is delivered to `catch` bindings as-is.
    pub fn user_exception(payload: Value) -> Self {
        Self {
            kind: ErrorKind::UserException,
            message: "user exception".to_owned(),
            loc: None,
            payload: Some(payload),
            frames: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn arity_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArity, message)
    }

    pub fn division_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "divide by zero")
    }

    pub fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(
            ErrorKind::IndexOutOfBounds,
            format!("index {index} out of bounds for length {len}"),
        )
    }

    pub fn undefined_symbol(name: &str) -> Self {
        Self::new(ErrorKind::UndefinedSymbol, format!("unable to resolve symbol: {name}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Attaches a location if none is present yet (innermost location wins).
    #[must_use]
    pub fn or_loc(mut self, loc: Loc) -> Self {
        if self.loc.is_none() {
            self.loc = Some(loc);
        }
        self
    }

    /// Appends a frame while unwinding through a function call.
    pub fn push_frame(&mut self, frame: RawFrame) {
        // Cap the recorded stack so runaway recursion errors stay printable.
        if self.frames.len() < 64 {
            self.frames.push(frame);
        }
    }

    /// True when a `try` form may deliver this error to its catch binding.
    ///
    /// Everything except resource exhaustion is catchable: user exceptions
    /// arrive as their payload, internal errors as an error-info map.
    pub fn is_catchable(&self) -> bool {
        !matches!(self.kind, ErrorKind::OutOfMemory)
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::Memory { used, limit } => Self::new(
                ErrorKind::OutOfMemory,
                format!("memory limit exceeded: {used} bytes used, limit {limit}"),
            ),
            ResourceError::Steps { limit } => Self::new(
                ErrorKind::InternalError,
                format!("instruction budget exceeded: limit {limit}"),
            ),
            ResourceError::Recursion { depth, limit } => Self::new(
                ErrorKind::InternalError,
                format!("recursion depth {depth} exceeds limit {limit}"),
            ),
        }
    }
}

/// Public, self-contained error surfaced to embedders.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Exception {
    pub kind: ErrorKind,
    pub phase: Phase,
    pub message: String,
    pub loc: Option<CodeLoc>,
    /// Printed representation of a thrown payload, when `kind == UserException`.
    pub payload_repr: Option<String>,
    /// Innermost-first callstack; empty outside the eval phase.
    pub callstack: Vec<StackFrame>,
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.phase, self.kind)?;
        if let Some(repr) = &self.payload_repr {
            write!(f, ": {repr}")?;
        } else if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(loc) = &self.loc {
            write!(f, "\n  at {loc}")?;
        }
        for frame in &self.callstack {
            let ns = frame.ns.as_deref().unwrap_or("");
            let sep = if ns.is_empty() { "" } else { "/" };
            write!(f, "\n  in {ns}{sep}{}", frame.fn_name)?;
            if frame.is_builtin {
                write!(f, " [builtin]")?;
            }
            if let Some(loc) = &frame.loc {
                write!(f, " ({loc})")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_renders_as_kebab_case() {
        assert_eq!(ErrorKind::DivisionByZero.to_string(), "division-by-zero");
        assert_eq!(ErrorKind::UnexpectedEof.to_string(), "unexpected-eof");
        assert_eq!(ErrorKind::UserException.to_string(), "user-exception");
    }

    #[test]
    fn exception_display_includes_location() {
        let exc = Exception {
            kind: ErrorKind::UnmatchedDelimiter,
            phase: Phase::Parse,
            message: "unmatched )".to_owned(),
            loc: Some(CodeLoc {
                file: "repl.vsp".to_owned(),
                line: 3,
                column: 7,
            }),
            payload_repr: None,
            callstack: vec![],
        };
        let text = exc.to_string();
        assert!(text.contains("parse error"));
        assert!(text.contains("repl.vsp:3:7"));
    }
}
