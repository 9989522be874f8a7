//! Regular expression engine.
//!
//! Used by the reader for `#"..."` literals and by the string builtins
//! (`re-find`, `re-matches`, `re-seq`, ...). Patterns are parsed into an AST
//! by a recursive-descent parser and executed by a backtracking matcher.
//!
//! The engine is byte-oriented and ASCII-level: character classes, predefined
//! classes (`\w`, `\s`, `\d`), and case folding cover ASCII only; non-ASCII
//! bytes participate as literal bytes. Backreferences match the exact bytes
//! previously captured by the referenced group.

mod matcher;
mod parser;

pub(crate) use matcher::MatchResult;

/// Flags that can be toggled by `(?i)`, `(?m)`, `(?s)` and flag groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct Flags {
    pub case_insensitive: bool,
    pub multiline: bool,
    pub dotall: bool,
}

impl Flags {
    /// Merges flags switched on by a flag group into the current set.
    #[must_use]
    pub fn merged(self, other: Self) -> Self {
        Self {
            case_insensitive: self.case_insensitive || other.case_insensitive,
            multiline: self.multiline || other.multiline,
            dotall: self.dotall || other.dotall,
        }
    }
}

/// Predefined character classes reachable via escapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) enum PredefClass {
    Digit,
    NotDigit,
    Word,
    NotWord,
    Whitespace,
    NotWhitespace,
}

impl PredefClass {
    /// Tests a single byte against this class. ASCII semantics.
    pub fn matches(self, byte: u8) -> bool {
        match self {
            Self::Digit => byte.is_ascii_digit(),
            Self::NotDigit => !byte.is_ascii_digit(),
            Self::Word => byte.is_ascii_alphanumeric() || byte == b'_',
            Self::NotWord => !(byte.is_ascii_alphanumeric() || byte == b'_'),
            Self::Whitespace => matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0c | 0x0b),
            Self::NotWhitespace => !matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0c | 0x0b),
        }
    }
}

/// Zero-width position assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) enum AnchorKind {
    Start,
    End,
    WordBoundary,
    NotWordBoundary,
}

/// Group flavors: `(..)`, `(?:..)`, `(?=..)`, `(?!..)`, `(?flags:..)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) enum GroupKind {
    Capturing,
    NonCapturing,
    Lookahead,
    NegativeLookahead,
    FlagGroup,
}

/// One node of the pattern AST.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) enum RegexNode {
    /// A single literal byte.
    Literal(u8),
    /// `.` — any byte except `\n` unless dotall.
    Dot,
    /// `[...]` with ranges, single bytes, and embedded predefined classes.
    CharClass {
        ranges: Vec<(u8, u8)>,
        singles: Vec<u8>,
        classes: Vec<PredefClass>,
        negated: bool,
    },
    Predefined(PredefClass),
    Anchor(AnchorKind),
    Group {
        kind: GroupKind,
        children: Vec<RegexNode>,
        /// 1-based capture index for capturing groups.
        capture_index: Option<u16>,
        /// Flags switched on for the children (flag groups only).
        flags: Option<Flags>,
    },
    Alternation { alts: Vec<RegexNode> },
    Quantifier {
        child: Box<RegexNode>,
        min: u32,
        max: Option<u32>,
        greedy: bool,
    },
    /// `\N` — matches the bytes captured by group N.
    Backreference(u16),
    Sequence(Vec<RegexNode>),
}

/// A parsed, validated pattern.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct Pattern {
    /// Pattern source text, for printing as `#"..."`.
    pub source: String,
    pub root: RegexNode,
    /// Number of capturing groups (excluding group 0).
    pub group_count: u16,
}

/// Pattern syntax error with a byte offset into the pattern source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegexError {
    pub message: String,
    pub position: usize,
}

impl Pattern {
    /// Parses a pattern. The empty pattern is legal and matches the empty string.
    pub fn parse(source: &str) -> Result<Self, RegexError> {
        parser::parse(source)
    }

    /// Finds the first match at or after `start`, scanning forward.
    pub fn find(&self, subject: &str, start: usize) -> Option<MatchResult> {
        matcher::find(self, subject.as_bytes(), start)
    }

    /// Matches the pattern against the entire subject.
    pub fn matches(&self, subject: &str) -> Option<MatchResult> {
        matcher::match_full(self, subject.as_bytes())
    }
}

/// A stateful matcher over one subject, backing `re-matcher`/`re-find` iteration.
#[derive(Debug, Clone)]
pub(crate) struct MatcherState {
    pub pattern: Pattern,
    pub subject: String,
    /// Next scan position.
    pub pos: usize,
    /// Most recent successful match, for `re-groups`.
    pub last_match: Option<MatchResult>,
}

impl MatcherState {
    pub fn new(pattern: Pattern, subject: String) -> Self {
        Self {
            pattern,
            subject,
            pos: 0,
            last_match: None,
        }
    }

    /// Advances to the next match, updating internal state.
    pub fn next_match(&mut self) -> Option<MatchResult> {
        if self.pos > self.subject.len() {
            return None;
        }
        let found = self.pattern.find(&self.subject, self.pos)?;
        // Zero-width matches must still advance the scan position.
        self.pos = if found.end > found.start { found.end } else { found.end + 1 };
        self.last_match = Some(found.clone());
        Some(found)
    }
}
