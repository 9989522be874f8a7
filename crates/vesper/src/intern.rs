//! String, symbol, and keyword interning.
//!
//! The reader and analyzer intern every identifier-like token once and refer
//! to it by index afterwards (`StringId`, `SymbolId`, `KeywordId`). This keeps
//! `Value` small and makes symbol/keyword equality a single integer compare.
//! Lookups back into the table are only needed for error messages and printing.

use ahash::AHashMap;

/// Index into the string interner's storage.
///
/// Uses `u32` to save space. This limits us to ~4 billion unique strings,
/// which is more than sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an interned symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SymbolId(u32);

impl SymbolId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an interned keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct KeywordId(u32);

impl KeywordId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The two halves of a symbol or keyword: optional namespace part and name.
///
/// Both parts are interned strings; `foo/bar` has `ns = Some("foo")`,
/// `bar` has `ns = None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NameParts {
    pub ns: Option<StringId>,
    pub name: StringId,
}

/// Interner for strings, symbols, and keywords.
///
/// Symbols and keywords are deduplicated by `(ns, name)` so that structural
/// equality reduces to id equality. Strings are deduplicated by content.
#[derive(Debug, Default)]
pub(crate) struct Interns {
    strings: Vec<String>,
    string_ids: AHashMap<String, StringId>,
    symbols: Vec<NameParts>,
    symbol_ids: AHashMap<NameParts, SymbolId>,
    keywords: Vec<NameParts>,
    keyword_ids: AHashMap<NameParts, KeywordId>,
    /// Counter backing `gensym`; monotonically increasing per session.
    gensym_counter: u32,
}

impl Interns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the existing id when the content was seen before.
    pub fn intern_str(&mut self, s: &str) -> StringId {
        if let Some(id) = self.string_ids.get(s) {
            return *id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("string interner overflow"));
        self.strings.push(s.to_owned());
        self.string_ids.insert(s.to_owned(), id);
        id
    }

    /// Returns the content of an interned string.
    pub fn get_str(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Interns a symbol by `(ns, name)`.
    pub fn intern_symbol(&mut self, ns: Option<&str>, name: &str) -> SymbolId {
        let parts = NameParts {
            ns: ns.map(|n| self.intern_str(n)),
            name: self.intern_str(name),
        };
        if let Some(id) = self.symbol_ids.get(&parts) {
            return *id;
        }
        let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol interner overflow"));
        self.symbols.push(parts);
        self.symbol_ids.insert(parts, id);
        id
    }

    /// Interns a keyword by `(ns, name)`.
    pub fn intern_keyword(&mut self, ns: Option<&str>, name: &str) -> KeywordId {
        let parts = NameParts {
            ns: ns.map(|n| self.intern_str(n)),
            name: self.intern_str(name),
        };
        if let Some(id) = self.keyword_ids.get(&parts) {
            return *id;
        }
        let id = KeywordId(u32::try_from(self.keywords.len()).expect("keyword interner overflow"));
        self.keywords.push(parts);
        self.keyword_ids.insert(parts, id);
        id
    }

    pub fn symbol(&self, id: SymbolId) -> NameParts {
        self.symbols[id.index()]
    }

    pub fn keyword(&self, id: KeywordId) -> NameParts {
        self.keywords[id.index()]
    }

    /// Returns the name part of a symbol (without namespace).
    pub fn symbol_name(&self, id: SymbolId) -> &str {
        self.get_str(self.symbols[id.index()].name)
    }

    /// Returns the namespace part of a symbol, if qualified.
    pub fn symbol_ns(&self, id: SymbolId) -> Option<&str> {
        self.symbols[id.index()].ns.map(|n| self.get_str(n))
    }

    /// Returns the name part of a keyword (without namespace).
    pub fn keyword_name(&self, id: KeywordId) -> &str {
        self.get_str(self.keywords[id.index()].name)
    }

    /// Returns the namespace part of a keyword, if qualified.
    pub fn keyword_ns(&self, id: KeywordId) -> Option<&str> {
        self.keywords[id.index()].ns.map(|n| self.get_str(n))
    }

    /// Renders a symbol as written in source (`ns/name` or `name`).
    pub fn symbol_text(&self, id: SymbolId) -> String {
        let parts = self.symbols[id.index()];
        match parts.ns {
            Some(ns) => format!("{}/{}", self.get_str(ns), self.get_str(parts.name)),
            None => self.get_str(parts.name).to_owned(),
        }
    }

    /// Renders a keyword with its leading colon (`:ns/name` or `:name`).
    pub fn keyword_text(&self, id: KeywordId) -> String {
        let parts = self.keywords[id.index()];
        match parts.ns {
            Some(ns) => format!(":{}/{}", self.get_str(ns), self.get_str(parts.name)),
            None => format!(":{}", self.get_str(parts.name)),
        }
    }

    /// Produces a fresh unqualified symbol, e.g. `G__17` or `x__17`.
    pub fn gensym(&mut self, prefix: &str) -> SymbolId {
        self.gensym_counter += 1;
        let name = format!("{prefix}__{}", self.gensym_counter);
        self.intern_symbol(None, &name)
    }

    /// Number of interned symbols; used by heap statistics.
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_dedup() {
        let mut interns = Interns::new();
        let a = interns.intern_symbol(None, "foo");
        let b = interns.intern_symbol(None, "foo");
        let c = interns.intern_symbol(Some("ns"), "foo");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interns.symbol_text(c), "ns/foo");
    }

    #[test]
    fn keyword_and_symbol_spaces_are_distinct() {
        let mut interns = Interns::new();
        let k = interns.intern_keyword(None, "foo");
        assert_eq!(interns.keyword_text(k), ":foo");
        assert_eq!(interns.keyword_name(k), "foo");
    }

    #[test]
    fn gensym_is_fresh() {
        let mut interns = Interns::new();
        let a = interns.gensym("G");
        let b = interns.gensym("G");
        assert_ne!(a, b);
    }
}
