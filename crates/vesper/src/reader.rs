//! The reader: UTF-8 source text to syntactic [`Form`]s.
//!
//! One reader instance consumes one source string, producing top-level forms
//! one at a time (`None` on clean EOF). All dispatch macros are handled here:
//! quote family, syntax-quote with auto-gensym and symbol qualification,
//! deref, metadata, sets, regex literals, discard, var-quote, anonymous
//! functions, reader conditionals, and tagged literals.

use ahash::AHashMap;

use crate::{
    env::Env,
    error::{ErrorKind, RunError, RunResult},
    form::{Form, FormKind, Loc},
    intern::{Interns, StringId, SymbolId},
    regex::Pattern,
};

/// Symbols that syntax-quote leaves unqualified.
const SPECIAL_FORMS: &[&str] = &[
    "if", "do", "let", "fn", "loop", "recur", "quote", "def", "defmacro", "defn", "try", "throw",
    "var", "catch", "finally", "letfn", "lazy-seq", "defmulti", "defmethod", "defprotocol",
    "extend-type", "&", "unquote", "unquote-splicing",
];

/// Resume point for pulling top-level forms one at a time from one source.
///
/// The session re-creates a reader per form (the reader borrows the interner,
/// which evaluation also needs), carrying this state across reads so byte
/// offsets and line numbers stay correct.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadState {
    pub byte_offset: usize,
    pub line: u32,
    pub column: u32,
}

impl Default for ReadState {
    fn default() -> Self {
        Self {
            byte_offset: 0,
            line: 1,
            column: 1,
        }
    }
}

pub(crate) struct Reader<'a> {
    chars: Vec<char>,
    pos: usize,
    bytes: usize,
    line: u32,
    column: u32,
    file: StringId,
    interns: &'a mut Interns,
    env: &'a Env,
}

impl<'a> Reader<'a> {
    pub fn new(source: &str, file: &str, interns: &'a mut Interns, env: &'a Env) -> Self {
        Self::with_state(source, file, ReadState::default(), interns, env)
    }

    /// A reader over the unread remainder of a source, resuming at `state`.
    pub fn with_state(
        source: &str,
        file: &str,
        state: ReadState,
        interns: &'a mut Interns,
        env: &'a Env,
    ) -> Self {
        let file = interns.intern_str(file);
        Self {
            chars: source[state.byte_offset..].chars().collect(),
            pos: 0,
            bytes: 0,
            line: state.line,
            column: state.column,
            file,
            interns,
            env,
        }
    }

    /// The resume point after the most recent read, relative to the state the
    /// reader was created with plus its starting byte offset.
    pub fn state_delta(&self) -> ReadState {
        ReadState {
            byte_offset: self.bytes,
            line: self.line,
            column: self.column,
        }
    }

    /// Reads the next top-level form, or `None` on clean end of input.
    pub fn read(&mut self) -> RunResult<Option<Form>> {
        loop {
            self.skip_whitespace();
            if self.peek().is_none() {
                return Ok(None);
            }
            match self.read_form()? {
                Some(form) => return Ok(Some(form)),
                // Discarded (`#_`) or an empty reader conditional; keep going.
                None => continue,
            }
        }
    }

    fn loc(&self) -> Loc {
        Loc {
            file: self.file,
            line: self.line,
            column: self.column,
        }
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> RunError {
        RunError::with_loc(kind, message, self.loc())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        self.bytes += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// Reads one form; `None` means the form was consumed without producing
    /// anything (discard or non-matching reader conditional).
    fn read_form(&mut self) -> RunResult<Option<Form>> {
        self.skip_whitespace();
        let loc = self.loc();
        let Some(c) = self.peek() else {
            return Err(self.error(ErrorKind::UnexpectedEof, "unexpected end of input"));
        };
        match c {
            '(' => {
                self.bump();
                let items = self.read_until(')')?;
                Ok(Some(Form::new(FormKind::List(items), loc)))
            }
            '[' => {
                self.bump();
                let items = self.read_until(']')?;
                Ok(Some(Form::new(FormKind::Vector(items), loc)))
            }
            '{' => {
                self.bump();
                let items = self.read_until('}')?;
                Ok(Some(self.build_map(items, loc)?))
            }
            ')' | ']' | '}' => Err(self.error(
                ErrorKind::UnmatchedDelimiter,
                format!("unmatched delimiter '{c}'"),
            )),
            '"' => Ok(Some(self.read_string(loc)?)),
            '\\' => Ok(Some(self.read_char(loc)?)),
            '\'' => {
                self.bump();
                let quoted = self.require_form("quote")?;
                Ok(Some(self.wrap(loc, "quote", quoted)))
            }
            '`' => {
                self.bump();
                let form = self.require_form("syntax-quote")?;
                let mut gensyms = AHashMap::new();
                Ok(Some(self.syntax_quote(&form, &mut gensyms)?))
            }
            '~' => {
                self.bump();
                if self.peek() == Some('@') {
                    self.bump();
                    let form = self.require_form("unquote-splicing")?;
                    Ok(Some(self.wrap(loc, "unquote-splicing", form)))
                } else {
                    let form = self.require_form("unquote")?;
                    Ok(Some(self.wrap(loc, "unquote", form)))
                }
            }
            '@' => {
                self.bump();
                let form = self.require_form("deref")?;
                Ok(Some(self.wrap(loc, "deref", form)))
            }
            '^' => {
                self.bump();
                let meta = self.require_form("metadata")?;
                let meta = self.normalize_meta(meta)?;
                let mut target = self.require_form("metadata target")?;
                target.meta = Some(Box::new(meta));
                Ok(Some(target))
            }
            '#' => self.read_dispatch(loc),
            ':' => Ok(Some(self.read_keyword(loc)?)),
            c if c.is_ascii_digit() => Ok(Some(self.read_number(loc)?)),
            '+' | '-' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                Ok(Some(self.read_number(loc)?))
            }
            _ => Ok(Some(self.read_symbol(loc)?)),
        }
    }

    fn require_form(&mut self, context: &str) -> RunResult<Form> {
        match self.read_form()? {
            Some(form) => Ok(form),
            None => Err(self.error(
                ErrorKind::UnexpectedEof,
                format!("expected a form after {context}"),
            )),
        }
    }

    fn read_until(&mut self, close: char) -> RunResult<Vec<Form>> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => {
                    return Err(self.error(
                        ErrorKind::UnexpectedEof,
                        format!("expected '{close}' before end of input"),
                    ));
                }
                Some(c) if c == close => {
                    self.bump();
                    return Ok(items);
                }
                Some(c) if matches!(c, ')' | ']' | '}') => {
                    return Err(self.error(
                        ErrorKind::UnmatchedDelimiter,
                        format!("expected '{close}', found '{c}'"),
                    ));
                }
                Some(_) => {
                    if let Some(form) = self.read_form()? {
                        items.push(form);
                    }
                }
            }
        }
    }

    fn build_map(&mut self, items: Vec<Form>, loc: Loc) -> RunResult<Form> {
        if items.len() % 2 != 0 {
            return Err(RunError::with_loc(
                ErrorKind::InvalidToken,
                "map literal must contain an even number of forms",
                loc,
            ));
        }
        let mut entries: Vec<(Form, Form)> = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            if entries.iter().any(|(existing, _)| form_eq(existing, &key)) {
                return Err(RunError::with_loc(
                    ErrorKind::DuplicateKey,
                    "duplicate key in map literal",
                    key.loc,
                ));
            }
            entries.push((key, value));
        }
        Ok(Form::new(FormKind::Map(entries), loc))
    }

    fn read_dispatch(&mut self, loc: Loc) -> RunResult<Option<Form>> {
        self.bump(); // '#'
        match self.peek() {
            Some('{') => {
                self.bump();
                let items = self.read_until('}')?;
                for (i, item) in items.iter().enumerate() {
                    if items[..i].iter().any(|other| form_eq(other, item)) {
                        return Err(RunError::with_loc(
                            ErrorKind::DuplicateKey,
                            "duplicate element in set literal",
                            item.loc,
                        ));
                    }
                }
                Ok(Some(Form::new(FormKind::Set(items), loc)))
            }
            Some('"') => Ok(Some(self.read_regex(loc)?)),
            Some('_') => {
                self.bump();
                // Read and discard the next form, including its side errors.
                self.require_form("#_")?;
                Ok(None)
            }
            Some('\'') => {
                self.bump();
                let form = self.require_form("var-quote")?;
                Ok(Some(self.wrap(loc, "var", form)))
            }
            Some('(') => {
                let body = self.require_form("anonymous fn")?;
                Ok(Some(self.expand_anon_fn(body, loc)?))
            }
            Some('?') => {
                self.bump();
                self.read_conditional()
            }
            Some('#') => {
                self.bump();
                self.read_symbolic_value(loc)
            }
            Some(c) if is_symbol_start(c) => {
                let tag_form = self.read_symbol(self.loc())?;
                let FormKind::Symbol(tag) = tag_form.kind else {
                    return Err(self.error(ErrorKind::InvalidToken, "expected tag symbol after '#'"));
                };
                let form = self.require_form("tagged literal")?;
                Ok(Some(Form::new(
                    FormKind::Tagged {
                        tag,
                        form: Box::new(form),
                    },
                    loc,
                )))
            }
            _ => Err(self.error(ErrorKind::InvalidToken, "unsupported dispatch macro")),
        }
    }

    /// `##NaN`, `##Inf`, `##-Inf`.
    fn read_symbolic_value(&mut self, loc: Loc) -> RunResult<Option<Form>> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | ',') {
                break;
            }
            name.push(c);
            self.bump();
        }
        let value = match name.as_str() {
            "NaN" => f64::NAN,
            "Inf" => f64::INFINITY,
            "-Inf" => f64::NEG_INFINITY,
            _ => {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidToken,
                    format!("unknown symbolic value ##{name}"),
                    loc,
                ));
            }
        };
        Ok(Some(Form::new(FormKind::Float(value), loc)))
    }

    fn read_conditional(&mut self) -> RunResult<Option<Form>> {
        self.skip_whitespace();
        if self.peek() != Some('(') {
            return Err(self.error(
                ErrorKind::InvalidToken,
                "reader conditional requires a list",
            ));
        }
        self.bump();
        let items = self.read_until(')')?;
        if items.len() % 2 != 0 {
            return Err(self.error(
                ErrorKind::InvalidToken,
                "reader conditional requires feature/form pairs",
            ));
        }
        let mut chosen = None;
        let mut iter = items.into_iter();
        while let (Some(feature), Some(form)) = (iter.next(), iter.next()) {
            let FormKind::Keyword(kw) = feature.kind else {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidToken,
                    "reader conditional feature must be a keyword",
                    feature.loc,
                ));
            };
            if chosen.is_none() && self.env.features.contains(&kw) {
                chosen = Some(form);
            }
        }
        Ok(chosen)
    }

    fn read_regex(&mut self, loc: Loc) -> RunResult<Form> {
        self.bump(); // opening quote
        let mut source = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(self.error(ErrorKind::UnexpectedEof, "unterminated regex literal"));
                }
                Some('"') => break,
                Some('\\') => {
                    // Within `#"..."` a backslash escapes only the quote for
                    // the reader; everything else passes through to the
                    // pattern parser verbatim.
                    match self.bump() {
                        Some('"') => source.push('"'),
                        Some(other) => {
                            source.push('\\');
                            source.push(other);
                        }
                        None => {
                            return Err(
                                self.error(ErrorKind::UnexpectedEof, "unterminated regex literal")
                            );
                        }
                    }
                }
                Some(c) => source.push(c),
            }
        }
        match Pattern::parse(&source) {
            Ok(pattern) => Ok(Form::new(FormKind::Regex(Box::new(pattern)), loc)),
            Err(err) => Err(RunError::with_loc(
                ErrorKind::InvalidRegex,
                format!("invalid regex at offset {}: {}", err.position, err.message),
                loc,
            )),
        }
    }

    fn read_string(&mut self, loc: Loc) -> RunResult<Form> {
        self.bump(); // opening quote
        let mut content = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(self.error(ErrorKind::UnexpectedEof, "unterminated string literal"));
                }
                Some('"') => break,
                Some('\\') => {
                    let escape = self
                        .bump()
                        .ok_or_else(|| self.error(ErrorKind::UnexpectedEof, "unterminated string literal"))?;
                    match escape {
                        'n' => content.push('\n'),
                        't' => content.push('\t'),
                        'r' => content.push('\r'),
                        'f' => content.push('\u{c}'),
                        'b' => content.push('\u{8}'),
                        '\\' => content.push('\\'),
                        '"' => content.push('"'),
                        'u' => content.push(self.read_unicode_escape()?),
                        other => {
                            return Err(self.error(
                                ErrorKind::InvalidString,
                                format!("unsupported string escape \\{other}"),
                            ));
                        }
                    }
                }
                Some(c) => content.push(c),
            }
        }
        let id = self.interns.intern_str(&content);
        Ok(Form::new(FormKind::Str(id), loc))
    }

    fn read_unicode_escape(&mut self) -> RunResult<char> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error(ErrorKind::InvalidString, "\\u requires four hex digits"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code)
            .ok_or_else(|| self.error(ErrorKind::InvalidString, "\\u escape is not a valid character"))
    }

    fn read_char(&mut self, loc: Loc) -> RunResult<Form> {
        self.bump(); // backslash
        let mut token = String::new();
        match self.bump() {
            None => return Err(self.error(ErrorKind::UnexpectedEof, "unterminated character literal")),
            Some(first) => token.push(first),
        }
        // Multi-character names continue while alphanumeric.
        if token.chars().next().is_some_and(char::is_alphanumeric) {
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() {
                    token.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let c = match token.as_str() {
            "newline" => '\n',
            "space" => ' ',
            "tab" => '\t',
            "return" => '\r',
            "formfeed" => '\u{c}',
            "backspace" => '\u{8}',
            _ if token.chars().count() == 1 => token.chars().next().expect("single char"),
            _ if token.starts_with('u') && token.len() == 5 => {
                let code = u32::from_str_radix(&token[1..], 16).map_err(|_| {
                    RunError::with_loc(ErrorKind::InvalidCharacter, "invalid \\u character literal", loc)
                })?;
                char::from_u32(code).ok_or_else(|| {
                    RunError::with_loc(ErrorKind::InvalidCharacter, "invalid \\u character literal", loc)
                })?
            }
            _ => {
                return Err(RunError::with_loc(
                    ErrorKind::InvalidCharacter,
                    format!("unsupported character literal \\{token}"),
                    loc,
                ));
            }
        };
        Ok(Form::new(FormKind::Char(c), loc))
    }

    fn read_keyword(&mut self, loc: Loc) -> RunResult<Form> {
        self.bump(); // ':'
        let auto_ns = if self.peek() == Some(':') {
            self.bump();
            true
        } else {
            false
        };
        let token = self.read_symbol_token();
        if token.is_empty() {
            return Err(RunError::with_loc(ErrorKind::InvalidKeyword, "empty keyword", loc));
        }
        let (ns, name) = split_qualified(&token);
        if name.is_empty() {
            return Err(RunError::with_loc(
                ErrorKind::InvalidKeyword,
                format!("invalid keyword :{token}"),
                loc,
            ));
        }
        let id = if auto_ns {
            match ns {
                // `::alias/name` resolves through the current namespace's aliases.
                Some(alias) => {
                    let alias_id = self.interns.intern_str(alias);
                    let current = self.env.ns(self.env.current_ns);
                    let target = current.aliases.get(&alias_id).copied().ok_or_else(|| {
                        RunError::with_loc(
                            ErrorKind::InvalidKeyword,
                            format!("no namespace alias {alias} for ::{token}"),
                            loc,
                        )
                    })?;
                    let ns_name = self.interns.get_str(self.env.ns(target).name).to_owned();
                    self.interns.intern_keyword(Some(&ns_name), name)
                }
                None => {
                    let current = self.interns.get_str(self.env.ns(self.env.current_ns).name).to_owned();
                    self.interns.intern_keyword(Some(&current), name)
                }
            }
        } else {
            self.interns.intern_keyword(ns, name)
        };
        Ok(Form::new(FormKind::Keyword(id), loc))
    }

    fn read_number(&mut self, loc: Loc) -> RunResult<Form> {
        let token = self.read_symbol_token();
        parse_number(&token)
            .map(|kind| Form::new(kind, loc))
            .ok_or_else(|| {
                RunError::with_loc(ErrorKind::InvalidNumber, format!("invalid number '{token}'"), loc)
            })
    }

    fn read_symbol(&mut self, loc: Loc) -> RunResult<Form> {
        let token = self.read_symbol_token();
        if token.is_empty() {
            let c = self.peek().map_or(String::from("<eof>"), |c| c.to_string());
            return Err(self.error(ErrorKind::InvalidToken, format!("unexpected character '{c}'")));
        }
        Ok(match token.as_str() {
            "nil" => Form::new(FormKind::Nil, loc),
            "true" => Form::new(FormKind::Bool(true), loc),
            "false" => Form::new(FormKind::Bool(false), loc),
            _ => {
                let (ns, name) = split_qualified(&token);
                if name.is_empty() && token != "/" {
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidToken,
                        format!("invalid symbol '{token}'"),
                        loc,
                    ));
                }
                // The bare `/` symbol names the division function.
                let id = if token == "/" {
                    self.interns.intern_symbol(None, "/")
                } else {
                    self.interns.intern_symbol(ns, name)
                };
                Form::new(FormKind::Symbol(id), loc)
            }
        })
    }

    fn read_symbol_token(&mut self) -> String {
        let mut token = String::new();
        while let Some(c) = self.peek() {
            if is_symbol_continue(c) {
                token.push(c);
                self.bump();
            } else {
                break;
            }
        }
        token
    }

    fn wrap(&mut self, loc: Loc, head: &str, form: Form) -> Form {
        let sym = self.interns.intern_symbol(None, head);
        Form::new(
            FormKind::List(vec![Form::new(FormKind::Symbol(sym), loc), form]),
            loc,
        )
    }

    /// Normalizes metadata shorthand: `:kw` -> `{:kw true}`, `Sym`/`"str"` ->
    /// `{:tag ...}`; maps pass through.
    fn normalize_meta(&mut self, meta: Form) -> RunResult<Form> {
        let loc = meta.loc;
        match &meta.kind {
            FormKind::Map(_) => Ok(meta),
            FormKind::Keyword(_) => Ok(Form::new(
                FormKind::Map(vec![(meta, Form::new(FormKind::Bool(true), loc))]),
                loc,
            )),
            FormKind::Symbol(_) | FormKind::Str(_) => {
                let tag = self.interns.intern_keyword(None, "tag");
                Ok(Form::new(
                    FormKind::Map(vec![(Form::new(FormKind::Keyword(tag), loc), meta)]),
                    loc,
                ))
            }
            _ => Err(RunError::with_loc(
                ErrorKind::InvalidToken,
                "metadata must be a map, keyword, symbol, or string",
                loc,
            )),
        }
    }

    /// Expands `#(...)` to `(fn [args] (...))`, rewriting `%`, `%N`, `%&`.
    fn expand_anon_fn(&mut self, body: Form, loc: Loc) -> RunResult<Form> {
        let mut max_positional = 0usize;
        let mut rest = false;
        scan_percent_params(&body, self.interns, &mut max_positional, &mut rest);

        let mut positional: Vec<SymbolId> = Vec::with_capacity(max_positional);
        for i in 1..=max_positional {
            positional.push(self.interns.gensym(&format!("p{i}")));
        }
        let rest_sym = rest.then(|| self.interns.gensym("rest"));

        let rewritten = self.rewrite_percents(body, &positional, rest_sym)?;

        let mut params = Vec::new();
        for sym in &positional {
            params.push(Form::new(FormKind::Symbol(*sym), loc));
        }
        if let Some(rest_sym) = rest_sym {
            let amp = self.interns.intern_symbol(None, "&");
            params.push(Form::new(FormKind::Symbol(amp), loc));
            params.push(Form::new(FormKind::Symbol(rest_sym), loc));
        }
        let fn_sym = self.interns.intern_symbol(None, "fn");
        Ok(Form::new(
            FormKind::List(vec![
                Form::new(FormKind::Symbol(fn_sym), loc),
                Form::new(FormKind::Vector(params), loc),
                rewritten,
            ]),
            loc,
        ))
    }

    fn rewrite_percents(
        &mut self,
        form: Form,
        positional: &[SymbolId],
        rest: Option<SymbolId>,
    ) -> RunResult<Form> {
        let Form { kind, loc, meta } = form;
        let kind = match kind {
            FormKind::Symbol(id) => {
                let name = self.interns.symbol_name(id).to_owned();
                let is_unqualified = self.interns.symbol_ns(id).is_none();
                match percent_index(&name) {
                    Some(index) if is_unqualified => FormKind::Symbol(positional[index - 1]),
                    None if is_unqualified && name == "%&" => {
                        FormKind::Symbol(rest.expect("rest param was scanned"))
                    }
                    _ => FormKind::Symbol(id),
                }
            }
            FormKind::List(items) => FormKind::List(
                items
                    .into_iter()
                    .map(|f| self.rewrite_percents(f, positional, rest))
                    .collect::<RunResult<_>>()?,
            ),
            FormKind::Vector(items) => FormKind::Vector(
                items
                    .into_iter()
                    .map(|f| self.rewrite_percents(f, positional, rest))
                    .collect::<RunResult<_>>()?,
            ),
            FormKind::Set(items) => FormKind::Set(
                items
                    .into_iter()
                    .map(|f| self.rewrite_percents(f, positional, rest))
                    .collect::<RunResult<_>>()?,
            ),
            FormKind::Map(entries) => FormKind::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        Ok((
                            self.rewrite_percents(k, positional, rest)?,
                            self.rewrite_percents(v, positional, rest)?,
                        ))
                    })
                    .collect::<RunResult<_>>()?,
            ),
            other => other,
        };
        Ok(Form { kind, loc, meta })
    }

    /// Syntax-quote expansion: builds forms that evaluate to the quoted
    /// structure, resolving symbols and splicing unquotes.
    fn syntax_quote(
        &mut self,
        form: &Form,
        gensyms: &mut AHashMap<SymbolId, SymbolId>,
    ) -> RunResult<Form> {
        let loc = form.loc;
        match &form.kind {
            FormKind::Symbol(id) => {
                let name = self.interns.symbol_name(*id).to_owned();
                let qualified = self.interns.symbol_ns(*id).is_some();
                let resolved = if let Some(stripped) = name.strip_suffix('#') {
                    // Auto-gensym: the same `x#` maps to one fresh symbol
                    // within a single syntax-quote.
                    let fresh = match gensyms.get(id) {
                        Some(existing) => *existing,
                        None => {
                            let fresh = self.interns.gensym(stripped);
                            gensyms.insert(*id, fresh);
                            fresh
                        }
                    };
                    fresh
                } else if qualified || SPECIAL_FORMS.contains(&name.as_str()) {
                    *id
                } else if let Some(var) = self.env.resolve(*id, self.interns) {
                    let ns_name = self.interns.get_str(self.env.var(var).ns_name).to_owned();
                    self.interns.intern_symbol(Some(&ns_name), &name)
                } else {
                    let current = self
                        .interns
                        .get_str(self.env.ns(self.env.current_ns).name)
                        .to_owned();
                    self.interns.intern_symbol(Some(&current), &name)
                };
                Ok(self.wrap(loc, "quote", Form::new(FormKind::Symbol(resolved), loc)))
            }
            FormKind::List(items) => {
                if let Some(inner) = as_unquote(items, self.interns, "unquote") {
                    return Ok(inner.clone());
                }
                if as_unquote(items, self.interns, "unquote-splicing").is_some() {
                    return Err(RunError::with_loc(
                        ErrorKind::InvalidToken,
                        "unquote-splicing outside of a collection",
                        loc,
                    ));
                }
                let concat = self.splice_items(items, gensyms, loc)?;
                let seq_sym = self.interns.intern_symbol(None, "seq");
                Ok(Form::new(
                    FormKind::List(vec![Form::new(FormKind::Symbol(seq_sym), loc), concat]),
                    loc,
                ))
            }
            FormKind::Vector(items) => {
                let concat = self.splice_items(items, gensyms, loc)?;
                let vec_sym = self.interns.intern_symbol(None, "vec");
                Ok(Form::new(
                    FormKind::List(vec![Form::new(FormKind::Symbol(vec_sym), loc), concat]),
                    loc,
                ))
            }
            FormKind::Set(items) => {
                let concat = self.splice_items(items, gensyms, loc)?;
                let set_sym = self.interns.intern_symbol(None, "set");
                Ok(Form::new(
                    FormKind::List(vec![Form::new(FormKind::Symbol(set_sym), loc), concat]),
                    loc,
                ))
            }
            FormKind::Map(entries) => {
                let mut flat = Vec::with_capacity(entries.len() * 2);
                for (k, v) in entries {
                    flat.push(k.clone());
                    flat.push(v.clone());
                }
                let concat = self.splice_items(&flat, gensyms, loc)?;
                let apply_sym = self.interns.intern_symbol(None, "apply");
                let map_sym = self.interns.intern_symbol(None, "hash-map");
                Ok(Form::new(
                    FormKind::List(vec![
                        Form::new(FormKind::Symbol(apply_sym), loc),
                        Form::new(FormKind::Symbol(map_sym), loc),
                        concat,
                    ]),
                    loc,
                ))
            }
            // Self-evaluating literals quote to themselves.
            _ => Ok(form.clone()),
        }
    }

    /// Builds `(concat item*)` where plain items become `(list x)` and
    /// `~@form` splices directly.
    fn splice_items(
        &mut self,
        items: &[Form],
        gensyms: &mut AHashMap<SymbolId, SymbolId>,
        loc: Loc,
    ) -> RunResult<Form> {
        let concat_sym = self.interns.intern_symbol(None, "concat");
        let list_sym = self.interns.intern_symbol(None, "list");
        let mut parts = vec![Form::new(FormKind::Symbol(concat_sym), loc)];
        for item in items {
            if let FormKind::List(inner) = &item.kind
                && let Some(spliced) = as_unquote(inner, self.interns, "unquote-splicing")
            {
                parts.push(spliced.clone());
                continue;
            }
            let quoted = self.syntax_quote(item, gensyms)?;
            parts.push(Form::new(
                FormKind::List(vec![Form::new(FormKind::Symbol(list_sym), loc), quoted]),
                loc,
            ));
        }
        Ok(Form::new(FormKind::List(parts), loc))
    }
}

fn as_unquote<'f>(items: &'f [Form], interns: &Interns, which: &str) -> Option<&'f Form> {
    match items {
        [head, arg] if head.is_symbol(interns, which) => Some(arg),
        _ => None,
    }
}

fn percent_index(name: &str) -> Option<usize> {
    if name == "%" {
        return Some(1);
    }
    let digits = name.strip_prefix('%')?;
    if digits.is_empty() || digits == "&" {
        return None;
    }
    digits.parse().ok().filter(|&n| n >= 1 && n <= 20)
}

fn scan_percent_params(form: &Form, interns: &Interns, max_positional: &mut usize, rest: &mut bool) {
    match &form.kind {
        FormKind::Symbol(id) if interns.symbol_ns(*id).is_none() => {
            let name = interns.symbol_name(*id);
            if name == "%&" {
                *rest = true;
            } else if let Some(index) = percent_index(name) {
                *max_positional = (*max_positional).max(index);
            }
        }
        FormKind::List(items) | FormKind::Vector(items) | FormKind::Set(items) => {
            for item in items {
                scan_percent_params(item, interns, max_positional, rest);
            }
        }
        FormKind::Map(entries) => {
            for (k, v) in entries {
                scan_percent_params(k, interns, max_positional, rest);
                scan_percent_params(v, interns, max_positional, rest);
            }
        }
        _ => {}
    }
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphanumeric() || "*+!-_'?<>=./&$%#".contains(c)
}

fn is_symbol_continue(c: char) -> bool {
    c.is_alphanumeric() || "*+!-_'?<>=./&$%#:".contains(c)
}

fn split_qualified(token: &str) -> (Option<&str>, &str) {
    match token.find('/') {
        Some(index) if index > 0 && index + 1 < token.len() => {
            (Some(&token[..index]), &token[index + 1..])
        }
        _ => (None, token),
    }
}

/// Parses a numeric token: decimal/hex/octal/binary integers and floats with
/// optional exponent. Returns `None` when the token is not a valid number.
fn parse_number(token: &str) -> Option<FormKind> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    if digits.is_empty() {
        return None;
    }

    let apply_sign = |value: i64| if negative { -value } else { value };

    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(|v| FormKind::Int(apply_sign(v)));
    }
    if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2).ok().map(|v| FormKind::Int(apply_sign(v)));
    }
    if digits.contains(['.', 'e', 'E']) {
        return digits
            .parse::<f64>()
            .ok()
            .map(|v| FormKind::Float(if negative { -v } else { v }));
    }
    // Leading zero means octal, per traditional literal syntax.
    if digits.len() > 1 && digits.starts_with('0') {
        return i64::from_str_radix(&digits[1..], 8)
            .ok()
            .map(|v| FormKind::Int(apply_sign(v)));
    }
    digits.parse::<i64>().ok().map(|v| FormKind::Int(apply_sign(v)))
}

/// Structural equality of forms, used for duplicate-key detection.
fn form_eq(a: &Form, b: &Form) -> bool {
    match (&a.kind, &b.kind) {
        (FormKind::Nil, FormKind::Nil) => true,
        (FormKind::Bool(x), FormKind::Bool(y)) => x == y,
        (FormKind::Int(x), FormKind::Int(y)) => x == y,
        (FormKind::Float(x), FormKind::Float(y)) => x == y,
        (FormKind::Int(x), FormKind::Float(y)) | (FormKind::Float(y), FormKind::Int(x)) => {
            y.fract() == 0.0 && *y == *x as f64
        }
        (FormKind::Char(x), FormKind::Char(y)) => x == y,
        (FormKind::Str(x), FormKind::Str(y)) => x == y,
        (FormKind::Keyword(x), FormKind::Keyword(y)) => x == y,
        (FormKind::Symbol(x), FormKind::Symbol(y)) => x == y,
        (FormKind::List(x), FormKind::List(y)) | (FormKind::Vector(x), FormKind::Vector(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| form_eq(a, b))
        }
        (FormKind::Set(x), FormKind::Set(y)) => {
            x.len() == y.len() && x.iter().all(|a| y.iter().any(|b| form_eq(a, b)))
        }
        (FormKind::Map(x), FormKind::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k1, v1)| {
                    y.iter().any(|(k2, v2)| form_eq(k1, k2) && form_eq(v1, v2))
                })
        }
        _ => false,
    }
}
