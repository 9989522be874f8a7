//! Recursive-descent pattern parser.
//!
//! Grammar:
//! ```text
//! alternation -> sequence ('|' sequence)*
//! sequence    -> quantified*
//! quantified  -> atom ('*' | '+' | '?' | '{m}' | '{m,}' | '{m,n}') '?'?
//! atom        -> literal | '.' | class | escape | anchor | group
//! ```

use super::{AnchorKind, Flags, GroupKind, Pattern, PredefClass, RegexError, RegexNode};

pub(super) fn parse(source: &str) -> Result<Pattern, RegexError> {
    let mut parser = Parser {
        bytes: source.as_bytes(),
        pos: 0,
        next_capture: 1,
    };
    let root = parser.parse_alternation()?;
    if parser.pos < parser.bytes.len() {
        // The only way to stop early is an unbalanced ')'.
        return Err(parser.error("unmatched closing parenthesis"));
    }
    Ok(Pattern {
        source: source.to_owned(),
        root,
        group_count: parser.next_capture - 1,
    })
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Next capture-group index to assign (1-based).
    next_capture: u16,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> RegexError {
        RegexError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_alternation(&mut self) -> Result<RegexNode, RegexError> {
        let first = self.parse_sequence()?;
        if self.peek() != Some(b'|') {
            return Ok(first);
        }
        let mut alts = vec![first];
        while self.eat(b'|') {
            alts.push(self.parse_sequence()?);
        }
        Ok(RegexNode::Alternation { alts })
    }

    fn parse_sequence(&mut self) -> Result<RegexNode, RegexError> {
        let mut nodes = Vec::new();
        while let Some(byte) = self.peek() {
            if byte == b'|' || byte == b')' {
                break;
            }
            // A bare inline flag group applies to the rest of this sequence.
            if self.at_inline_flags() {
                let flags = self.parse_inline_flags()?;
                let rest = self.parse_sequence()?;
                nodes.push(RegexNode::Group {
                    kind: GroupKind::FlagGroup,
                    children: vec![rest],
                    capture_index: None,
                    flags: Some(flags),
                });
                break;
            }
            let atom = self.parse_atom()?;
            nodes.push(self.parse_quantifier(atom)?);
        }
        if nodes.len() == 1 {
            Ok(nodes.pop().expect("sequence has one node"))
        } else {
            Ok(RegexNode::Sequence(nodes))
        }
    }

    /// True at `(?i)`-style bare flag settings (no colon, no body).
    fn at_inline_flags(&self) -> bool {
        let rest = &self.bytes[self.pos..];
        if !rest.starts_with(b"(?") {
            return false;
        }
        let mut i = 2;
        let mut saw_flag = false;
        while let Some(&b) = rest.get(i) {
            match b {
                b'i' | b'm' | b's' => {
                    saw_flag = true;
                    i += 1;
                }
                b')' => return saw_flag,
                _ => return false,
            }
        }
        false
    }

    fn parse_inline_flags(&mut self) -> Result<Flags, RegexError> {
        self.pos += 2; // consume "(?"
        let flags = self.parse_flag_letters()?;
        if !self.eat(b')') {
            return Err(self.error("expected ')' after inline flags"));
        }
        Ok(flags)
    }

    fn parse_flag_letters(&mut self) -> Result<Flags, RegexError> {
        let mut flags = Flags::default();
        loop {
            match self.peek() {
                Some(b'i') => {
                    flags.case_insensitive = true;
                    self.pos += 1;
                }
                Some(b'm') => {
                    flags.multiline = true;
                    self.pos += 1;
                }
                Some(b's') => {
                    flags.dotall = true;
                    self.pos += 1;
                }
                _ => return Ok(flags),
            }
        }
    }

    fn parse_quantifier(&mut self, atom: RegexNode) -> Result<RegexNode, RegexError> {
        let (min, max) = match self.peek() {
            Some(b'*') => {
                self.pos += 1;
                (0, None)
            }
            Some(b'+') => {
                self.pos += 1;
                (1, None)
            }
            Some(b'?') => {
                self.pos += 1;
                (0, Some(1))
            }
            Some(b'{') => match self.try_parse_counted()? {
                Some(bounds) => bounds,
                // `{` that is not a counted quantifier is a literal brace.
                None => return Ok(atom),
            },
            _ => return Ok(atom),
        };
        if matches!(
            atom,
            RegexNode::Anchor(_) | RegexNode::Quantifier { .. }
        ) {
            return Err(self.error("quantifier target cannot be quantified"));
        }
        if let Some(max) = max
            && max < min
        {
            return Err(self.error("quantifier range is inverted"));
        }
        // A trailing '?' flips the quantifier to lazy.
        let greedy = !self.eat(b'?');
        Ok(RegexNode::Quantifier {
            child: Box::new(atom),
            min,
            max,
            greedy,
        })
    }

    /// Parses `{m}`, `{m,}`, or `{m,n}` after the opening brace; returns
    /// `None` (without consuming) when the braces don't form a quantifier.
    fn try_parse_counted(&mut self) -> Result<Option<(u32, Option<u32>)>, RegexError> {
        let start = self.pos;
        self.pos += 1; // '{'
        let Some(min) = self.parse_number() else {
            self.pos = start;
            return Ok(None);
        };
        let max = if self.eat(b',') {
            if self.peek() == Some(b'}') {
                None
            } else {
                match self.parse_number() {
                    Some(n) => Some(n),
                    None => {
                        self.pos = start;
                        return Ok(None);
                    }
                }
            }
        } else {
            Some(min)
        };
        if !self.eat(b'}') {
            self.pos = start;
            return Ok(None);
        }
        Ok(Some((min, max)))
    }

    fn parse_number(&mut self) -> Option<u32> {
        let mut value: u32 = 0;
        let mut any = false;
        while let Some(byte) = self.peek() {
            if !byte.is_ascii_digit() {
                break;
            }
            any = true;
            value = value.saturating_mul(10).saturating_add(u32::from(byte - b'0'));
            self.pos += 1;
        }
        any.then_some(value)
    }

    fn parse_atom(&mut self) -> Result<RegexNode, RegexError> {
        let byte = self.bump().expect("caller checked for input");
        match byte {
            b'.' => Ok(RegexNode::Dot),
            b'^' => Ok(RegexNode::Anchor(AnchorKind::Start)),
            b'$' => Ok(RegexNode::Anchor(AnchorKind::End)),
            b'[' => self.parse_char_class(),
            b'(' => self.parse_group(),
            b'\\' => self.parse_escape(),
            b'*' | b'+' | b'?' => Err(self.error("dangling quantifier")),
            _ => Ok(RegexNode::Literal(byte)),
        }
    }

    fn parse_group(&mut self) -> Result<RegexNode, RegexError> {
        let (kind, flags) = if self.eat(b'?') {
            match self.peek() {
                Some(b':') => {
                    self.pos += 1;
                    (GroupKind::NonCapturing, None)
                }
                Some(b'=') => {
                    self.pos += 1;
                    (GroupKind::Lookahead, None)
                }
                Some(b'!') => {
                    self.pos += 1;
                    (GroupKind::NegativeLookahead, None)
                }
                Some(b'i' | b'm' | b's') => {
                    let flags = self.parse_flag_letters()?;
                    if !self.eat(b':') {
                        return Err(self.error("expected ':' after group flags"));
                    }
                    (GroupKind::FlagGroup, Some(flags))
                }
                _ => return Err(self.error("unsupported group syntax")),
            }
        } else {
            (GroupKind::Capturing, None)
        };
        let capture_index = if kind == GroupKind::Capturing {
            let index = self.next_capture;
            self.next_capture += 1;
            Some(index)
        } else {
            None
        };
        let body = self.parse_alternation()?;
        if !self.eat(b')') {
            return Err(self.error("unclosed group"));
        }
        Ok(RegexNode::Group {
            kind,
            children: vec![body],
            capture_index,
            flags,
        })
    }

    fn parse_escape(&mut self) -> Result<RegexNode, RegexError> {
        let Some(byte) = self.bump() else {
            return Err(self.error("pattern ends with a bare backslash"));
        };
        match byte {
            b'd' => Ok(RegexNode::Predefined(PredefClass::Digit)),
            b'D' => Ok(RegexNode::Predefined(PredefClass::NotDigit)),
            b'w' => Ok(RegexNode::Predefined(PredefClass::Word)),
            b'W' => Ok(RegexNode::Predefined(PredefClass::NotWord)),
            b's' => Ok(RegexNode::Predefined(PredefClass::Whitespace)),
            b'S' => Ok(RegexNode::Predefined(PredefClass::NotWhitespace)),
            b'b' => Ok(RegexNode::Anchor(AnchorKind::WordBoundary)),
            b'B' => Ok(RegexNode::Anchor(AnchorKind::NotWordBoundary)),
            b'n' => Ok(RegexNode::Literal(b'\n')),
            b't' => Ok(RegexNode::Literal(b'\t')),
            b'r' => Ok(RegexNode::Literal(b'\r')),
            b'f' => Ok(RegexNode::Literal(0x0c)),
            b'0' => Ok(RegexNode::Literal(0)),
            b'1'..=b'9' => {
                let mut index = u16::from(byte - b'0');
                while let Some(next) = self.peek() {
                    if !next.is_ascii_digit() || index >= 100 {
                        break;
                    }
                    index = index * 10 + u16::from(next - b'0');
                    self.pos += 1;
                }
                if index >= self.next_capture {
                    return Err(self.error(format!("backreference \\{index} to undefined group")));
                }
                Ok(RegexNode::Backreference(index))
            }
            _ => Ok(RegexNode::Literal(byte)),
        }
    }

    fn parse_char_class(&mut self) -> Result<RegexNode, RegexError> {
        let negated = self.eat(b'^');
        let mut ranges = Vec::new();
        let mut singles = Vec::new();
        let mut classes = Vec::new();
        let mut first = true;
        loop {
            let Some(byte) = self.bump() else {
                return Err(self.error("unclosed character class"));
            };
            // ']' as the first member is a literal.
            if byte == b']' && !first {
                break;
            }
            first = false;
            let low = if byte == b'\\' {
                match self.class_escape()? {
                    ClassMember::Byte(b) => b,
                    ClassMember::Class(c) => {
                        classes.push(c);
                        continue;
                    }
                }
            } else {
                byte
            };
            // Range, unless the '-' is the final member.
            if self.peek() == Some(b'-') && self.bytes.get(self.pos + 1).copied() != Some(b']') {
                self.pos += 1;
                let Some(high_raw) = self.bump() else {
                    return Err(self.error("unclosed character class"));
                };
                let high = if high_raw == b'\\' {
                    match self.class_escape()? {
                        ClassMember::Byte(b) => b,
                        ClassMember::Class(_) => {
                            return Err(self.error("class escape cannot end a range"));
                        }
                    }
                } else {
                    high_raw
                };
                if high < low {
                    return Err(self.error("character range is inverted"));
                }
                ranges.push((low, high));
            } else {
                singles.push(low);
            }
        }
        Ok(RegexNode::CharClass {
            ranges,
            singles,
            classes,
            negated,
        })
    }

    fn class_escape(&mut self) -> Result<ClassMember, RegexError> {
        let Some(byte) = self.bump() else {
            return Err(self.error("pattern ends with a bare backslash"));
        };
        Ok(match byte {
            b'd' => ClassMember::Class(PredefClass::Digit),
            b'D' => ClassMember::Class(PredefClass::NotDigit),
            b'w' => ClassMember::Class(PredefClass::Word),
            b'W' => ClassMember::Class(PredefClass::NotWord),
            b's' => ClassMember::Class(PredefClass::Whitespace),
            b'S' => ClassMember::Class(PredefClass::NotWhitespace),
            b'n' => ClassMember::Byte(b'\n'),
            b't' => ClassMember::Byte(b'\t'),
            b'r' => ClassMember::Byte(b'\r'),
            b'f' => ClassMember::Byte(0x0c),
            b'b' => ClassMember::Byte(0x08),
            b'0' => ClassMember::Byte(0),
            _ => ClassMember::Byte(byte),
        })
    }
}

enum ClassMember {
    Byte(u8),
    Class(PredefClass),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pattern_is_legal() {
        let pattern = parse("").expect("empty pattern parses");
        assert_eq!(pattern.group_count, 0);
    }

    #[test]
    fn counts_capture_groups() {
        let pattern = parse(r"(\d+)-(\d+)").expect("pattern parses");
        assert_eq!(pattern.group_count, 2);
    }

    #[test]
    fn rejects_unclosed_group() {
        assert!(parse("(ab").is_err());
        assert!(parse("ab)").is_err());
    }

    #[test]
    fn rejects_dangling_quantifier() {
        assert!(parse("*a").is_err());
    }

    #[test]
    fn rejects_forward_backreference() {
        assert!(parse(r"\1(a)").is_err());
    }

    #[test]
    fn literal_brace_is_not_a_quantifier() {
        assert!(parse("a{,2}").is_ok());
        assert!(parse("a{x}").is_ok());
    }
}
