//! Backtracking matcher.
//!
//! The matcher walks the pattern AST with an explicit continuation chain
//! allocated on the Rust stack, so quantifiers and alternations backtrack by
//! ordinary early returns. Capture slots are restored on every failed branch.

use super::{AnchorKind, Flags, GroupKind, Pattern, RegexNode};

/// A successful match: byte offsets of the whole match plus one slot per
/// capturing group (`None` when the group did not participate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MatchResult {
    pub start: usize,
    pub end: usize,
    pub groups: Vec<Option<(usize, usize)>>,
}

/// Scans forward from `start` for the first match.
pub(super) fn find(pattern: &Pattern, subject: &[u8], start: usize) -> Option<MatchResult> {
    let mut engine = Engine {
        subject,
        caps: vec![None; pattern.group_count as usize],
        anchored_end: false,
    };
    for at in start..=subject.len() {
        engine.caps.fill(None);
        if let Some(end) = engine.match_node(&pattern.root, at, Flags::default(), &Cont::Done) {
            return Some(MatchResult {
                start: at,
                end,
                groups: engine.caps.clone(),
            });
        }
    }
    None
}

/// Matches the whole subject (both ends anchored).
pub(super) fn match_full(pattern: &Pattern, subject: &[u8]) -> Option<MatchResult> {
    let mut engine = Engine {
        subject,
        caps: vec![None; pattern.group_count as usize],
        anchored_end: true,
    };
    let end = engine.match_node(&pattern.root, 0, Flags::default(), &Cont::Done)?;
    debug_assert_eq!(end, subject.len());
    Some(MatchResult {
        start: 0,
        end,
        groups: engine.caps.clone(),
    })
}

/// What remains to be matched after the current node succeeds.
enum Cont<'p, 'c> {
    Done,
    Seq {
        nodes: &'p [RegexNode],
        idx: usize,
        flags: Flags,
        next: &'c Cont<'p, 'c>,
    },
    CloseGroup {
        index: u16,
        start: usize,
        next: &'c Cont<'p, 'c>,
    },
    Quant {
        child: &'p RegexNode,
        n: u32,
        min: u32,
        max: Option<u32>,
        greedy: bool,
        flags: Flags,
        /// Position before the iteration that just completed; guards against
        /// infinite loops on zero-width children.
        iter_start: usize,
        next: &'c Cont<'p, 'c>,
    },
}

struct Engine<'s> {
    subject: &'s [u8],
    caps: Vec<Option<(usize, usize)>>,
    anchored_end: bool,
}

impl Engine<'_> {
    fn run_cont(&mut self, cont: &Cont<'_, '_>, pos: usize) -> Option<usize> {
        match cont {
            Cont::Done => {
                if self.anchored_end && pos != self.subject.len() {
                    None
                } else {
                    Some(pos)
                }
            }
            Cont::Seq { nodes, idx, flags, next } => {
                if *idx == nodes.len() {
                    self.run_cont(next, pos)
                } else {
                    let rest = Cont::Seq {
                        nodes,
                        idx: idx + 1,
                        flags: *flags,
                        next,
                    };
                    self.match_node(&nodes[*idx], pos, *flags, &rest)
                }
            }
            Cont::CloseGroup { index, start, next } => {
                let slot = usize::from(*index) - 1;
                let saved = self.caps[slot];
                self.caps[slot] = Some((*start, pos));
                match self.run_cont(next, pos) {
                    Some(end) => Some(end),
                    None => {
                        self.caps[slot] = saved;
                        None
                    }
                }
            }
            Cont::Quant {
                child,
                n,
                min,
                max,
                greedy,
                flags,
                iter_start,
                next,
            } => {
                if pos == *iter_start {
                    // The iteration matched zero bytes; repeating it cannot
                    // make progress.
                    return if *n >= *min { self.run_cont(next, pos) } else { None };
                }
                let child: &RegexNode = child;
                self.quant_step(child, *n, *min, *max, *greedy, *flags, pos, next)
            }
        }
    }

    fn match_node(
        &mut self,
        node: &RegexNode,
        pos: usize,
        flags: Flags,
        cont: &Cont<'_, '_>,
    ) -> Option<usize> {
        match node {
            RegexNode::Literal(expected) => {
                let byte = *self.subject.get(pos)?;
                let hit = if flags.case_insensitive {
                    byte.eq_ignore_ascii_case(expected)
                } else {
                    byte == *expected
                };
                if hit { self.run_cont(cont, pos + 1) } else { None }
            }
            RegexNode::Dot => {
                let byte = *self.subject.get(pos)?;
                if byte == b'\n' && !flags.dotall {
                    None
                } else {
                    self.run_cont(cont, pos + 1)
                }
            }
            RegexNode::CharClass {
                ranges,
                singles,
                classes,
                negated,
            } => {
                let byte = *self.subject.get(pos)?;
                let mut hit = class_member(byte, ranges, singles, classes, flags);
                if *negated {
                    hit = !hit;
                }
                if hit { self.run_cont(cont, pos + 1) } else { None }
            }
            RegexNode::Predefined(class) => {
                let byte = *self.subject.get(pos)?;
                if class.matches(byte) {
                    self.run_cont(cont, pos + 1)
                } else {
                    None
                }
            }
            RegexNode::Anchor(kind) => {
                if self.anchor_holds(*kind, pos, flags) {
                    self.run_cont(cont, pos)
                } else {
                    None
                }
            }
            RegexNode::Sequence(nodes) => self.run_cont(
                &Cont::Seq {
                    nodes,
                    idx: 0,
                    flags,
                    next: cont,
                },
                pos,
            ),
            RegexNode::Alternation { alts } => {
                for alt in alts {
                    let saved = self.caps.clone();
                    if let Some(end) = self.match_node(alt, pos, flags, cont) {
                        return Some(end);
                    }
                    self.caps = saved;
                }
                None
            }
            RegexNode::Group {
                kind,
                children,
                capture_index,
                flags: group_flags,
            } => {
                let inner_flags = match group_flags {
                    Some(extra) => flags.merged(*extra),
                    None => flags,
                };
                match kind {
                    GroupKind::Capturing => {
                        let index = capture_index.expect("capturing group has an index");
                        let close = Cont::CloseGroup {
                            index,
                            start: pos,
                            next: cont,
                        };
                        self.run_cont(
                            &Cont::Seq {
                                nodes: children,
                                idx: 0,
                                flags: inner_flags,
                                next: &close,
                            },
                            pos,
                        )
                    }
                    GroupKind::NonCapturing | GroupKind::FlagGroup => self.run_cont(
                        &Cont::Seq {
                            nodes: children,
                            idx: 0,
                            flags: inner_flags,
                            next: cont,
                        },
                        pos,
                    ),
                    GroupKind::Lookahead => {
                        let saved = self.caps.clone();
                        let saved_anchor = self.anchored_end;
                        self.anchored_end = false;
                        let sub = self.run_cont(
                            &Cont::Seq {
                                nodes: children,
                                idx: 0,
                                flags: inner_flags,
                                next: &Cont::Done,
                            },
                            pos,
                        );
                        self.anchored_end = saved_anchor;
                        if sub.is_some() {
                            // Zero-width: captures made inside persist.
                            self.run_cont(cont, pos)
                        } else {
                            self.caps = saved;
                            None
                        }
                    }
                    GroupKind::NegativeLookahead => {
                        let saved = self.caps.clone();
                        let saved_anchor = self.anchored_end;
                        self.anchored_end = false;
                        let sub = self.run_cont(
                            &Cont::Seq {
                                nodes: children,
                                idx: 0,
                                flags: inner_flags,
                                next: &Cont::Done,
                            },
                            pos,
                        );
                        self.anchored_end = saved_anchor;
                        self.caps = saved;
                        if sub.is_some() {
                            None
                        } else {
                            self.run_cont(cont, pos)
                        }
                    }
                }
            }
            RegexNode::Quantifier {
                child,
                min,
                max,
                greedy,
            } => self.quant_step(child, 0, *min, *max, *greedy, flags, pos, cont),
            RegexNode::Backreference(index) => {
                let captured = self.caps.get(usize::from(*index) - 1).copied().flatten()?;
                let text = &self.subject[captured.0..captured.1];
                let end = pos + text.len();
                if end > self.subject.len() {
                    return None;
                }
                let window = &self.subject[pos..end];
                let hit = if flags.case_insensitive {
                    window.eq_ignore_ascii_case(text)
                } else {
                    window == text
                };
                if hit { self.run_cont(cont, end) } else { None }
            }
        }
    }

    #[expect(clippy::too_many_arguments, reason = "quantifier state is threaded explicitly")]
    fn quant_step<'p>(
        &mut self,
        child: &'p RegexNode,
        n: u32,
        min: u32,
        max: Option<u32>,
        greedy: bool,
        flags: Flags,
        pos: usize,
        cont: &Cont<'p, '_>,
    ) -> Option<usize> {
        let can_repeat = max.is_none_or(|m| n < m);
        if greedy {
            if can_repeat {
                let saved = self.caps.clone();
                let again = Cont::Quant {
                    child,
                    n: n + 1,
                    min,
                    max,
                    greedy,
                    flags,
                    iter_start: pos,
                    next: cont,
                };
                if let Some(end) = self.match_node(child, pos, flags, &again) {
                    return Some(end);
                }
                self.caps = saved;
            }
            if n >= min { self.run_cont(cont, pos) } else { None }
        } else {
            if n >= min {
                let saved = self.caps.clone();
                if let Some(end) = self.run_cont(cont, pos) {
                    return Some(end);
                }
                self.caps = saved;
            }
            if can_repeat {
                let again = Cont::Quant {
                    child,
                    n: n + 1,
                    min,
                    max,
                    greedy,
                    flags,
                    iter_start: pos,
                    next: cont,
                };
                self.match_node(child, pos, flags, &again)
            } else {
                None
            }
        }
    }

    fn anchor_holds(&self, kind: AnchorKind, pos: usize, flags: Flags) -> bool {
        match kind {
            AnchorKind::Start => {
                pos == 0 || (flags.multiline && self.subject.get(pos - 1) == Some(&b'\n'))
            }
            AnchorKind::End => {
                pos == self.subject.len() || (flags.multiline && self.subject.get(pos) == Some(&b'\n'))
            }
            AnchorKind::WordBoundary => self.word_boundary(pos),
            AnchorKind::NotWordBoundary => !self.word_boundary(pos),
        }
    }

    fn word_boundary(&self, pos: usize) -> bool {
        let before = pos
            .checked_sub(1)
            .and_then(|i| self.subject.get(i))
            .is_some_and(|b| is_word_byte(*b));
        let after = self.subject.get(pos).is_some_and(|b| is_word_byte(*b));
        before != after
    }
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn class_member(
    byte: u8,
    ranges: &[(u8, u8)],
    singles: &[u8],
    classes: &[super::PredefClass],
    flags: Flags,
) -> bool {
    let candidates: &[u8] = if flags.case_insensitive && byte.is_ascii_alphabetic() {
        &[byte, byte ^ 0x20]
    } else {
        &[byte]
    };
    for &candidate in candidates {
        if singles.contains(&candidate) {
            return true;
        }
        if ranges.iter().any(|&(lo, hi)| lo <= candidate && candidate <= hi) {
            return true;
        }
    }
    classes.iter().any(|class| class.matches(byte))
}

#[cfg(test)]
mod tests {
    use super::super::Pattern;

    fn groups(pattern: &str, subject: &str) -> Option<Vec<Option<String>>> {
        let compiled = Pattern::parse(pattern).expect("pattern parses");
        let found = compiled.find(subject, 0)?;
        let bytes = subject.as_bytes();
        let mut out = vec![Some(
            String::from_utf8_lossy(&bytes[found.start..found.end]).into_owned(),
        )];
        for group in &found.groups {
            out.push(group.map(|(s, e)| String::from_utf8_lossy(&bytes[s..e]).into_owned()));
        }
        Some(out)
    }

    #[test]
    fn literal_find_scans_forward() {
        let pattern = Pattern::parse("world").unwrap();
        let found = pattern.find("hello world", 0).unwrap();
        assert_eq!((found.start, found.end), (6, 11));
    }

    #[test]
    fn digit_groups() {
        let found = groups(r"(\d+)-(\d+)", "12-34").unwrap();
        assert_eq!(
            found,
            vec![
                Some("12-34".to_owned()),
                Some("12".to_owned()),
                Some("34".to_owned())
            ]
        );
    }

    #[test]
    fn greedy_vs_lazy() {
        assert_eq!(groups(r"a.*b", "aXbYb").unwrap()[0], Some("aXbYb".to_owned()));
        assert_eq!(groups(r"a.*?b", "aXbYb").unwrap()[0], Some("aXb".to_owned()));
    }

    #[test]
    fn alternation_prefers_left() {
        assert_eq!(groups("ab|a", "ab").unwrap()[0], Some("ab".to_owned()));
    }

    #[test]
    fn full_match_is_anchored() {
        let pattern = Pattern::parse(r"\d+").unwrap();
        assert!(pattern.matches("123").is_some());
        assert!(pattern.matches("123x").is_none());
    }

    #[test]
    fn backreference_matches_captured_bytes() {
        let pattern = Pattern::parse(r"(\w+) \1").unwrap();
        assert!(pattern.matches("ha ha").is_some());
        assert!(pattern.matches("ha ho").is_none());
    }

    #[test]
    fn lookahead_is_zero_width() {
        assert_eq!(groups(r"a(?=b)", "ab").unwrap()[0], Some("a".to_owned()));
        assert!(groups(r"a(?=b)", "ac").is_none());
        assert!(groups(r"a(?!b)", "ac").is_some());
    }

    #[test]
    fn char_class_ranges_and_negation() {
        assert!(groups("[a-c]+", "abcd").is_some());
        assert_eq!(groups("[^b]+", "aXbY").unwrap()[0], Some("aX".to_owned()));
    }

    #[test]
    fn case_insensitive_flag_group() {
        assert!(Pattern::parse("(?i)abc").unwrap().matches("AbC").is_some());
        assert!(Pattern::parse("(?i:ab)c").unwrap().matches("ABc").is_some());
        assert!(Pattern::parse("(?i:ab)c").unwrap().matches("ABC").is_none());
    }

    #[test]
    fn word_boundary() {
        let pattern = Pattern::parse(r"\bcat\b").unwrap();
        assert!(pattern.find("a cat sat", 0).is_some());
        assert!(pattern.find("concatenate", 0).is_none());
    }

    #[test]
    fn empty_pattern_matches_empty() {
        let pattern = Pattern::parse("").unwrap();
        assert!(pattern.matches("").is_some());
        let found = pattern.find("abc", 1).unwrap();
        assert_eq!((found.start, found.end), (1, 1));
    }

    #[test]
    fn counted_quantifiers() {
        assert!(Pattern::parse(r"\d{2,3}").unwrap().matches("12").is_some());
        assert!(Pattern::parse(r"\d{2,3}").unwrap().matches("1234").is_none());
        assert!(Pattern::parse(r"a{2}").unwrap().matches("aa").is_some());
    }

    #[test]
    fn zero_width_quantifier_terminates() {
        // (a?)* over empty input must not loop.
        let pattern = Pattern::parse("(a?)*").unwrap();
        assert!(pattern.matches("").is_some());
        assert!(pattern.matches("aaa").is_some());
    }
}
