//! Tag value pattern matching.
//!
//! A [`PatternMatcher`] is compiled once from a `(tag, mode, pattern)` triple
//! and then tested against headers. Four modes are supported:
//!
//! - [`MatchMode::Strcmp`]: exact string equality
//! - [`MatchMode::Regex`]: unanchored regular expression search
//! - [`MatchMode::Glob`]: shell glob over the whole value (`*`, `?`, `[...]`)
//! - [`MatchMode::Default`]: a regex with `.`/`+` escaped, `*` widened to `.*`
//!   and `^...$` anchoring added; glob for file-name tags
//!
//! A leading `!` on the pattern inverts the test.

use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::error::{PkgdbError, Result};
use crate::types::{Header, Tag, TagValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchMode {
    #[default]
    Default,
    Strcmp,
    Regex,
    Glob,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchMode::Default => "default",
            MatchMode::Strcmp => "strcmp",
            MatchMode::Regex => "regex",
            MatchMode::Glob => "glob",
        })
    }
}

impl FromStr for MatchMode {
    type Err = PkgdbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(MatchMode::Default),
            "strcmp" | "exact" => Ok(MatchMode::Strcmp),
            "regex" => Ok(MatchMode::Regex),
            "glob" => Ok(MatchMode::Glob),
            other => Err(PkgdbError::InvalidArgument(format!(
                "unknown match mode {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Exact(String),
    Regex(Regex),
}

/// Compiled filter over one tag's values. Immutable once built.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    tag: Tag,
    mode: MatchMode,
    pattern: String,
    negate: bool,
    compiled: Compiled,
}

impl PatternMatcher {
    pub fn new(tag: Tag, mode: MatchMode, pattern: &str) -> Result<Self> {
        if matches!(tag, Tag::Packages | Tag::Label) {
            return Err(PkgdbError::InvalidArgument(format!(
                "{tag} is not a header tag and cannot be filtered"
            )));
        }

        let (negate, body) = match pattern.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };

        let mode = match mode {
            MatchMode::Default if matches!(tag, Tag::Basenames | Tag::Dirnames) => MatchMode::Glob,
            other => other,
        };

        let compiled = match mode {
            MatchMode::Strcmp => Compiled::Exact(body.to_string()),
            MatchMode::Regex => Compiled::Regex(compile(pattern, body)?),
            MatchMode::Glob => Compiled::Regex(compile(pattern, &glob_to_regex(body))?),
            MatchMode::Default => Compiled::Regex(compile(pattern, &default_to_regex(body))?),
        };

        Ok(Self {
            tag,
            mode,
            pattern: pattern.to_string(),
            negate,
            compiled,
        })
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Effective mode; `Default` on file-name tags reports `Glob`.
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    /// Raw test of one string, ignoring negation.
    pub fn matches_str(&self, value: &str) -> bool {
        match &self.compiled {
            Compiled::Exact(expected) => expected == value,
            Compiled::Regex(re) => re.is_match(value),
        }
    }

    /// Test a tag value: true if any element passes (after negation).
    ///
    /// A missing value never passes, except `Epoch`, which reads as `0`.
    pub fn matches_value(&self, value: Option<&TagValue>) -> bool {
        let epoch_default;
        let value = match value {
            Some(v) => v,
            None if self.tag == Tag::Epoch => {
                epoch_default = TagValue::Int32(vec![0]);
                &epoch_default
            }
            None => return false,
        };
        value
            .match_strings()
            .iter()
            .any(|s| self.matches_str(s) != self.negate)
    }

    pub fn matches_header(&self, header: &Header) -> bool {
        self.matches_value(header.get(self.tag))
    }
}

fn compile(original: &str, regex: &str) -> Result<Regex> {
    Regex::new(regex).map_err(|e| PkgdbError::Pattern {
        pattern: original.to_string(),
        reason: e.to_string(),
    })
}

/// Default-mode rewrite: escape `.` and `+` outside brackets, turn `*` into
/// `.*`, keep backslash escapes, and anchor with `^`/`$` unless present.
fn default_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    if !pattern.starts_with('^') {
        out.push('^');
    }

    let mut brackets = false;
    let mut prev = '\0';
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '.' | '+' if !brackets => out.push('\\'),
            '*' if !brackets => out.push('.'),
            '\\' => {
                out.push(c);
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                    prev = escaped;
                }
                continue;
            }
            '[' => brackets = true,
            ']' if prev != '[' => brackets = false,
            _ => {}
        }
        out.push(c);
        prev = c;
    }

    if !pattern.is_empty() && !pattern.ends_with('$') {
        out.push('$');
    }
    out
}

/// Whole-value glob (`fnmatch` with no flags): `*` and `?` also match `/`.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                push_literal(&mut out, chars[i]);
            }
            '[' => match bracket_class(&chars, i) {
                Some((class, end)) => {
                    out.push_str(&class);
                    i = end;
                }
                None => out.push_str("\\["),
            },
            c => push_literal(&mut out, c),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Translate a `[...]` class starting at `start`. Returns the regex class
/// and the index of the closing bracket, or `None` if it never closes.
fn bracket_class(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut j = start + 1;
    let mut class = String::from("[");

    if matches!(chars.get(j), Some('!') | Some('^')) {
        class.push('^');
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        class.push_str("\\]");
        j += 1;
    }

    while j < chars.len() {
        match chars[j] {
            ']' => {
                class.push(']');
                return Some((class, j));
            }
            c @ ('\\' | '[' | '&' | '~') => {
                class.push('\\');
                class.push(c);
            }
            c => class.push(c),
        }
        j += 1;
    }
    None
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}
