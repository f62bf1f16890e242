//! # Resource Identifier Matching
//!
//! An RI pattern has the shape `PATH[:METHOD[:SIGNAL]]`:
//!
//! - `PATH` is a `/` separated glob. A segment that is exactly `*` matches one
//!   segment, `**` matches zero or more segments. Inside a segment `*`, `?`
//!   and `[a-z]` / `[!x]` classes work as in shell globs.
//! - `METHOD` defaults to `*` when omitted.
//! - When `SIGNAL` is present the pattern only matches signals; when absent
//!   the signal name of the subject is ignored.
//!
//! Matching is pure. Patterns are compiled once at parse time and malformed
//! ones are rejected there with [`RiError`].

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when compiling an RI pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiError {
    #[error("Too many ':' separated parts in '{0}'")]
    TooManyParts(String),

    #[error("Empty method pattern in '{0}'")]
    EmptyMethod(String),

    #[error("Empty signal pattern in '{0}'")]
    EmptySignal(String),

    #[error("Empty path segment in '{0}'")]
    EmptySegment(String),

    #[error("'**' must be a whole path segment in '{0}'")]
    InvalidDeepWildcard(String),

    #[error("Unterminated character class in '{0}'")]
    UnterminatedClass(String),

    #[error("Trailing escape character in '{0}'")]
    TrailingEscape(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyRun,
    AnyChar,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches_char(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => true,
            Token::Class { negated, ranges } => {
                let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
                hit != *negated
            }
            Token::AnyRun => false,
        }
    }
}

/// Shell-style glob over a single name (a path segment, a method or a
/// signal name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    tokens: Vec<Token>,
}

impl Glob {
    /// Compile a glob.
    pub fn parse(pattern: &str) -> Result<Self, RiError> {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '?' => tokens.push(Token::AnyChar),
                '[' => {
                    let mut negated = false;
                    if matches!(chars.peek(), Some('!') | Some('^')) {
                        negated = true;
                        chars.next();
                    }
                    let mut ranges = Vec::new();
                    let mut first = true;
                    loop {
                        let Some(lo) = chars.next() else {
                            return Err(RiError::UnterminatedClass(pattern.to_string()));
                        };
                        if lo == ']' && !first {
                            break;
                        }
                        first = false;
                        let mut lookahead = chars.clone();
                        if lookahead.next() == Some('-') {
                            match lookahead.next() {
                                Some(hi) if hi != ']' => {
                                    chars.next();
                                    chars.next();
                                    ranges.push((lo, hi));
                                    continue;
                                }
                                _ => {}
                            }
                        }
                        ranges.push((lo, lo));
                    }
                    tokens.push(Token::Class { negated, ranges });
                }
                '\\' => match chars.next() {
                    Some(escaped) => tokens.push(Token::Literal(escaped)),
                    None => return Err(RiError::TrailingEscape(pattern.to_string())),
                },
                other => tokens.push(Token::Literal(other)),
            }
        }
        Ok(Self { tokens })
    }

    /// Check whether `text` matches this glob.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut t, mut s) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;

        while s < text.len() {
            match self.tokens.get(t) {
                Some(Token::AnyRun) => {
                    backtrack = Some((t, s));
                    t += 1;
                    continue;
                }
                Some(token) if token.matches_char(text[s]) => {
                    t += 1;
                    s += 1;
                    continue;
                }
                _ => {}
            }
            match backtrack {
                Some((star, consumed)) => {
                    t = star + 1;
                    s = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            }
        }
        self.tokens[t..].iter().all(|token| *token == Token::AnyRun)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `**`
    Deep,
    Name(Glob),
}

/// Split a path into its non-empty segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> + Clone {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Normalise a path: no leading, trailing or doubled `/`.
pub fn normalize_path(path: &str) -> String {
    path_segments(path).collect::<Vec<_>>().join("/")
}

/// Compiled path glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a path glob. The empty pattern matches only the root path.
    pub fn parse(pattern: &str) -> Result<Self, RiError> {
        let trimmed = pattern.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self { segments: Vec::new() });
        }
        let mut segments = trimmed
            .split('/')
            .map(|segment| {
                if segment.is_empty() {
                    Err(RiError::EmptySegment(pattern.to_string()))
                } else if segment == "**" {
                    Ok(Segment::Deep)
                } else if segment.contains("**") {
                    Err(RiError::InvalidDeepWildcard(pattern.to_string()))
                } else {
                    Glob::parse(segment).map(Segment::Name)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        segments.dedup_by(|next, prev| *next == Segment::Deep && *prev == Segment::Deep);
        Ok(Self { segments })
    }

    /// Check whether `path` matches.
    pub fn matches(&self, path: &str) -> bool {
        let subject: Vec<&str> = path_segments(path).collect();
        match_segments(&self.segments, &subject)
    }
}

/// `**` behaves like `*` in [`Glob::matches`], one segment per step, so only
/// the latest `**` needs a backtrack point. Work is bounded by pattern length
/// times subject length.
fn match_segments(pattern: &[Segment], subject: &[&str]) -> bool {
    let (mut p, mut s) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while s < subject.len() {
        match pattern.get(p) {
            Some(Segment::Deep) => {
                backtrack = Some((p, s));
                p += 1;
                continue;
            }
            Some(Segment::Name(glob)) if glob.matches(subject[s]) => {
                p += 1;
                s += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((deep, consumed)) => {
                p = deep + 1;
                s = consumed + 1;
                backtrack = Some((deep, consumed + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|segment| *segment == Segment::Deep)
}

/// Compiled `PATH:METHOD[:SIGNAL]` pattern.
#[derive(Debug, Clone)]
pub struct RiPattern {
    source: String,
    path: PathPattern,
    method: Glob,
    signal: Option<Glob>,
}

impl RiPattern {
    /// Compile a resource identifier pattern.
    pub fn parse(pattern: &str) -> Result<Self, RiError> {
        let source = pattern.trim().to_string();
        let parts: Vec<&str> = source.split(':').collect();
        if parts.len() > 3 {
            return Err(RiError::TooManyParts(source));
        }
        let path = PathPattern::parse(parts[0])?;
        let method = match parts.get(1) {
            None => Glob::parse("*")?,
            Some(m) if m.is_empty() => return Err(RiError::EmptyMethod(source)),
            Some(m) => Glob::parse(m)?,
        };
        let signal = match parts.get(2) {
            None => None,
            Some(s) if s.is_empty() => return Err(RiError::EmptySignal(source)),
            Some(s) => Some(Glob::parse(s)?),
        };
        Ok(Self {
            source,
            path,
            method,
            signal,
        })
    }

    /// The pattern text as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a subject triple. A signal-less subject never matches a pattern
    /// with a signal part; a pattern without one ignores the subject signal.
    pub fn matches(&self, path: &str, method: &str, signal: Option<&str>) -> bool {
        let signal_ok = match (&self.signal, signal) {
            (None, _) => true,
            (Some(glob), Some(name)) => glob.matches(name),
            (Some(_), None) => false,
        };
        signal_ok && self.method.matches(method) && self.path.matches(path)
    }

    /// Match only the path part.
    pub fn matches_path(&self, path: &str) -> bool {
        self.path.matches(path)
    }
}

impl PartialEq for RiPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for RiPattern {}

impl FromStr for RiPattern {
    type Err = RiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RiPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
