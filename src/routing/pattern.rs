//! Wildcard pattern compilation and matching.
//!
//! # Pattern Syntax
//! - `*` matches a run of characters inside one path segment (no `/`)
//! - `**` (or any longer run of `*`) matches across segments
//! - `\` escapes the next character, so `\*` is a literal star
//! - everything else is a literal code point
//!
//! # Matching
//! ```text
//! "a/**/z"  →  [a][/][MatchPath][/][z][End]
//!
//! prefix "a/"      must start the input
//! MatchPath + "/z" final literal run, anchored at the end of the input
//! ```
//!
//! # Design Decisions
//! - No backtracking: every inner literal run binds to its first
//!   occurrence after the cursor. Route tables rely on this.
//! - A pattern must consume the whole input.
//! - One capture per wildcard, left to right.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Path segment separator. File wildcards never cross it.
pub const SEPARATOR: char = '/';

const ESCAPE: char = '\\';
const WILDCARD: char = '*';

/// One instruction of a compiled pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// A literal code point.
    Literal(char),
    /// Matches within a single path segment.
    MatchFile,
    /// Matches across path segments.
    MatchPath,
    /// Terminates every compiled pattern.
    End,
}

impl Segment {
    fn wildcard(self) -> Option<Wildcard> {
        match self {
            Segment::MatchFile => Some(Wildcard::File),
            Segment::MatchPath => Some(Wildcard::Path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wildcard {
    File,
    Path,
}

/// A wildcard followed by the literal run that bounds it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    wildcard: Wildcard,
    literal: String,
}

/// An immutable, compiled wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    source: String,
    segments: Vec<Segment>,
    prefix: String,
    steps: Vec<Step>,
}

/// Compile a wildcard pattern.
///
/// Never fails: the empty pattern compiles to a lone [`Segment::End`] and a
/// dangling trailing escape is dropped.
pub fn compile(pattern: &str) -> CompiledPattern {
    let mut segments = Vec::with_capacity(pattern.len() + 1);
    let mut escaped = false;

    for ch in pattern.chars() {
        if escaped {
            segments.push(Segment::Literal(ch));
            escaped = false;
            continue;
        }
        match ch {
            ESCAPE => escaped = true,
            WILDCARD => {
                // A star right after a wildcard widens it to path scope.
                match segments.last_mut().filter(|s: &&mut Segment| s.wildcard().is_some()) {
                    Some(last) => *last = Segment::MatchPath,
                    None => segments.push(Segment::MatchFile),
                }
            }
            other => segments.push(Segment::Literal(other)),
        }
    }
    segments.push(Segment::End);

    let (prefix, steps) = split_runs(&segments);
    CompiledPattern {
        source: pattern.to_string(),
        segments,
        prefix,
        steps,
    }
}

/// Split the instruction array into the leading literal run and the
/// wildcard/literal steps that follow it.
fn split_runs(segments: &[Segment]) -> (String, Vec<Step>) {
    let mut prefix = String::new();
    let mut steps: Vec<Step> = Vec::new();

    for segment in segments {
        match *segment {
            Segment::Literal(ch) => match steps.last_mut() {
                Some(step) => step.literal.push(ch),
                None => prefix.push(ch),
            },
            Segment::MatchFile | Segment::MatchPath => {
                if let Some(wildcard) = segment.wildcard() {
                    steps.push(Step {
                        wildcard,
                        literal: String::new(),
                    });
                }
            }
            Segment::End => break,
        }
    }

    (prefix, steps)
}

impl CompiledPattern {
    /// The pattern text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The instruction array, always terminated by exactly one `End`.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of wildcards, i.e. number of captures on a match.
    pub fn wildcard_count(&self) -> usize {
        self.steps.len()
    }

    /// True when the pattern contains no wildcard at all.
    pub fn is_literal(&self) -> bool {
        self.steps.is_empty()
    }

    /// Match `input` against this pattern.
    pub fn match_uri(&self, input: &str) -> MatchResult {
        if !input.starts_with(self.prefix.as_str()) {
            return MatchResult::NoMatch;
        }
        let mut cursor = self.prefix.len();

        if self.steps.is_empty() {
            return if cursor == input.len() {
                MatchResult::Matched(Captures::new(input, Vec::new()))
            } else {
                MatchResult::NoMatch
            };
        }

        let last = self.steps.len() - 1;
        let mut captured = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            let rest = &input[cursor..];
            let offset = if index == last {
                // The final run closes the pattern, so it must end the input.
                if !rest.ends_with(step.literal.as_str()) {
                    return MatchResult::NoMatch;
                }
                rest.len() - step.literal.len()
            } else {
                match rest.find(step.literal.as_str()) {
                    Some(offset) => offset,
                    None => return MatchResult::NoMatch,
                }
            };

            let span = &rest[..offset];
            if step.wildcard == Wildcard::File && span.contains(SEPARATOR) {
                return MatchResult::NoMatch;
            }
            captured.push(span.to_string());
            cursor += offset + step.literal.len();
        }

        MatchResult::Matched(Captures::new(input, captured))
    }
}

impl FromStr for CompiledPattern {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(compile(s))
    }
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Substrings consumed by the wildcards of a successful match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Captures {
    input: String,
    values: Vec<String>,
}

impl Captures {
    pub fn new(input: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            input: input.into(),
            values,
        }
    }

    /// The whole matched input.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn as_slice(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Capture by sitemap number: `0` is the whole input, `1` the first capture.
    pub fn get(&self, number: usize) -> Option<&str> {
        match number {
            0 => Some(&self.input),
            n => self.values.get(n - 1).map(String::as_str),
        }
    }

    /// Numbered parameter map, `{"0": input, "1": first, ...}`.
    pub fn parameters(&self) -> BTreeMap<String, String> {
        std::iter::once(self.input.clone())
            .chain(self.values.iter().cloned())
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.values
    }
}

/// Outcome of matching an input against a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    Matched(Captures),
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched(_))
    }

    pub fn captures(&self) -> Option<&Captures> {
        match self {
            MatchResult::Matched(captures) => Some(captures),
            MatchResult::NoMatch => None,
        }
    }

    pub fn into_captures(self) -> Option<Captures> {
        match self {
            MatchResult::Matched(captures) => Some(captures),
            MatchResult::NoMatch => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(pattern: &str, input: &str) -> Option<Vec<String>> {
        compile(pattern).match_uri(input).into_captures().map(Captures::into_vec)
    }

    #[test]
    fn test_literal_round_trip() {
        for p in ["", "a", "docs/index.html", "a/b/c"] {
            let compiled = compile(p);
            assert_eq!(compiled.match_uri(p), MatchResult::Matched(Captures::new(p, vec![])));
            assert_eq!(compiled.match_uri(&format!("{}x", p)), MatchResult::NoMatch);
        }
    }

    #[test]
    fn test_empty_pattern() {
        let compiled = compile("");
        assert_eq!(compiled.segments(), &[Segment::End]);
        assert!(compiled.match_uri("").is_match());
        assert!(!compiled.match_uri("a").is_match());
    }

    #[test]
    fn test_file_wildcard_capture() {
        assert_eq!(caps("a/*.txt", "a/report.txt"), Some(vec!["report".to_string()]));
        assert_eq!(caps("a/*.txt", "a/b/report.txt"), None);
    }

    #[test]
    fn test_path_wildcard_capture() {
        assert_eq!(caps("a/**/z", "a/b/c/z"), Some(vec!["b/c".to_string()]));
    }

    #[test]
    fn test_wildcard_collapsing() {
        let compiled = compile("a/**.txt");
        assert_eq!(
            compiled.segments(),
            &[
                Segment::Literal('a'),
                Segment::Literal('/'),
                Segment::MatchPath,
                Segment::Literal('.'),
                Segment::Literal('t'),
                Segment::Literal('x'),
                Segment::Literal('t'),
                Segment::End,
            ]
        );
        assert_eq!(compiled.wildcard_count(), 1);
        assert_eq!(caps("a/**.txt", "a/b/c.txt"), Some(vec!["b/c".to_string()]));

        let triple = compile("***");
        assert_eq!(triple.segments(), &[Segment::MatchPath, Segment::End]);
    }

    #[test]
    fn test_leading_wildcard() {
        assert_eq!(compile("*").segments(), &[Segment::MatchFile, Segment::End]);
        assert_eq!(caps("*.css", "site.css"), Some(vec!["site".to_string()]));
        assert_eq!(caps("**", "x/y/z"), Some(vec!["x/y/z".to_string()]));
    }

    #[test]
    fn test_trailing_wildcard_takes_remainder() {
        assert_eq!(caps("static/**", "static/img/a.png"), Some(vec!["img/a.png".to_string()]));
        assert_eq!(caps("static/*", "static/"), Some(vec![String::new()]));
        assert_eq!(caps("static/*", "static/img/a.png"), None);
    }

    #[test]
    fn test_multiple_captures_in_order() {
        assert_eq!(
            caps("*/docs/**/*.html", "en/docs/guide/start.html"),
            Some(vec!["en".to_string(), "guide".to_string(), "start".to_string()])
        );
        // The path wildcard stops at the first "/" and leaves a file wildcard
        // facing "intro/start".
        assert_eq!(caps("*/docs/**/*.html", "en/docs/guide/intro/start.html"), None);
    }

    #[test]
    fn test_escaped_star_is_literal() {
        let compiled = compile("a\\*b");
        assert!(compiled.is_literal());
        assert!(compiled.match_uri("a*b").is_match());
        assert!(!compiled.match_uri("axb").is_match());

        // Escaped star between wildcards does not widen them.
        assert_eq!(
            compile("*\\**").segments(),
            &[Segment::MatchFile, Segment::Literal('*'), Segment::MatchFile, Segment::End]
        );
        assert_eq!(caps("*\\**", "x*y"), Some(vec!["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn test_dangling_escape_dropped() {
        assert_eq!(compile("ab\\").segments(), compile("ab").segments());
    }

    #[test]
    fn test_first_fit_without_backtracking() {
        // A backtracking matcher would bind "/x/" to its second occurrence.
        assert_eq!(caps("**/x/*", "a/x/y/x/z"), None);
        assert_eq!(caps("**/x/*", "a/b/x/z"), Some(vec!["a/b".to_string(), "z".to_string()]));
    }

    #[test]
    fn test_final_run_anchored_to_end() {
        assert_eq!(caps("*.txt", "a.txt.txt"), Some(vec!["a.txt".to_string()]));
        assert_eq!(caps("a*b", "ab"), Some(vec![String::new()]));
        assert_eq!(caps("ab*ba", "aba"), None);
    }

    #[test]
    fn test_sitemap_parameters() {
        let captures = compile("*/**").match_uri("en/a/b").into_captures().unwrap();
        assert_eq!(captures.get(0), Some("en/a/b"));
        assert_eq!(captures.get(1), Some("en"));
        assert_eq!(captures.get(2), Some("a/b"));
        assert_eq!(captures.get(3), None);
        let params = captures.parameters();
        assert_eq!(params.get("0").map(String::as_str), Some("en/a/b"));
        assert_eq!(params.get("2").map(String::as_str), Some("a/b"));
    }

    #[test]
    fn test_non_ascii_literals() {
        assert_eq!(caps("café/*", "café/menü"), Some(vec!["menü".to_string()]));
    }
}
