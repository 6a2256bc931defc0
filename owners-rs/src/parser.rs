use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::glob;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s<>@,#]+@[^\s<>@,#]+$").expect("valid email pattern"));

/// The owner token that lets any authenticated identity approve.
pub const ANYONE: &str = "*";

/// Parse the contents of an OWNERS file, returning a `ParseResult` containing
/// the parsed directives and any errors encountered. A bad line never stops
/// the remaining lines from being parsed.
pub fn parse(source: &str) -> ParseResult {
    let mut directives = Vec::new();
    let mut errors = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        match parse_line(line, idx + 1) {
            Ok(Some(directive)) => directives.push(Spanned(directive, idx + 1)),
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }
    ParseResult { directives, errors }
}

/// Parse a single line. Blank lines and comments yield `Ok(None)`.
pub fn parse_line(line: &str, line_number: usize) -> Result<Option<Directive>, ParseError> {
    let content = match memchr::memchr(b'#', line.as_bytes()) {
        Some(idx) => &line[..idx],
        None => line,
    };
    LineParser::new(content)
        .parse()
        .map_err(|message| ParseError::new(message, line_number, line))
}

/// The result of parsing an OWNERS file. If `errors` is non-empty the
/// offending lines are missing from `directives`; every other line is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub directives: Vec<Spanned<Directive>>,
    pub errors: Vec<ParseError>,
}

/// A value tagged with the 1-based line it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T>(pub T, pub usize);

/// One meaningful line of an OWNERS file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `set noparent`: stop inheriting owners from parent directories.
    NoParent,
    /// A bare owner line.
    Owner(Owner),
    /// `per-file <glob> = <entry>, ...`
    PerFile {
        glob: String,
        entries: Vec<PerFileEntry>,
    },
    /// `include [project:]path` or the older `file: [project:]path`.
    Include(IncludeTarget),
}

/// An entry on the right-hand side of a `per-file` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerFileEntry {
    Owner(Owner),
    NoParent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeTarget {
    pub project: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    /// `*`, no owner restriction.
    Anyone,
    Email(String),
}

impl Owner {
    pub fn as_str(&self) -> &str {
        match self {
            Owner::Anyone => ANYONE,
            Owner::Email(email) => email,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidOwnerError(String);

impl fmt::Display for InvalidOwnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid owner: {}", self.0)
    }
}

impl std::error::Error for InvalidOwnerError {}

impl TryFrom<&str> for Owner {
    type Error = InvalidOwnerError;

    fn try_from(token: &str) -> Result<Self, Self::Error> {
        if token == ANYONE {
            Ok(Owner::Anyone)
        } else if EMAIL.is_match(token) {
            Ok(Owner::Email(token.to_owned()))
        } else {
            Err(InvalidOwnerError(token.to_owned()))
        }
    }
}

/// A malformed line. `text` holds the line as written, comment included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub text: String,
}

impl ParseError {
    fn new(message: impl Into<String>, line: usize, text: &str) -> ParseError {
        ParseError {
            message: message.into(),
            line,
            text: text.trim().to_owned(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.line, self.message, self.text)
    }
}

struct LineParser<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> LineParser<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn parse(mut self) -> Result<Option<Directive>, String> {
        self.skip_whitespace();
        if self.peek().is_none() {
            return Ok(None);
        }

        if self.parse_set_noparent() {
            return if self.rest().is_empty() {
                Ok(Some(Directive::NoParent))
            } else {
                Err("unexpected text after set noparent".to_owned())
            };
        }
        if self.eat_keyword("per-file") {
            return self.parse_per_file().map(Some);
        }
        if self.eat_keyword("include") || self.eat("file:") {
            return self.parse_include().map(Some);
        }

        let token = self.take_token();
        if !self.rest().is_empty() {
            return Err("unexpected text after owner".to_owned());
        }
        Owner::try_from(token)
            .map(|owner| Some(Directive::Owner(owner)))
            .map_err(|err| err.to_string())
    }

    // Consumes `set noparent` if it's next, leaving the position untouched
    // otherwise.
    fn parse_set_noparent(&mut self) -> bool {
        let start = self.pos;
        if self.eat_keyword("set") && self.eat("noparent") {
            if self.peek().map_or(true, char::is_whitespace) {
                self.skip_whitespace();
                return true;
            }
        }
        self.pos = start;
        false
    }

    fn parse_per_file(&mut self) -> Result<Directive, String> {
        let glob = self.take_while(|c| c != '=' && !c.is_whitespace());
        self.skip_whitespace();
        if !self.eat("=") {
            return Err("expected '=' after per-file glob".to_owned());
        }
        if !glob::is_valid(glob) {
            return Err(format!("invalid glob: {}", glob));
        }

        let entries = self
            .rest()
            .split(',')
            .map(|entry| parse_per_file_entry(entry.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Directive::PerFile {
            glob: glob.to_owned(),
            entries,
        })
    }

    fn parse_include(&mut self) -> Result<Directive, String> {
        let target = self.rest();
        if target.is_empty() {
            return Err("expected include target".to_owned());
        }

        let (project, path) = match target.split_once(':') {
            Some((project, path)) => (Some(project.trim()), path.trim()),
            None => (None, target),
        };
        let is_word = |s: &str| !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == ':');
        if !is_word(path) || !project.map_or(true, is_word) {
            return Err(format!("invalid include target: {}", target));
        }

        Ok(Directive::Include(IncludeTarget {
            project: project.map(str::to_owned),
            path: path.to_owned(),
        }))
    }

    // Matches `word` followed by at least one whitespace character.
    fn eat_keyword(&mut self, word: &str) -> bool {
        let start = self.pos;
        if self.eat(word) && self.skip_whitespace() > 0 {
            return true;
        }
        self.pos = start;
        false
    }

    fn eat(&mut self, literal: &str) -> bool {
        if self.source[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    fn take_token(&mut self) -> &'a str {
        let token = self.take_while(|c| !c.is_whitespace());
        self.skip_whitespace();
        token
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.next();
        }
        &self.source[start..self.pos]
    }

    // The unparsed remainder with surrounding whitespace removed.
    fn rest(&self) -> &'a str {
        self.source[self.pos..].trim()
    }

    fn skip_whitespace(&mut self) -> usize {
        let start = self.pos;
        while let Some(' ' | '\t' | '\r') = self.peek() {
            self.next();
        }
        self.pos - start
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }
}

fn parse_per_file_entry(entry: &str) -> Result<PerFileEntry, String> {
    let words = entry.split_whitespace().collect::<Vec<_>>();
    match words.as_slice() {
        ["set", "noparent"] => Ok(PerFileEntry::NoParent),
        [] => Err("expected owner in per-file list".to_owned()),
        _ => Owner::try_from(entry)
            .map(PerFileEntry::Owner)
            .map_err(|err| err.to_string()),
    }
}
