/// Programs: the flat item list the player assembles, plus its text format.
///
/// ## Representation
///
/// A program is a flat ordered list. Conditional chains are NOT nested:
/// `if` / `elif` / `else` are sibling items linked only by adjacency, and the
/// interpreter carries the "chain is open" state between them. Only `repeat`
/// nests, holding its own item list.
///
/// ## Text format
///   ```text
///   # comment
///   move; turn
///   if monsterInFront: attack
///   elif doorInFront: open        (also `else if`)
///   else: move
///   repeat 3 { move; turnLeft }
///   ```
/// Items are separated by newlines or `;`. The `:` after a condition is
/// optional. Unknown command words become [`Item::Unknown`] and are skipped
/// at run time; malformed branches and repeats are parse errors.

use std::fmt;
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_while, take_while1},
    character::complete::char,
    combinator::{eof, map, opt, value, verify},
    error::{ErrorKind, ParseError},
    multi::many0_count,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use thiserror::Error;

use crate::domain::conditions::Condition;
use super::commands::Command;

/// Upper bound on a single repeat count.
pub const MAX_REPEAT: u32 = 99;

/// How many `repeat` blocks may sit inside one another.
pub const MAX_DEPTH: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Command(Command),
    /// A command name the registry does not know. Kept so the listing shows
    /// what was written; executes as a no-op.
    Unknown(String),
    If { condition: Condition, action: Command },
    ElseIf { condition: Condition, action: Command },
    Else { action: Command },
    Repeat { times: u32, body: Vec<Item> },
}

impl Item {
    /// Primitive command or unknown name, resolved through the registry.
    pub fn named(name: &str) -> Item {
        Command::lookup(name).map_or_else(|| Item::Unknown(name.to_string()), Item::Command)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Command(c) => write!(f, "{c}"),
            Item::Unknown(name) => f.write_str(name),
            Item::If { condition, action } => write!(f, "if {condition}: {action}"),
            Item::ElseIf { condition, action } => write!(f, "elif {condition}: {action}"),
            Item::Else { action } => write!(f, "else: {action}"),
            Item::Repeat { times, body } => {
                write!(f, "repeat {times} {{")?;
                for (i, item) in body.iter().enumerate() {
                    let sep = if i == 0 { " " } else { "; " };
                    write!(f, "{sep}{item}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    items: Vec<Item>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    #[cfg(test)]
    pub fn from_items(items: Vec<Item>) -> Self {
        Program { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn remove(&mut self, index: usize) -> Option<Item> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn parse(text: &str) -> Result<Program, ProgramParseError> {
        let grammar = Grammar { source: text };
        match grammar.program() {
            Ok((_, items)) => Ok(Program { items }),
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
                Err(ProgramParseError { line: grammar.line_at(e.at), kind: e.kind })
            }
            Err(nom::Err::Incomplete(_)) => Err(ProgramParseError {
                line: grammar.line_at(""),
                kind: ParseErrorKind::Expected("more input"),
            }),
        }
    }
}

impl FromStr for Program {
    type Err = ProgramParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Program::parse(s)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════
// Parse errors
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct ProgramParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unknown condition '{0}'")]
    UnknownCondition(String),
    #[error("unknown branch action '{0}'")]
    UnknownAction(String),
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("repeat count must be a number from 0 to {MAX_REPEAT}, got '{0}'")]
    BadCount(String),
    #[error("unmatched '}}'")]
    UnmatchedClose,
    #[error("missing '}}' for repeat opened on line {0}")]
    Unclosed(usize),
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("repeat blocks nested more than {MAX_DEPTH} deep")]
    TooDeep,
}

// ══════════════════════════════════════════════════════════════
// Grammar
// ══════════════════════════════════════════════════════════════

/// Parser error: where it happened and what went wrong. Line numbers are
/// worked out from `at` once parsing stops.
#[derive(Debug)]
struct Failure<'a> {
    at: &'a str,
    kind: ParseErrorKind,
}

impl<'a> ParseError<&'a str> for Failure<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        Failure { at: input, kind: ParseErrorKind::Expected("an item") }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type PResult<'a, T> = IResult<&'a str, T, Failure<'a>>;

fn fail(at: &str, kind: ParseErrorKind) -> nom::Err<Failure<'_>> {
    nom::Err::Failure(Failure { at, kind })
}

/// Like `cut`, but the failure reports `kind` at the point `parser` started.
fn cut_with<'a, O>(
    kind: ParseErrorKind,
    mut parser: impl FnMut(&'a str) -> PResult<'a, O>,
) -> impl FnMut(&'a str) -> PResult<'a, O> {
    move |input| match parser(input) {
        Err(nom::Err::Error(_)) => Err(fail(input, kind.clone())),
        other => other,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Spaces, tabs and a trailing `#` comment. Never crosses a line.
fn blank(input: &str) -> PResult<()> {
    value(
        (),
        pair(
            take_while(|c: char| c == ' ' || c == '\t' || c == '\r'),
            opt(preceded(char('#'), take_till(|c: char| c == '\n'))),
        ),
    )(input)
}

fn word(input: &str) -> PResult<&str> {
    preceded(blank, take_while1(is_word_char))(input)
}

fn keyword<'a>(name: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    verify(word, move |w: &str| w.eq_ignore_ascii_case(name))
}

fn symbol<'a>(c: char) -> impl FnMut(&'a str) -> PResult<'a, char> {
    preceded(blank, char(c))
}

/// Any run of blank lines and `;` between items.
fn separators(input: &str) -> PResult<()> {
    value((), terminated(many0_count(preceded(blank, alt((char(';'), char('\n'))))), blank))(input)
}

/// What to report when something other than a separator follows an item.
fn stray(rest: &str) -> ParseErrorKind {
    match rest.chars().next() {
        Some(c) if !(is_word_char(c) || c == ':' || c == '{') => ParseErrorKind::UnexpectedChar(c),
        _ => ParseErrorKind::Expected("end of item"),
    }
}

fn action(input: &str) -> PResult<Command> {
    let (rest, name) = cut_with(ParseErrorKind::Expected("a branch action"), word)(input)?;
    let command = Command::lookup(name).ok_or_else(|| fail(input, ParseErrorKind::UnknownAction(name.to_string())))?;
    Ok((rest, command))
}

/// `<condition> [:] <action>`, shared by `if` and `elif`.
fn branch_tail(input: &str) -> PResult<(Condition, Command)> {
    let (rest, name) = cut_with(ParseErrorKind::Expected("a condition"), word)(input)?;
    let condition = name
        .parse::<Condition>()
        .map_err(|e| fail(input, ParseErrorKind::UnknownCondition(e.0)))?;
    preceded(opt(symbol(':')), action)(rest).map(|(rest, command)| (rest, (condition, command)))
}

/// The whole program text; knows how to turn a position into a line number.
struct Grammar<'a> {
    source: &'a str,
}

impl<'a> Grammar<'a> {
    fn line_at(&self, rest: &str) -> usize {
        let consumed = self.source.len() - rest.len();
        self.source[..consumed].matches('\n').count() + 1
    }

    fn program(&self) -> PResult<'a, Vec<Item>> {
        terminated(|i: &'a str| self.items(i, 0), cut_with(ParseErrorKind::UnmatchedClose, eof))(self.source)
    }

    /// Items up to the end of input or an unconsumed `}`.
    fn items(&self, mut input: &'a str, depth: usize) -> PResult<'a, Vec<Item>> {
        let mut items = vec![];
        loop {
            let (rest, _) = separators(input)?;
            match rest.chars().next() {
                None | Some('}') => return Ok((rest, items)),
                Some(c) if !is_word_char(c) => return Err(fail(rest, ParseErrorKind::UnexpectedChar(c))),
                Some(_) => {}
            }
            let (rest, item) = self.statement(rest, depth)?;
            let (rest, _) = blank(rest)?;
            if !(rest.is_empty() || rest.starts_with([';', '\n', '}'])) {
                return Err(fail(rest, stray(rest)));
            }
            items.push(item);
            input = rest;
        }
    }

    fn statement(&self, input: &'a str, depth: usize) -> PResult<'a, Item> {
        let (rest, head) = cut_with(ParseErrorKind::Expected("a command"), word)(input)?;
        match head.to_ascii_lowercase().as_str() {
            "if" => map(branch_tail, |(condition, action)| Item::If { condition, action })(rest),
            "elif" | "elseif" => map(branch_tail, |(condition, action)| Item::ElseIf { condition, action })(rest),
            "else" => alt((
                map(preceded(keyword("if"), branch_tail), |(condition, action)| Item::ElseIf {
                    condition,
                    action,
                }),
                map(preceded(opt(symbol(':')), action), |action| Item::Else { action }),
            ))(rest),
            "repeat" => self.repeat(rest, depth),
            _ => Ok((rest, Item::named(head))),
        }
    }

    /// `<count> { items }`, the keyword already consumed.
    fn repeat(&self, input: &'a str, depth: usize) -> PResult<'a, Item> {
        if depth >= MAX_DEPTH {
            return Err(fail(input, ParseErrorKind::TooDeep));
        }
        let (rest, count) = cut_with(ParseErrorKind::Expected("a repeat count"), word)(input)?;
        let times = match count.parse::<u32>() {
            Ok(n) if n <= MAX_REPEAT => n,
            _ => return Err(fail(input, ParseErrorKind::BadCount(count.to_string()))),
        };
        let opened_on = self.line_at(rest);
        let (rest, body) = delimited(
            cut_with(ParseErrorKind::Expected("'{' after repeat count"), symbol('{')),
            |i: &'a str| self.items(i, depth + 1),
            cut_with(ParseErrorKind::Unclosed(opened_on), symbol('}')),
        )(rest)?;
        Ok((rest, Item::Repeat { times, body }))
    }
}
