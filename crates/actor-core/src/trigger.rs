//! Trigger formulas.
//!
//! A fixer runs when its trigger formula holds for the current checker
//! state. Formulas are a closed grammar over checker names:
//!
//! ```text
//! or    := and ("or" and)*
//! and   := unary ("and" unary)*
//! unary := "not" unary | "(" or ")" | NAME
//! NAME  := [A-Za-z0-9_]+   (except the keywords)
//! ```
//!
//! Formulas compile to a [`Predicate`] tree that is walked directly; nothing
//! is ever evaluated as code.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::TriggerError;

/// A compiled trigger formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Ref(String),
}

impl Predicate {
    /// Walk the tree against a checker state. Names missing from the state
    /// count as false.
    pub fn evaluate(&self, state: &HashMap<String, bool>) -> bool {
        match self {
            Predicate::And(items) => items.iter().all(|p| p.evaluate(state)),
            Predicate::Or(items) => items.iter().any(|p| p.evaluate(state)),
            Predicate::Not(inner) => !inner.evaluate(state),
            Predicate::Ref(name) => state.get(name).copied().unwrap_or(false),
        }
    }

    /// Every checker name the predicate reads.
    pub fn references(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::And(items) | Predicate::Or(items) => {
                for item in items {
                    item.collect_references(names);
                }
            }
            Predicate::Not(inner) => inner.collect_references(names),
            Predicate::Ref(name) => {
                names.insert(name.as_str());
            }
        }
    }

    /// Conjunction of all given names. An empty conjunction is always true.
    pub fn all_of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::And(names.into_iter().map(|n| Predicate::Ref(n.into())).collect())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Predicate], op: &str) -> fmt::Result {
            if items.is_empty() {
                return f.write_str(if op == "and" { "(always)" } else { "(never)" });
            }
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                match item {
                    Predicate::And(_) | Predicate::Or(_) if items.len() > 1 => write!(f, "({item})")?,
                    _ => write!(f, "{item}")?,
                }
            }
            Ok(())
        }

        match self {
            Predicate::And(items) => join(f, items, "and"),
            Predicate::Or(items) => join(f, items, "or"),
            Predicate::Not(inner) => match inner.as_ref() {
                Predicate::Ref(name) => write!(f, "not {name}"),
                other => write!(f, "not ({other})"),
            },
            Predicate::Ref(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split a formula into tokens, with the byte offset of each.
fn tokenize(formula: &str) -> Result<Vec<(usize, Token)>, TriggerError> {
    let mut tokens = Vec::new();
    let mut chars = formula.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            chars.next();
            tokens.push((start, Token::Open));
        } else if c == ')' {
            chars.next();
            tokens.push((start, Token::Close));
        } else if is_name_char(c) {
            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if !is_name_char(c) {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            let token = match &formula[start..end] {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                name => Token::Name(name.to_string()),
            };
            tokens.push((start, token));
        } else {
            return Err(syntax(formula, start, format!("unexpected character '{c}'")));
        }
    }

    Ok(tokens)
}

fn syntax(formula: &str, position: usize, message: impl Into<String>) -> TriggerError {
    TriggerError::Syntax {
        formula: formula.to_string(),
        position,
        message: message.into(),
    }
}

/// Deepest `not`/parenthesis nesting a formula may use.
pub const MAX_NESTING: usize = 64;

struct Parser<'a> {
    formula: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.formula.len())
    }

    fn descend(&mut self, offset: usize) -> Result<(), TriggerError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(syntax(
                self.formula,
                offset,
                format!("nested deeper than {MAX_NESTING} levels"),
            ));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Predicate, TriggerError> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Predicate::Or(items) })
    }

    fn parse_and(&mut self) -> Result<Predicate, TriggerError> {
        let mut items = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Predicate::And(items) })
    }

    fn parse_unary(&mut self) -> Result<Predicate, TriggerError> {
        let offset = self.offset();
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        match token {
            Some(Token::Not) => {
                self.descend(offset)?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(Predicate::Not(Box::new(inner)))
            }
            Some(Token::Name(name)) => Ok(Predicate::Ref(name)),
            Some(Token::Open) => {
                self.descend(offset)?;
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(syntax(self.formula, self.offset(), "expected ')'"));
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(inner)
            }
            Some(other) => Err(syntax(self.formula, offset, format!("unexpected {other:?}"))),
            None => Err(syntax(self.formula, offset, "unexpected end of formula")),
        }
    }
}

/// Parse a formula without checking names.
pub fn parse(formula: &str) -> Result<Predicate, TriggerError> {
    let tokens = tokenize(formula)?;
    if tokens.is_empty() {
        return Err(syntax(formula, 0, "empty formula"));
    }

    let mut parser = Parser {
        formula,
        tokens,
        pos: 0,
        depth: 0,
    };
    let predicate = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(syntax(formula, parser.offset(), "unexpected trailing input"));
    }
    Ok(predicate)
}

/// Compiles formulas for one rule, checking names against its checkers.
#[derive(Debug, Clone)]
pub struct TriggerCompiler {
    checkers: Vec<String>,
}

impl TriggerCompiler {
    /// `checkers` are the rule's checker export names, in declaration order.
    pub fn new<I, S>(checkers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            checkers: checkers.into_iter().map(Into::into).collect(),
        }
    }

    /// Compile `formula`, or the conjunction of every checker when `None`.
    ///
    /// # Errors
    ///
    /// `Syntax` for malformed formulas, `UnknownCheckers` naming every
    /// reference that is not a checker of the rule.
    pub fn compile(&self, formula: Option<&str>) -> Result<Predicate, TriggerError> {
        let Some(formula) = formula else {
            return Ok(Predicate::all_of(self.checkers.iter().cloned()));
        };

        let predicate = parse(formula)?;
        let unknown: Vec<String> = predicate
            .references()
            .into_iter()
            .filter(|name| !self.checkers.iter().any(|c| c == name))
            .map(str::to_string)
            .collect();

        if !unknown.is_empty() {
            return Err(TriggerError::UnknownCheckers { names: unknown });
        }
        Ok(predicate)
    }
}
