//! Label selectors: predicates over an entry's label set.
//!
//! The textual form is a comma-separated list of requirements, all of which
//! must hold:
//!
//! ```text
//! tier=hot            tier==hot           tier!=cold
//! env in (prod,qa)    env notin (dev)     owner       !deprecated
//! replicas>2          replicas<10
//! ```
//!
//! `!=` and `notin` also match entries that do not carry the key at all.

use crate::{Labels, Operator, SelectorError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

const NAME_MAX_LEN: usize = 63;
const PREFIX_MAX_LEN: usize = 253;

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("valid name regex")
});

static PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid prefix regex")
});

/// Validate a label key: an optional DNS-subdomain prefix and `/`, then a name.
pub fn validate_label_key(key: &str) -> Result<(), SelectorError> {
    let invalid = |reason: String| SelectorError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > PREFIX_MAX_LEN || !PREFIX_RE.is_match(prefix) {
                return Err(invalid(format!(
                    "prefix must be a DNS subdomain of at most {} characters",
                    PREFIX_MAX_LEN
                )));
            }
            name
        }
        None => key,
    };
    if name.is_empty() || name.len() > NAME_MAX_LEN || !NAME_RE.is_match(name) {
        return Err(invalid(format!(
            "name must be at most {} alphanumeric characters, '-', '_' or '.', starting and ending with an alphanumeric character",
            NAME_MAX_LEN
        )));
    }
    Ok(())
}

/// Validate a label value. Empty values are allowed.
pub fn validate_label_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > NAME_MAX_LEN || !NAME_RE.is_match(value) {
        return Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: format!(
                "must be at most {} alphanumeric characters, '-', '_' or '.', starting and ending with an alphanumeric character",
                NAME_MAX_LEN
            ),
        });
    }
    Ok(())
}

/// A single `key <op> values` requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Requirement {
    /// Build a validated requirement.
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, SelectorError> {
        let key = key.into();
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        validate_label_key(&key)?;

        let missing = |expected: &str| SelectorError::MissingValues {
            key: key.clone(),
            operator,
            expected: expected.to_string(),
        };
        match operator {
            Operator::Equals | Operator::DoubleEquals | Operator::NotEquals => {
                if values.len() != 1 {
                    return Err(missing("exactly one value"));
                }
            }
            Operator::In | Operator::NotIn => {
                if values.is_empty() {
                    return Err(missing("at least one value"));
                }
            }
            Operator::Exists | Operator::DoesNotExist => {
                if !values.is_empty() {
                    return Err(missing("no values"));
                }
            }
            Operator::GreaterThan | Operator::LessThan => {
                if values.len() != 1 {
                    return Err(missing("exactly one value"));
                }
                if values[0].parse::<i64>().is_err() {
                    return Err(SelectorError::InvalidValue {
                        key: key.clone(),
                        value: values[0].clone(),
                        reason: "must be an integer".to_string(),
                    });
                }
            }
        }
        for value in &values {
            validate_label_value(&key, value)?;
        }
        values.sort();
        values.dedup();

        Ok(Self {
            key,
            operator,
            values,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Evaluate the requirement against a label set.
    pub fn matches(&self, labels: &Labels) -> bool {
        let current = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::DoubleEquals | Operator::In => {
                current.is_some_and(|v| self.values.contains(v))
            }
            Operator::NotEquals | Operator::NotIn => {
                current.map_or(true, |v| !self.values.contains(v))
            }
            Operator::Exists => current.is_some(),
            Operator::DoesNotExist => current.is_none(),
            Operator::GreaterThan | Operator::LessThan => {
                let Some(actual) = current.and_then(|v| v.parse::<i64>().ok()) else {
                    return false;
                };
                let Some(bound) = self.values.first().and_then(|v| v.parse::<i64>().ok()) else {
                    return false;
                };
                if self.operator == Operator::GreaterThan {
                    actual > bound
                } else {
                    actual < bound
                }
            }
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
            Operator::In | Operator::NotIn => {
                write!(f, "{} {} ({})", self.key, self.operator, self.values.join(","))
            }
            _ => write!(f, "{}{}{}", self.key, self.operator, self.values.join(",")),
        }
    }
}

/// Conjunction of label requirements. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector that matches every label set.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality on every `(key, value)` pair of the given set.
    pub fn from_labels(labels: &Labels) -> Result<Self, SelectorError> {
        let requirements = labels
            .iter()
            .map(|(k, v)| Requirement::new(k.as_str(), Operator::Equals, [v.as_str()]))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    /// Parse the textual selector form.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input)?.parse()
    }

    pub fn add(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

impl std::str::FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// PARSER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Comma,
    OpenParen,
    CloseParen,
    Equals,
    DoubleEquals,
    NotEquals,
    Bang,
    GreaterThan,
    LessThan,
}

fn is_special(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '=' | '!' | '(' | ')' | '<' | '>')
}

fn tokenize(input: &str) -> Result<Vec<Token>, SelectorError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::OpenParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::CloseParen);
            }
            '>' => {
                chars.next();
                tokens.push(Token::GreaterThan);
            }
            '<' => {
                chars.next();
                tokens.push(Token::LessThan);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::DoubleEquals);
                } else {
                    tokens.push(Token::Equals);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEquals);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            _ => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if is_special(c) {
                        break;
                    }
                    ident.push(c);
                    chars.next();
                }
                if ident.is_empty() {
                    return Err(SelectorError::Parse {
                        input: input.to_string(),
                        reason: format!("unexpected character {:?}", c),
                    });
                }
                tokens.push(Token::Ident(ident));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, SelectorError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::Parse {
            input: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse(mut self) -> Result<LabelSelector, SelectorError> {
        let mut selector = LabelSelector::everything();
        if self.tokens.is_empty() {
            return Ok(selector);
        }
        loop {
            selector = selector.add(self.requirement()?);
            match self.next() {
                None => return Ok(selector),
                Some(Token::Comma) => continue,
                Some(other) => return Err(self.error(format!("expected ',' but found {:?}", other))),
            }
        }
    }

    fn requirement(&mut self) -> Result<Requirement, SelectorError> {
        if self.peek() == Some(&Token::Bang) {
            self.next();
            let key = self.ident("key after '!'")?;
            return Requirement::new(key, Operator::DoesNotExist, Vec::<String>::new());
        }

        let key = self.ident("key")?;
        let operator = match self.peek() {
            None | Some(Token::Comma) => {
                return Requirement::new(key, Operator::Exists, Vec::<String>::new());
            }
            Some(Token::Equals) => Operator::Equals,
            Some(Token::DoubleEquals) => Operator::DoubleEquals,
            Some(Token::NotEquals) => Operator::NotEquals,
            Some(Token::GreaterThan) => Operator::GreaterThan,
            Some(Token::LessThan) => Operator::LessThan,
            Some(Token::Ident(word)) if word == "in" => Operator::In,
            Some(Token::Ident(word)) if word == "notin" => Operator::NotIn,
            Some(other) => {
                return Err(self.error(format!("unexpected {:?} after key {:?}", other, key)));
            }
        };
        self.next();

        let values = match operator {
            Operator::In | Operator::NotIn => self.value_set()?,
            _ => vec![self.single_value()],
        };
        Requirement::new(key, operator, values)
    }

    fn ident(&mut self, what: &str) -> Result<String, SelectorError> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            Some(other) => Err(self.error(format!("expected {} but found {:?}", what, other))),
            None => Err(self.error(format!("expected {} but reached end of input", what))),
        }
    }

    /// A value after `=`, `==`, `!=`, `>` or `<`; absent means the empty value.
    fn single_value(&mut self) -> String {
        match self.peek() {
            Some(Token::Ident(s)) => {
                let value = s.clone();
                self.pos += 1;
                value
            }
            _ => String::new(),
        }
    }

    fn value_set(&mut self) -> Result<Vec<String>, SelectorError> {
        if self.next() != Some(Token::OpenParen) {
            return Err(self.error("expected '(' to open a value set"));
        }
        let mut values = Vec::new();
        loop {
            match self.next() {
                Some(Token::Ident(value)) => {
                    values.push(value);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::CloseParen) => return Ok(values),
                        _ => return Err(self.error("expected ',' or ')' in value set")),
                    }
                }
                Some(Token::CloseParen) if values.is_empty() => return Ok(values),
                _ => return Err(self.error("expected a value in value set")),
            }
        }
    }
}
