//! Field selectors: requirements resolved against named indexes.
//!
//! Only exact matches (`=` and `==`) can be evaluated. Other operators are
//! representable so that a request carrying one is rejected as a whole
//! instead of being partially applied.

use crate::{Operator, SelectorError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One `(field, operator, value)` requirement of a field selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRequirement {
    /// Name of the index the requirement is resolved against.
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

impl FieldRequirement {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Create an equality requirement.
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Operator::Equals, value)
    }
}

impl fmt::Display for FieldRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.field, self.operator, self.value)
    }
}

/// Ordered conjunction of field requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality on each `(field, value)` pair, in order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            requirements: pairs
                .into_iter()
                .map(|(k, v)| FieldRequirement::eq(k, v))
                .collect(),
        }
    }

    /// Parse `field=value,field==value,field!=value`.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut selector = Self::everything();
        if input.trim().is_empty() {
            return Ok(selector);
        }
        for part in input.split(',') {
            let part = part.trim();
            let (field, operator, value) = if let Some((f, v)) = part.split_once("!=") {
                (f, Operator::NotEquals, v)
            } else if let Some((f, v)) = part.split_once("==") {
                (f, Operator::DoubleEquals, v)
            } else if let Some((f, v)) = part.split_once('=') {
                (f, Operator::Equals, v)
            } else {
                return Err(SelectorError::Parse {
                    input: input.to_string(),
                    reason: format!("{:?} is not a field requirement", part),
                });
            };
            let field = field.trim();
            if field.is_empty() {
                return Err(SelectorError::Parse {
                    input: input.to_string(),
                    reason: format!("{:?} has an empty field name", part),
                });
            }
            selector = selector.add(FieldRequirement::new(field, operator, value.trim()));
        }
        Ok(selector)
    }

    pub fn add(mut self, requirement: FieldRequirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn requirements(&self) -> &[FieldRequirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

impl std::str::FromStr for FieldSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_order_and_operators() {
        let selector = FieldSelector::parse("spec.owner=alice, spec.tier==hot,status!=gone").unwrap();
        let rr = selector.requirements();
        assert_eq!(rr.len(), 3);
        assert_eq!(rr[0], FieldRequirement::new("spec.owner", Operator::Equals, "alice"));
        assert_eq!(rr[1], FieldRequirement::new("spec.tier", Operator::DoubleEquals, "hot"));
        assert_eq!(rr[2], FieldRequirement::new("status", Operator::NotEquals, "gone"));
    }

    #[test]
    fn test_parse_empty() {
        assert!(FieldSelector::parse("  ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(FieldSelector::parse("owner").is_err());
        assert!(FieldSelector::parse("=x").is_err());
    }

    #[test]
    fn test_from_pairs_and_display() {
        let selector = FieldSelector::from_pairs([("a", "1"), ("b", "2")]);
        assert_eq!(selector.to_string(), "a=1,b=2");
        assert!(selector.requirements().iter().all(|r| r.operator.is_equality()));
    }
}
