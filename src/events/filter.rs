//! Subscription filters
//!
//! A filter is a comma-separated list of `field<op>value` terms that must
//! all hold. Supported operators are `==`, `!=` and `~=` (regex match).
//! Supported fields are `namespace` and `topic`.

use super::Envelope;
use crate::error::{BundleError, Result};
use regex::Regex;

const FIELDS: &[&str] = &["namespace", "topic"];

/// Comparison applied to a field
#[derive(Debug, Clone)]
enum Operator {
    Equal(String),
    NotEqual(String),
    Matches(Regex),
}

/// A single `field<op>value` term
#[derive(Debug, Clone)]
struct Term {
    field: String,
    operator: Operator,
}

impl Term {
    fn matches(&self, envelope: &Envelope) -> bool {
        let value = envelope.field(&self.field).unwrap_or("");
        match &self.operator {
            Operator::Equal(expected) => value == expected,
            Operator::NotEqual(expected) => value != expected,
            Operator::Matches(re) => re.is_match(value),
        }
    }
}

/// Conjunction of terms
#[derive(Debug, Clone)]
pub struct Filter {
    terms: Vec<Term>,
}

impl Filter {
    /// Parse a filter expression such as `namespace==default,topic~=^/bundles/`
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| BundleError::InvalidFilter {
            filter: expr.to_string(),
            reason,
        };

        let mut terms = Vec::new();
        for raw in expr.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(invalid("empty term".to_string()));
            }

            let (field, operator) = if let Some((field, value)) = raw.split_once("==") {
                (field, Operator::Equal(value.trim().to_string()))
            } else if let Some((field, value)) = raw.split_once("!=") {
                (field, Operator::NotEqual(value.trim().to_string()))
            } else if let Some((field, value)) = raw.split_once("~=") {
                let re = Regex::new(value.trim())
                    .map_err(|e| invalid(format!("bad pattern: {}", e)))?;
                (field, Operator::Matches(re))
            } else {
                return Err(invalid(format!("term {:?} has no operator", raw)));
            };

            let field = field.trim();
            if !FIELDS.contains(&field) {
                return Err(invalid(format!("unknown field {:?}", field)));
            }

            terms.push(Term {
                field: field.to_string(),
                operator,
            });
        }

        Ok(Self { terms })
    }

    /// Parse several filters, any of which may match
    pub fn parse_all(exprs: &[String]) -> Result<Vec<Self>> {
        exprs.iter().map(|e| Self::parse(e)).collect()
    }

    /// Whether every term holds for the envelope
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.terms.iter().all(|t| t.matches(envelope))
    }
}

/// Whether an envelope passes a set of alternative filters
pub fn matches_any(filters: &[Filter], envelope: &Envelope) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(envelope))
}
