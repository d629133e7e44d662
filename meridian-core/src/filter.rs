//! Filter expressions for object queries
//!
//! A [`FilterExpr`] is evaluated client-side against cached payloads and
//! against types the external source cannot filter, and forwarded verbatim
//! to the source for types that support server-side filtering.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (strings) or element (arrays)
    Contains,
    /// In list of values
    In,
    /// Matches regular expression
    Regex,
}

/// A single field predicate over an object payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Field to filter on; dots descend into nested objects (`owner.name`)
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against
    pub value: Value,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Contains, value)
    }

    /// Evaluate against a payload. A missing field only satisfies `Ne`.
    ///
    /// A `Regex` pattern is compiled on every call; use [`FilterMatcher`]
    /// to evaluate many payloads.
    pub fn matches(&self, data: &Value) -> bool {
        self.matches_with(data, self.compile_pattern().as_ref())
    }

    /// The compiled pattern of a `Regex` filter. `None` for other
    /// operators and for invalid patterns.
    fn compile_pattern(&self) -> Option<Regex> {
        match (self.operator, &self.value) {
            (FilterOperator::Regex, Value::String(pattern)) => Regex::new(pattern).ok(),
            _ => None,
        }
    }

    fn matches_with(&self, data: &Value, pattern: Option<&Regex>) -> bool {
        let Some(actual) = lookup(data, &self.field) else {
            return self.operator == FilterOperator::Ne;
        };

        match self.operator {
            FilterOperator::Eq => actual == &self.value,
            FilterOperator::Ne => actual != &self.value,
            FilterOperator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOperator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOperator::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => {
                    haystack.to_lowercase().contains(&needle.to_lowercase())
                }
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            FilterOperator::In => match &self.value {
                Value::Array(candidates) => candidates.contains(actual),
                _ => false,
            },
            FilterOperator::Regex => match (actual, pattern) {
                (Value::String(text), Some(re)) => re.is_match(text),
                _ => false,
            },
        }
    }
}

/// A filter list prepared for evaluation against many payloads.
///
/// Regex patterns are compiled once, in [`FilterMatcher::new`].
#[derive(Debug)]
pub struct FilterMatcher<'a> {
    filters: Vec<(&'a FilterExpr, Option<Regex>)>,
}

impl<'a> FilterMatcher<'a> {
    pub fn new(filters: &'a [FilterExpr]) -> Self {
        Self {
            filters: filters.iter().map(|f| (f, f.compile_pattern())).collect(),
        }
    }

    /// True when every filter matches (no filters match everything).
    pub fn matches(&self, data: &Value) -> bool {
        self.filters
            .iter()
            .all(|(filter, pattern)| filter.matches_with(data, pattern.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// True when every filter matches (an empty slice matches everything).
///
/// For one payload. Build a [`FilterMatcher`] to evaluate many.
pub fn matches_all(filters: &[FilterExpr], data: &Value) -> bool {
    FilterMatcher::new(filters).matches(data)
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(data, |current, segment| current.get(segment))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
