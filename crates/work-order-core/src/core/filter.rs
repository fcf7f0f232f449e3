// work-order-core/src/core/filter.rs
// ============================================================================
// Module: Work Order List Filters
// Description: Filter, sort, and pagination evaluation for order listings.
// Purpose: Validate caller-supplied queries fail-fast and evaluate them
// deterministically over order rows.
// Dependencies: crate::core::model, serde, serde_json
// ============================================================================

//! ## Overview
//! List queries are JSON trees of `and`/`or` groups over clauses. Clauses
//! name a top-level order field or a dotted path into `meta` with bounded
//! depth. Invalid queries fail fast with a path to the offending node before
//! any row is touched. Type mismatches during evaluation make the clause
//! false rather than erroring; missing fields only match the null/existence
//! operators.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::model::Order;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum depth of a dotted `meta` path.
pub const DEFAULT_META_PATH_DEPTH: usize = 5;

/// Top-level order fields addressable by filters and sorts.
const TOP_LEVEL_FIELDS: &[&str] = &[
    "id",
    "type",
    "state",
    "priority",
    "created_at",
    "last_transitioned_at",
    "applied_at",
    "completed_at",
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Filter or sort validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid filter at {path}: {code}")]
pub struct FilterError {
    /// Path to the offending node (dotted clause positions).
    pub path: String,
    /// Stable machine-readable code.
    pub code: String,
}

impl FilterError {
    fn new(path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
        }
    }
}

// ============================================================================
// SECTION: Query Shape
// ============================================================================

/// Filter operators supported by list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Ordered greater-than.
    Gt,
    /// Ordered greater-than-or-equal.
    Gte,
    /// Ordered less-than.
    Lt,
    /// Ordered less-than-or-equal.
    Lte,
    /// Membership in the expected array.
    In,
    /// Non-membership in the expected array.
    Nin,
    /// Substring or array-element containment.
    Contains,
    /// Array contains every expected element.
    ContainsAll,
    /// Field presence check.
    Exists,
    /// String or array length equality.
    LengthEq,
    /// Field is absent or JSON null.
    IsNull,
    /// Field is present and not JSON null.
    NotNull,
}

impl FilterOp {
    /// Returns true when the operator requires an expected value.
    const fn requires_value(self) -> bool {
        !matches!(self, Self::Exists | Self::IsNull | Self::NotNull)
    }
}

/// One filter clause over a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    /// Field name: a top-level order field or a dotted `meta` path.
    pub field: String,
    /// Operator.
    pub op: FilterOp,
    /// Expected value, when the operator takes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Filter tree node: a group or a clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    /// Conjunction of child nodes.
    And {
        /// Child nodes, all of which must match.
        and: Vec<FilterNode>,
    },
    /// Disjunction of child nodes.
    Or {
        /// Child nodes, at least one of which must match.
        or: Vec<FilterNode>,
    },
    /// Leaf clause.
    Clause(FilterClause),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Sort specification over a top-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Top-level field to sort by.
    pub field: String,
    /// Sort direction.
    pub direction: SortDirection,
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    /// Rows to skip.
    #[serde(default)]
    pub offset: usize,
    /// Maximum rows to return; `None` returns all remaining rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Complete list query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// Optional filter tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterNode>,
    /// Optional sort; defaults to `created_at` ascending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    /// Pagination window.
    #[serde(default)]
    pub page: Pagination,
}

// ============================================================================
// SECTION: Field Paths
// ============================================================================

/// Resolved clause target.
enum FieldPath {
    /// Top-level order field.
    TopLevel(&'static str),
    /// Dotted path into `meta`.
    Meta(Vec<String>),
}

/// Parses and validates a clause field name.
fn parse_field(field: &str, meta_depth: usize, at: &str) -> Result<FieldPath, FilterError> {
    if let Some(rest) = field.strip_prefix("meta.") {
        let segments: Vec<&str> = rest.split('.').collect();
        if segments.len() > meta_depth {
            return Err(FilterError::new(at, "meta_path_too_deep"));
        }
        for segment in &segments {
            if segment.is_empty()
                || !segment.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
            {
                return Err(FilterError::new(at, "meta_path_malformed"));
            }
        }
        return Ok(FieldPath::Meta(segments.iter().map(ToString::to_string).collect()));
    }
    TOP_LEVEL_FIELDS
        .iter()
        .find(|known| **known == field)
        .map(|known| FieldPath::TopLevel(*known))
        .ok_or_else(|| FilterError::new(at, "unknown_field"))
}

/// Looks up a known top-level field name, defaulting to `created_at`.
fn known_field(field: &str) -> &'static str {
    TOP_LEVEL_FIELDS
        .iter()
        .find(|known| **known == field)
        .copied()
        .unwrap_or("created_at")
}

/// Resolves a field path against a serialized order row.
fn resolve<'v>(row: &'v Value, path: &FieldPath) -> Option<&'v Value> {
    match path {
        FieldPath::TopLevel(field) => {
            // Wire name `type` maps onto the `order_type` row column.
            let key = if *field == "type" { "order_type" } else { field };
            row.get(key)
        }
        FieldPath::Meta(segments) => {
            let mut cursor = row.get("meta")?;
            for segment in segments {
                cursor = cursor.get(segment)?;
            }
            Some(cursor)
        }
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a query before evaluation.
///
/// # Errors
///
/// Returns [`FilterError`] naming the offending node when the filter tree,
/// sort field, or an operator/value pairing is malformed.
pub fn validate_query(query: &ListQuery, meta_depth: usize) -> Result<(), FilterError> {
    if let Some(filter) = &query.filter {
        validate_node(filter, meta_depth, "filter")?;
    }
    if let Some(sort) = &query.sort {
        if !TOP_LEVEL_FIELDS.contains(&sort.field.as_str()) {
            return Err(FilterError::new("sort.field", "unknown_field"));
        }
    }
    Ok(())
}

/// Validates one filter node recursively.
fn validate_node(node: &FilterNode, meta_depth: usize, at: &str) -> Result<(), FilterError> {
    match node {
        FilterNode::And { and: nodes } | FilterNode::Or { or: nodes } => {
            if nodes.is_empty() {
                return Err(FilterError::new(at, "empty_group"));
            }
            for (index, child) in nodes.iter().enumerate() {
                validate_node(child, meta_depth, &format!("{at}.{index}"))?;
            }
            Ok(())
        }
        FilterNode::Clause(clause) => validate_clause(clause, meta_depth, at),
    }
}

/// Validates one clause's field and operator/value pairing.
fn validate_clause(
    clause: &FilterClause,
    meta_depth: usize,
    at: &str,
) -> Result<(), FilterError> {
    parse_field(&clause.field, meta_depth, at)?;
    match (clause.op.requires_value(), &clause.value) {
        (true, None) => return Err(FilterError::new(at, "missing_value")),
        (false, Some(_)) if clause.op != FilterOp::Exists => {
            return Err(FilterError::new(at, "unexpected_value"));
        }
        _ => {}
    }
    match clause.op {
        FilterOp::In | FilterOp::Nin | FilterOp::ContainsAll => {
            if !matches!(clause.value, Some(Value::Array(_))) {
                return Err(FilterError::new(at, "expected_array_value"));
            }
        }
        FilterOp::LengthEq => {
            if !clause.value.as_ref().is_some_and(|value| value.as_u64().is_some()) {
                return Err(FilterError::new(at, "expected_integer_value"));
            }
        }
        FilterOp::Exists => {
            if let Some(value) = &clause.value {
                if !value.is_boolean() {
                    return Err(FilterError::new(at, "expected_boolean_value"));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates a filter node against a serialized order row.
fn matches_node(row: &Value, node: &FilterNode, meta_depth: usize) -> bool {
    match node {
        FilterNode::And { and } => and.iter().all(|child| matches_node(row, child, meta_depth)),
        FilterNode::Or { or } => or.iter().any(|child| matches_node(row, child, meta_depth)),
        FilterNode::Clause(clause) => matches_clause(row, clause, meta_depth),
    }
}

/// Evaluates one clause against a serialized order row.
fn matches_clause(row: &Value, clause: &FilterClause, meta_depth: usize) -> bool {
    let Ok(path) = parse_field(&clause.field, meta_depth, "filter") else {
        return false;
    };
    let actual = resolve(row, &path);
    match clause.op {
        FilterOp::Exists => {
            let expected = clause.value.as_ref().and_then(Value::as_bool).unwrap_or(true);
            actual.is_some() == expected
        }
        FilterOp::IsNull => actual.is_none_or(Value::is_null),
        FilterOp::NotNull => actual.is_some_and(|value| !value.is_null()),
        FilterOp::Eq => actual.zip(clause.value.as_ref()).is_some_and(|(a, e)| a == e),
        FilterOp::Ne => actual.zip(clause.value.as_ref()).is_some_and(|(a, e)| a != e),
        FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => actual
            .zip(clause.value.as_ref())
            .and_then(|(a, e)| compare_values(a, e))
            .is_some_and(|ordering| ordering_matches(clause.op, ordering)),
        FilterOp::In => expected_array(clause).is_some_and(|set| {
            actual.is_some_and(|value| set.contains(value))
        }),
        FilterOp::Nin => expected_array(clause).is_some_and(|set| {
            actual.is_some_and(|value| !set.contains(value))
        }),
        FilterOp::Contains => actual.zip(clause.value.as_ref()).is_some_and(contains),
        FilterOp::ContainsAll => expected_array(clause).is_some_and(|needles| {
            actual.and_then(Value::as_array).is_some_and(|haystack| {
                needles.iter().all(|needle| haystack.contains(needle))
            })
        }),
        FilterOp::LengthEq => {
            let Some(expected) = clause.value.as_ref().and_then(Value::as_u64) else {
                return false;
            };
            match actual {
                Some(Value::String(text)) => text.chars().count() as u64 == expected,
                Some(Value::Array(values)) => values.len() as u64 == expected,
                _ => false,
            }
        }
    }
}

/// Returns the clause's expected array, when present.
fn expected_array(clause: &FilterClause) -> Option<&Vec<Value>> {
    clause.value.as_ref().and_then(Value::as_array)
}

/// Substring containment for strings, element containment for arrays.
fn contains((actual, expected): (&Value, &Value)) -> bool {
    match actual {
        Value::String(text) => expected.as_str().is_some_and(|needle| text.contains(needle)),
        Value::Array(values) => values.contains(expected),
        _ => false,
    }
}

/// Maps an ordering outcome onto an ordered operator.
const fn ordering_matches(op: FilterOp, ordering: Ordering) -> bool {
    match op {
        FilterOp::Gt => matches!(ordering, Ordering::Greater),
        FilterOp::Gte => matches!(ordering, Ordering::Greater | Ordering::Equal),
        FilterOp::Lt => matches!(ordering, Ordering::Less),
        FilterOp::Lte => matches!(ordering, Ordering::Less | Ordering::Equal),
        _ => false,
    }
}

/// Compares two JSON values for ordered operators.
///
/// Integers compare exactly; a float on either side falls back to `f64`.
/// Strings compare lexicographically, which orders RFC 3339 timestamps
/// correctly. Mismatched or unordered types return `None`.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// ============================================================================
// SECTION: Query Application
// ============================================================================

/// Applies a validated query to a set of orders: filter, sort, paginate.
///
/// # Errors
///
/// Returns [`FilterError`] when the query fails validation; no rows are
/// inspected in that case.
pub fn apply_query(
    orders: &[Order],
    query: &ListQuery,
    meta_depth: usize,
) -> Result<Vec<Order>, FilterError> {
    validate_query(query, meta_depth)?;

    let mut rows: Vec<(Value, &Order)> = Vec::with_capacity(orders.len());
    for order in orders {
        let row = serde_json::to_value(order)
            .map_err(|_| FilterError::new("filter", "row_serialization_failed"))?;
        rows.push((row, order));
    }

    let mut selected: Vec<(Value, &Order)> = rows
        .into_iter()
        .filter(|(row, _)| {
            query.filter.as_ref().is_none_or(|node| matches_node(row, node, meta_depth))
        })
        .collect();

    let sort = query.sort.clone().unwrap_or(SortSpec {
        field: "created_at".to_string(),
        direction: SortDirection::Asc,
    });
    let sort_path = FieldPath::TopLevel(known_field(&sort.field));
    selected.sort_by(|(a, _), (b, _)| {
        let ordering = resolve(a, &sort_path)
            .zip(resolve(b, &sort_path))
            .and_then(|(a, b)| compare_values(a, b))
            .unwrap_or(Ordering::Equal);
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });

    Ok(selected
        .into_iter()
        .skip(query.page.offset)
        .take(query.page.limit.unwrap_or(usize::MAX))
        .map(|(_, order)| order.clone())
        .collect())
}
