//! In-process evaluation of the where-clause language.
//!
//! Mirrors the SQL compiled by [`super::filter_where::FilterWhere`], including
//! SQL NULL semantics: a missing field behaves like a NULL column, so ordering
//! and pattern comparisons against it are false.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::error::FilterError;
use super::filter_where::parse_field_condition;
use super::types::{FilterOp, FilterWhereInfo, SortDirection, SortKey};

pub struct FilterMatch {
    max_depth: u32,
}

impl FilterMatch {
    pub fn new(max_depth: u32) -> Self {
        Self { max_depth }
    }

    pub fn matches(&self, where_data: &Value, doc: &Map<String, Value>) -> Result<bool, FilterError> {
        self.eval(where_data, doc, 0)
    }

    fn eval(&self, where_data: &Value, doc: &Map<String, Value>, depth: u32) -> Result<bool, FilterError> {
        if depth > self.max_depth {
            return Err(FilterError::TooDeep(self.max_depth));
        }
        match where_data {
            Value::Null => Ok(true),
            Value::Object(obj) => {
                for (key, value) in obj {
                    let ok = if key.starts_with('$') {
                        self.eval_logical(key, value, doc, depth)?
                    } else {
                        let mut all = true;
                        for condition in parse_field_condition(key, value)? {
                            if !eval_condition(&condition, doc.get(key))? {
                                all = false;
                                break;
                            }
                        }
                        all
                    };
                    if !ok {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn eval_logical(&self, op: &str, value: &Value, doc: &Map<String, Value>, depth: u32) -> Result<bool, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let mut results = Vec::with_capacity(arr.len());
                for v in arr {
                    results.push(self.eval(v, doc, depth + 1)?);
                }
                Ok(if op == "$and" {
                    results.into_iter().all(|r| r)
                } else {
                    results.into_iter().any(|r| r)
                })
            }
            "$not" => {
                if matches!(value, Value::Object(obj) if obj.is_empty()) || value.is_null() {
                    return Ok(false);
                }
                Ok(!self.eval(value, doc, depth + 1)?)
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }
}

fn eval_condition(condition: &FilterWhereInfo, field: Option<&Value>) -> Result<bool, FilterError> {
    let field = field.filter(|v| !v.is_null());
    let data = &condition.data;
    Ok(match condition.operator {
        FilterOp::Eq => match field {
            None => data.is_null(),
            Some(v) => !data.is_null() && values_equal(v, data),
        },
        FilterOp::Ne => match field {
            None => !data.is_null(),
            Some(v) => data.is_null() || !values_equal(v, data),
        },
        FilterOp::Gt => cmp_field(field, data).map_or(false, |o| o == Ordering::Greater),
        FilterOp::Gte => cmp_field(field, data).map_or(false, |o| o != Ordering::Less),
        FilterOp::Lt => cmp_field(field, data).map_or(false, |o| o == Ordering::Less),
        FilterOp::Lte => cmp_field(field, data).map_or(false, |o| o != Ordering::Greater),
        FilterOp::Like | FilterOp::NLike | FilterOp::ILike => {
            let pattern = data
                .as_str()
                .ok_or_else(|| FilterError::InvalidOperatorData("pattern operators require a string".to_string()))?;
            match field.and_then(Value::as_str) {
                None => false,
                Some(text) => match condition.operator {
                    FilterOp::Like => like_match(text, pattern),
                    FilterOp::NLike => !like_match(text, pattern),
                    _ => like_match(&text.to_lowercase(), &pattern.to_lowercase()),
                },
            }
        }
        FilterOp::In | FilterOp::NIn => {
            let candidates = match data {
                Value::Array(values) => values.as_slice(),
                other => std::slice::from_ref(other),
            };
            let negate = condition.operator == FilterOp::NIn;
            if candidates.is_empty() {
                return Ok(negate);
            }
            match field {
                None => false,
                Some(v) => candidates.iter().any(|c| values_equal(v, c)) != negate,
            }
        }
        FilterOp::Between => match data {
            Value::Array(bounds) if bounds.len() == 2 => {
                cmp_field(field, &bounds[0]).map_or(false, |o| o != Ordering::Less)
                    && cmp_field(field, &bounds[1]).map_or(false, |o| o != Ordering::Greater)
            }
            _ => return Err(FilterError::InvalidOperatorData("$between requires array with 2 values".to_string())),
        },
        FilterOp::Exists => match data {
            Value::Bool(expected) => field.is_some() == *expected,
            _ => return Err(FilterError::InvalidOperatorData("$exists requires a boolean".to_string())),
        },
    })
}

fn cmp_field(field: Option<&Value>, data: &Value) -> Option<Ordering> {
    compare_values(field?, data)
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two scalar values of the same kind; `None` when the kinds
/// are not comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Record ordering for sort keys. NULLs sort last ascending and first
/// descending, matching Postgres defaults.
pub fn compare_records(a: &Map<String, Value>, b: &Map<String, Value>, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let left = a.get(&key.column).filter(|v| !v.is_null());
        let right = b.get(&key.column).filter(|v| !v.is_null());
        let ordering = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| type_rank(x).cmp(&type_rank(y))),
        };
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// SQL LIKE: `%` matches any run, `_` matches one character.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // matched[j] == text[..i] matches pattern[..j]
    let mut matched = vec![false; pattern.len() + 1];
    matched[0] = true;
    for j in 1..=pattern.len() {
        matched[j] = matched[j - 1] && pattern[j - 1] == '%';
    }
    for c in &text {
        let mut next = vec![false; pattern.len() + 1];
        for j in 1..=pattern.len() {
            next[j] = match pattern[j - 1] {
                '%' => next[j - 1] || matched[j],
                '_' => matched[j - 1],
                p => matched[j - 1] && p == *c,
            };
        }
        matched = next;
    }
    matched[pattern.len()]
}
