use std::collections::HashMap;

use serde_json::Value;

use super::error::FilterError;
use super::filter::validate_identifier;
use super::types::{FilterOp, FilterWhereInfo};

/// Column name -> SQL type used to cast bound parameters (e.g. `timestamptz`).
pub type ColumnCasts = HashMap<String, String>;

/// Compiles a JSON where clause into a parameterized SQL predicate.
///
/// Parameters are appended to a caller-owned vector so that a statement can
/// bind its own values (SET lists, INSERT values) before the predicate and
/// keep `$n` numbering contiguous.
pub struct FilterWhere<'a> {
    params: &'a mut Vec<Value>,
    casts: &'a ColumnCasts,
    max_depth: u32,
}

impl<'a> FilterWhere<'a> {
    pub fn new(params: &'a mut Vec<Value>, casts: &'a ColumnCasts, max_depth: u32) -> Self {
        Self { params, casts, max_depth }
    }

    pub fn generate(
        where_data: &Value,
        params: &mut Vec<Value>,
        casts: &ColumnCasts,
        max_depth: u32,
    ) -> Result<String, FilterError> {
        let mut filter_where = FilterWhere::new(params, casts, max_depth);
        let sql = filter_where.build(where_data, 0)?;
        Ok(if sql.is_empty() { "1=1".to_string() } else { sql })
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn build(&mut self, where_data: &Value, depth: u32) -> Result<String, FilterError> {
        if depth > self.max_depth {
            return Err(FilterError::TooDeep(self.max_depth));
        }
        match where_data {
            Value::Null => Ok(String::new()),
            Value::Object(obj) => {
                let mut parts = Vec::new();
                for (key, value) in obj {
                    if key.starts_with('$') {
                        parts.push(self.build_logical(key, value, depth)?);
                    } else {
                        for condition in parse_field_condition(key, value)? {
                            parts.push(self.build_sql_condition(&condition)?);
                        }
                    }
                }
                Ok(parts.join(" AND "))
            }
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn build_logical(&mut self, op: &str, value: &Value, depth: u32) -> Result<String, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                if arr.is_empty() {
                    return Ok(if op == "$and" { "1=1" } else { "1=0" }.to_string());
                }
                let mut sql_parts = Vec::with_capacity(arr.len());
                for v in arr {
                    let sql = self.build(v, depth + 1)?;
                    sql_parts.push(if sql.is_empty() { "(1=1)".to_string() } else { format!("({})", sql) });
                }
                let joiner = if op == "$and" { " AND " } else { " OR " };
                Ok(format!("({})", sql_parts.join(joiner)))
            }
            "$not" => {
                let sql = self.build(value, depth + 1)?;
                if sql.is_empty() {
                    Ok("1=0".to_string())
                } else {
                    Ok(format!("NOT ({})", sql))
                }
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let column = condition.column.as_str();
        let quoted_column = format!("\"{}\"", column);
        let data = &condition.data;
        match condition.operator {
            FilterOp::Eq => {
                if data.is_null() {
                    Ok(format!("{} IS NULL", quoted_column))
                } else {
                    Ok(format!("{} = {}", quoted_column, self.param(column, data.clone())))
                }
            }
            FilterOp::Ne => {
                if data.is_null() {
                    Ok(format!("{} IS NOT NULL", quoted_column))
                } else {
                    Ok(format!("{} IS DISTINCT FROM {}", quoted_column, self.param(column, data.clone())))
                }
            }
            FilterOp::Gt => Ok(format!("{} > {}", quoted_column, self.param(column, data.clone()))),
            FilterOp::Gte => Ok(format!("{} >= {}", quoted_column, self.param(column, data.clone()))),
            FilterOp::Lt => Ok(format!("{} < {}", quoted_column, self.param(column, data.clone()))),
            FilterOp::Lte => Ok(format!("{} <= {}", quoted_column, self.param(column, data.clone()))),
            FilterOp::Like => Ok(format!("{} LIKE {}", quoted_column, self.text_param(data)?)),
            FilterOp::NLike => Ok(format!("{} NOT LIKE {}", quoted_column, self.text_param(data)?)),
            FilterOp::ILike => Ok(format!("{} ILIKE {}", quoted_column, self.text_param(data)?)),
            FilterOp::In | FilterOp::NIn => {
                let negate = condition.operator == FilterOp::NIn;
                let values = match data {
                    Value::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                if values.is_empty() {
                    return Ok(if negate { "1=1" } else { "1=0" }.to_string());
                }
                let params: Vec<String> = values.into_iter().map(|v| self.param(column, v)).collect();
                let keyword = if negate { "NOT IN" } else { "IN" };
                Ok(format!("{} {} ({})", quoted_column, keyword, params.join(", ")))
            }
            FilterOp::Between => match data {
                Value::Array(values) if values.len() == 2 => {
                    let low = self.param(column, values[0].clone());
                    let high = self.param(column, values[1].clone());
                    Ok(format!("{} BETWEEN {} AND {}", quoted_column, low, high))
                }
                _ => Err(FilterError::InvalidOperatorData("$between requires array with 2 values".to_string())),
            },
            FilterOp::Exists => match data {
                Value::Bool(true) => Ok(format!("{} IS NOT NULL", quoted_column)),
                Value::Bool(false) => Ok(format!("{} IS NULL", quoted_column)),
                _ => Err(FilterError::InvalidOperatorData("$exists requires a boolean".to_string())),
            },
        }
    }

    fn text_param(&mut self, data: &Value) -> Result<String, FilterError> {
        match data {
            Value::String(_) => {
                self.params.push(data.clone());
                Ok(format!("${}", self.params.len()))
            }
            _ => Err(FilterError::InvalidOperatorData("pattern operators require a string".to_string())),
        }
    }

    fn param(&mut self, column: &str, value: Value) -> String {
        self.params.push(value);
        match self.casts.get(column) {
            Some(sql_type) => format!("${}::{}", self.params.len(), sql_type),
            None => format!("${}", self.params.len()),
        }
    }
}

/// Split `{ field: value }` or `{ field: { $op: value, ... } }` into conditions.
pub fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<FilterWhereInfo>, FilterError> {
    validate_identifier(field).map_err(FilterError::InvalidColumn)?;

    match value {
        Value::Object(obj) if is_operator_object(obj) => {
            let mut conditions = Vec::with_capacity(obj.len());
            for (op_key, op_val) in obj {
                let operator = FilterOp::parse(op_key)
                    .ok_or_else(|| FilterError::UnsupportedOperator(op_key.clone()))?;
                conditions.push(FilterWhereInfo { column: field.to_string(), operator, data: op_val.clone() });
            }
            Ok(conditions)
        }
        // Implicit equality: { field: value }
        _ => Ok(vec![FilterWhereInfo { column: field.to_string(), operator: FilterOp::Eq, data: value.clone() }]),
    }
}

fn is_operator_object(obj: &serde_json::Map<String, Value>) -> bool {
    !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(where_data: Value) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = FilterWhere::generate(&where_data, &mut params, &ColumnCasts::new(), 10).unwrap();
        (sql, params)
    }

    #[test]
    fn empty_where_is_tautology() {
        assert_eq!(compile(json!({})).0, "1=1");
        assert_eq!(compile(Value::Null).0, "1=1");
    }

    #[test]
    fn implicit_equality_and_null() {
        let (sql, params) = compile(json!({ "deleted_at": null, "name": "a" }));
        assert_eq!(sql, "\"deleted_at\" IS NULL AND \"name\" = $1");
        assert_eq!(params, vec![json!("a")]);
    }

    #[test]
    fn nested_logical_operators_keep_param_numbering() {
        let (sql, params) = compile(json!({
            "$or": [ { "rank": { "$gt": 3 } }, { "name": { "$in": ["x", "y"] } } ],
            "status": "open"
        }));
        assert_eq!(sql, "((\"rank\" > $1) OR (\"name\" IN ($2, $3))) AND \"status\" = $4");
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn not_equal_null_means_present() {
        let (sql, _) = compile(json!({ "deleted_at": { "$ne": null } }));
        assert_eq!(sql, "\"deleted_at\" IS NOT NULL");
    }

    #[test]
    fn casts_are_applied_to_params() {
        let mut casts = ColumnCasts::new();
        casts.insert("created_at".to_string(), "timestamptz".to_string());
        let mut params = Vec::new();
        let sql = FilterWhere::generate(
            &json!({ "created_at": { "$gte": "2024-01-01T00:00:00Z" } }),
            &mut params,
            &casts,
            10,
        )
        .unwrap();
        assert_eq!(sql, "\"created_at\" >= $1::timestamptz");
    }

    #[test]
    fn rejects_deep_nesting_and_bad_columns() {
        let mut params = Vec::new();
        let deep = json!({ "$not": { "$not": { "$not": { "a": 1 } } } });
        assert!(matches!(
            FilterWhere::generate(&deep, &mut params, &ColumnCasts::new(), 2),
            Err(FilterError::TooDeep(2))
        ));
        let bad = json!({ "a\"; DROP TABLE x; --": 1 });
        assert!(matches!(
            FilterWhere::generate(&bad, &mut params, &ColumnCasts::new(), 10),
            Err(FilterError::InvalidColumn(_))
        ));
    }

    #[test]
    fn empty_in_lists() {
        assert_eq!(compile(json!({ "id": { "$in": [] } })).0, "1=0");
        assert_eq!(compile(json!({ "id": { "$nin": [] } })).0, "1=1");
    }
}
