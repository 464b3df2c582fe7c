use serde_json::Value;

use super::error::FilterError;
use super::filter::validate_identifier;
use super::types::{SortDirection, SortKey};

pub struct FilterOrder;

impl FilterOrder {
    pub fn validate_and_parse(order: &Value) -> Result<Vec<SortKey>, FilterError> {
        let keys = match order {
            Value::String(s) => Self::parse_order_string(s),
            Value::Array(arr) => {
                // Expect array of strings like ["created_at desc", "name asc"]
                let mut out = Vec::new();
                for v in arr {
                    match v {
                        Value::String(s) => out.extend(Self::parse_order_string(s)),
                        other => {
                            return Err(FilterError::InvalidOperatorData(format!(
                                "order entries must be strings, got {}",
                                other
                            )))
                        }
                    }
                }
                out
            }
            Value::Object(obj) => {
                // { "created_at": "desc", "name": "asc" }
                obj.iter()
                    .map(|(k, v)| SortKey { column: k.clone(), direction: Self::parse_direction(v) })
                    .collect()
            }
            _ => vec![],
        };
        Self::validate(&keys)?;
        Ok(keys)
    }

    pub fn validate(keys: &[SortKey]) -> Result<(), FilterError> {
        for key in keys {
            validate_identifier(&key.column).map_err(FilterError::InvalidColumn)?;
        }
        Ok(())
    }

    fn parse_direction(v: &Value) -> SortDirection {
        match v {
            Value::String(s) if s.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Value::Number(n) if n.as_i64() == Some(-1) => SortDirection::Desc,
            _ => SortDirection::Asc,
        }
    }

    fn parse_order_string(s: &str) -> Vec<SortKey> {
        // split on commas, then each token into column and direction
        let mut out = Vec::new();
        for part in s.split(',') {
            let mut it = part.split_whitespace();
            if let Some(col) = it.next() {
                let dir = it.next().unwrap_or("asc");
                let direction = if dir.eq_ignore_ascii_case("desc") { SortDirection::Desc } else { SortDirection::Asc };
                out.push(SortKey { column: col.to_string(), direction });
            }
        }
        out
    }

    pub fn generate(keys: &[SortKey]) -> String {
        if keys.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = keys
            .iter()
            .map(|k| format!("\"{}\" {}", k.column, k.direction.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}
