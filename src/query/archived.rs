use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Which records a read sees with respect to soft deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArchivedMode {
    /// Only records whose deletion timestamp is absent
    ExcludeDeleted,
    /// Only records whose deletion timestamp is set
    OnlyDeleted,
    /// Both, i.e. no condition on the deletion timestamp
    IncludeAll,
}

impl ArchivedMode {
    /// The condition on the deletion column for this mode, if any
    pub fn condition(&self, column: &str) -> Option<Value> {
        match self {
            ArchivedMode::ExcludeDeleted => Some(json!({ column: null })),
            ArchivedMode::OnlyDeleted => Some(json!({ column: { "$ne": null } })),
            ArchivedMode::IncludeAll => None,
        }
    }

    /// Merge this mode's condition into a caller-supplied query.
    ///
    /// The condition is added as a plain key when the query is an object that
    /// does not mention the column yet; otherwise both are combined with `$and`
    /// so the caller's own condition on the column is never overwritten.
    pub fn apply(&self, query: &Value, column: &str) -> Value {
        let condition = match self.condition(column) {
            Some(condition) => condition,
            None => return normalize_query(query),
        };
        match query {
            Value::Null => condition,
            Value::Object(obj) if obj.is_empty() => condition,
            Value::Object(obj) if !obj.contains_key(column) => {
                let mut merged = obj.clone();
                if let Value::Object(extra) = condition {
                    merged.extend(extra);
                }
                Value::Object(merged)
            }
            other => json!({ "$and": [other, condition] }),
        }
    }
}

fn normalize_query(query: &Value) -> Value {
    match query {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    }
}

/// The caller-facing "archived" option.
///
/// Accepts what arrives from loosely typed callers (absent, `null`, a boolean
/// or a string such as a query-string value) or an explicit [`ArchivedMode`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Archived {
    #[default]
    Unset,
    Flag(bool),
    Mode(ArchivedMode),
    Text(String),
}

impl Archived {
    /// Unset, `false` and the string `"false"` mean "not archived"; any other
    /// value means archived.
    pub fn is_archived(&self) -> bool {
        match self {
            Archived::Unset | Archived::Flag(false) => false,
            Archived::Text(s) => s != "false",
            Archived::Flag(true) => true,
            Archived::Mode(mode) => *mode != ArchivedMode::ExcludeDeleted,
        }
    }

    /// Mode for single-record reads: archived narrows to deleted records.
    pub fn lookup_mode(&self) -> ArchivedMode {
        match self {
            Archived::Mode(mode) => *mode,
            _ if self.is_archived() => ArchivedMode::OnlyDeleted,
            _ => ArchivedMode::ExcludeDeleted,
        }
    }

    /// Mode for listing reads: archived widens to deleted and live records.
    pub fn listing_mode(&self) -> ArchivedMode {
        match self {
            Archived::Mode(mode) => *mode,
            _ if self.is_archived() => ArchivedMode::IncludeAll,
            _ => ArchivedMode::ExcludeDeleted,
        }
    }
}

impl From<bool> for Archived {
    fn from(flag: bool) -> Self {
        Archived::Flag(flag)
    }
}

impl From<&str> for Archived {
    fn from(text: &str) -> Self {
        Archived::Text(text.to_string())
    }
}

impl From<String> for Archived {
    fn from(text: String) -> Self {
        Archived::Text(text)
    }
}

impl From<ArchivedMode> for Archived {
    fn from(mode: ArchivedMode) -> Self {
        Archived::Mode(mode)
    }
}

impl<T: Into<Archived>> From<Option<T>> for Archived {
    fn from(value: Option<T>) -> Self {
        value.map_or(Archived::Unset, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_archived_inputs() {
        let inputs: Vec<Archived> = vec![
            Archived::Unset,
            serde_json::from_value(Value::Null).unwrap(),
            false.into(),
            "false".into(),
        ];
        for input in inputs {
            assert!(!input.is_archived(), "{:?}", input);
            assert_eq!(input.lookup_mode(), ArchivedMode::ExcludeDeleted);
            assert_eq!(input.listing_mode(), ArchivedMode::ExcludeDeleted);
        }
    }

    #[test]
    fn archived_inputs() {
        let inputs: Vec<Archived> = vec![true.into(), "true".into(), "yes".into(), "".into(), "FALSE".into()];
        for input in inputs {
            assert!(input.is_archived(), "{:?}", input);
            assert_eq!(input.lookup_mode(), ArchivedMode::OnlyDeleted);
            assert_eq!(input.listing_mode(), ArchivedMode::IncludeAll);
        }
    }

    #[test]
    fn explicit_mode_bypasses_context() {
        let archived = Archived::from(ArchivedMode::IncludeAll);
        assert_eq!(archived.lookup_mode(), ArchivedMode::IncludeAll);
        let archived = Archived::from(ArchivedMode::OnlyDeleted);
        assert_eq!(archived.listing_mode(), ArchivedMode::OnlyDeleted);
    }

    #[test]
    fn deserializes_loose_inputs() {
        let archived: Archived = serde_json::from_str("true").unwrap();
        assert_eq!(archived, Archived::Flag(true));
        let archived: Archived = serde_json::from_str("\"false\"").unwrap();
        assert_eq!(archived, Archived::Text("false".to_string()));
        let archived: Archived = serde_json::from_str("\"onlyDeleted\"").unwrap();
        assert_eq!(archived, Archived::Mode(ArchivedMode::OnlyDeleted));
    }

    #[test]
    fn applies_conditions() {
        let column = "deleted_at";
        assert_eq!(ArchivedMode::ExcludeDeleted.apply(&Value::Null, column), json!({ "deleted_at": null }));
        assert_eq!(
            ArchivedMode::ExcludeDeleted.apply(&json!({ "name": "a" }), column),
            json!({ "name": "a", "deleted_at": null })
        );
        assert_eq!(
            ArchivedMode::OnlyDeleted.apply(&json!({ "name": "a" }), column),
            json!({ "name": "a", "deleted_at": { "$ne": null } })
        );
        assert_eq!(ArchivedMode::IncludeAll.apply(&json!({ "name": "a" }), column), json!({ "name": "a" }));
        assert_eq!(ArchivedMode::IncludeAll.apply(&Value::Null, column), json!({}));
    }

    #[test]
    fn keeps_callers_condition_on_deletion_column() {
        let query = json!({ "deleted_at": { "$gt": "2024-01-01T00:00:00Z" } });
        assert_eq!(
            ArchivedMode::OnlyDeleted.apply(&query, "deleted_at"),
            json!({ "$and": [query, { "deleted_at": { "$ne": null } }] })
        );
    }
}
