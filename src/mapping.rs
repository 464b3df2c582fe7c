//! Logical ↔ physical field names.
//!
//! Application code speaks logical field names (`ownerId`, `createdAt`, ...);
//! a backend may store them under different physical names (`owner_id`,
//! `created_at`, `_id`). A [`FieldMapping`] is an ordered list of
//! `(logical, physical)` pairs applied to filters, sort keys, patches and
//! records. Names without an entry map to themselves.

use serde_json::{Map, Value};

use crate::filter::SortKey;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    pairs: Vec<(String, String)>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<L, P>(pairs: impl IntoIterator<Item = (L, P)>) -> Self
    where
        L: Into<String>,
        P: Into<String>,
    {
        Self { pairs: pairs.into_iter().map(|(l, p)| (l.into(), p.into())).collect() }
    }

    /// Add or replace the physical name for `logical`.
    pub fn with(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        let logical = logical.into();
        let physical = physical.into();
        match self.pairs.iter_mut().find(|(l, _)| *l == logical) {
            Some(pair) => pair.1 = physical,
            None => self.pairs.push((logical, physical)),
        }
        self
    }

    /// camelCase logical names stored as snake_case columns.
    pub fn snake_case(fields: &[&str]) -> Self {
        fields.iter().fold(Self::new(), |mapping, field| mapping.with(*field, to_snake_case(field)))
    }

    /// A reference field (`owner`) stored as its id column (`owner_id`).
    pub fn with_reference(self, field: &str) -> Self {
        let physical = format!("{}_id", to_snake_case(field));
        self.with(field, physical)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn to_physical<'a>(&'a self, logical: &'a str) -> &'a str {
        self.pairs
            .iter()
            .find(|(l, _)| l == logical)
            .map(|(_, p)| p.as_str())
            .unwrap_or(logical)
    }

    pub fn to_logical<'a>(&'a self, physical: &'a str) -> &'a str {
        self.pairs
            .iter()
            .find(|(_, p)| p == physical)
            .map(|(l, _)| l.as_str())
            .unwrap_or(physical)
    }

    /// Rewrite field keys of a where clause; operator keys and values are kept.
    pub fn map_filter(&self, where_data: &Value) -> Value {
        if self.is_empty() {
            return where_data.clone();
        }
        match where_data {
            Value::Object(obj) => {
                let mut out = Map::with_capacity(obj.len());
                for (key, value) in obj {
                    match key.as_str() {
                        "$and" | "$or" => {
                            let mapped = match value {
                                Value::Array(items) => Value::Array(items.iter().map(|v| self.map_filter(v)).collect()),
                                other => other.clone(),
                            };
                            out.insert(key.clone(), mapped);
                        }
                        "$not" => {
                            out.insert(key.clone(), self.map_filter(value));
                        }
                        k if k.starts_with('$') => {
                            out.insert(key.clone(), value.clone());
                        }
                        k => {
                            out.insert(self.to_physical(k).to_string(), value.clone());
                        }
                    }
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    pub fn map_sort(&self, keys: &[SortKey]) -> Vec<SortKey> {
        keys.iter()
            .map(|k| SortKey { column: self.to_physical(&k.column).to_string(), direction: k.direction })
            .collect()
    }

    pub fn map_fields(&self, fields: &[String]) -> Vec<String> {
        fields.iter().map(|f| self.to_physical(f).to_string()).collect()
    }

    pub fn record_to_physical(&self, record: Map<String, Value>) -> Map<String, Value> {
        if self.is_empty() {
            return record;
        }
        record.into_iter().map(|(k, v)| (self.to_physical(&k).to_string(), v)).collect()
    }

    pub fn record_to_logical(&self, record: Map<String, Value>) -> Map<String, Value> {
        if self.is_empty() {
            return record;
        }
        record.into_iter().map(|(k, v)| (self.to_logical(&k).to_string(), v)).collect()
    }
}

/// `ownerId` -> `owner_id`, `HTTPCode` -> `http_code`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).map_or(false, |n| n.is_ascii_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
            if i > 0 && !out.ends_with('_') && (prev_lower || (prev_upper && next_lower)) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `owner_id` -> `ownerId`.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            if out.is_empty() {
                out.push(c);
            } else {
                upper_next = true;
            }
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn case_conversions() {
        assert_eq!(to_snake_case("ownerId"), "owner_id");
        assert_eq!(to_snake_case("createdAt"), "created_at");
        assert_eq!(to_snake_case("HTTPCode"), "http_code");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_camel_case("owner_id"), "ownerId");
        assert_eq!(to_camel_case("_private_field"), "_privateField");
    }

    #[test]
    fn lookups_fall_back_to_identity() {
        let mapping = FieldMapping::snake_case(&["createdAt"]).with("id", "_id");
        assert_eq!(mapping.to_physical("createdAt"), "created_at");
        assert_eq!(mapping.to_physical("id"), "_id");
        assert_eq!(mapping.to_physical("name"), "name");
        assert_eq!(mapping.to_logical("_id"), "id");
        assert_eq!(mapping.to_logical("name"), "name");
    }

    #[test]
    fn reference_fields_get_id_suffix() {
        let mapping = FieldMapping::new().with_reference("owner").with_reference("parentFolder");
        assert_eq!(mapping.to_physical("owner"), "owner_id");
        assert_eq!(mapping.to_physical("parentFolder"), "parent_folder_id");
    }

    #[test]
    fn later_pairs_replace_earlier_ones() {
        let mapping = FieldMapping::new().with("a", "x").with("a", "y");
        assert_eq!(mapping.pairs().len(), 1);
        assert_eq!(mapping.to_physical("a"), "y");
    }

    #[test]
    fn maps_nested_filters() {
        let mapping = FieldMapping::snake_case(&["deletedAt", "ownerId"]);
        let mapped = mapping.map_filter(&json!({
            "deletedAt": null,
            "$or": [ { "ownerId": { "$in": ["a"] } }, { "$not": { "ownerId": "b" } } ]
        }));
        assert_eq!(
            mapped,
            json!({
                "deleted_at": null,
                "$or": [ { "owner_id": { "$in": ["a"] } }, { "$not": { "owner_id": "b" } } ]
            })
        );
    }

    #[test]
    fn maps_records_both_ways() {
        let mapping = FieldMapping::snake_case(&["createdAt"]);
        let record = json!({ "createdAt": "t", "name": "a" }).as_object().cloned().unwrap();
        let physical = mapping.record_to_physical(record.clone());
        assert!(physical.contains_key("created_at"));
        assert_eq!(mapping.record_to_logical(physical), record);
    }
}
