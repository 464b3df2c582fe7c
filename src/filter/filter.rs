use serde_json::{Map, Value};

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::{ColumnCasts, FilterWhere};
use super::types::{SortKey, SqlResult};

/// Per-call SQL statement builder for a single table.
///
/// A `Filter` is built fresh for every backend call from the current where
/// clause and options; nothing is carried over between statements.
pub struct Filter {
    table_name: String,
    select_columns: Vec<String>,
    where_data: Option<Value>,
    order_data: Vec<SortKey>,
    limit: Option<u64>,
    offset: Option<u64>,
    casts: ColumnCasts,
    max_depth: u32,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        validate_identifier(&table_name).map_err(FilterError::InvalidTableName)?;
        Ok(Self {
            table_name,
            select_columns: vec![],
            where_data: None,
            order_data: vec![],
            limit: None,
            offset: None,
            casts: ColumnCasts::new(),
            max_depth: crate::config::CONFIG.filter.max_nested_depth,
        })
    }

    pub fn select(&mut self, columns: Vec<String>) -> Result<&mut Self, FilterError> {
        for column in &columns {
            if column == "*" {
                continue;
            }
            validate_identifier(column).map_err(FilterError::InvalidColumn)?;
        }
        self.select_columns = columns;
        Ok(self)
    }

    pub fn where_clause(&mut self, conditions: Value) -> Result<&mut Self, FilterError> {
        FilterWhere::validate(&conditions)?;
        self.where_data = Some(conditions);
        Ok(self)
    }

    pub fn order(&mut self, keys: Vec<SortKey>) -> Result<&mut Self, FilterError> {
        FilterOrder::validate(&keys)?;
        self.order_data = keys;
        Ok(self)
    }

    pub fn limit(&mut self, limit: Option<u64>, offset: Option<u64>) -> &mut Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn casts(&mut self, casts: ColumnCasts) -> &mut Self {
        self.casts = casts;
        self
    }

    pub fn max_depth(&mut self, max_depth: u32) -> &mut Self {
        self.max_depth = max_depth;
        self
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let mut params = Vec::new();
        let where_clause = self.where_sql(&mut params)?;
        let query = [
            format!("SELECT {}", self.build_select_clause()),
            format!("FROM \"{}\"", self.table_name),
            format!("WHERE {}", where_clause),
            FilterOrder::generate(&self.order_data),
            self.build_limit_clause(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        Ok(SqlResult { query, params })
    }

    pub fn to_count_sql(&self) -> Result<SqlResult, FilterError> {
        let mut params = Vec::new();
        let where_clause = self.where_sql(&mut params)?;
        let query = format!("SELECT COUNT(*) AS count FROM \"{}\" WHERE {}", self.table_name, where_clause);
        Ok(SqlResult { query, params })
    }

    pub fn to_distinct_sql(&self, column: &str) -> Result<SqlResult, FilterError> {
        validate_identifier(column).map_err(FilterError::InvalidColumn)?;
        let mut params = Vec::new();
        let where_clause = self.where_sql(&mut params)?;
        let query = format!(
            "SELECT DISTINCT \"{}\" AS value FROM \"{}\" WHERE {}",
            column, self.table_name, where_clause
        );
        Ok(SqlResult { query, params })
    }

    pub fn to_count_distinct_sql(&self, column: &str) -> Result<SqlResult, FilterError> {
        validate_identifier(column).map_err(FilterError::InvalidColumn)?;
        let mut params = Vec::new();
        let where_clause = self.where_sql(&mut params)?;
        let query = format!(
            "SELECT COUNT(DISTINCT \"{}\") AS count FROM \"{}\" WHERE {}",
            column, self.table_name, where_clause
        );
        Ok(SqlResult { query, params })
    }

    pub fn to_insert_sql(&self, values: &Map<String, Value>) -> Result<SqlResult, FilterError> {
        if values.is_empty() {
            return Ok(SqlResult {
                query: format!("INSERT INTO \"{}\" DEFAULT VALUES RETURNING *", self.table_name),
                params: vec![],
            });
        }

        let mut params = Vec::with_capacity(values.len());
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        for (column, value) in values {
            validate_identifier(column).map_err(FilterError::InvalidColumn)?;
            params.push(value.clone());
            columns.push(format!("\"{}\"", column));
            placeholders.push(self.placeholder(column, params.len()));
        }

        let query = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING *",
            self.table_name,
            columns.join(", "),
            placeholders.join(", ")
        );
        Ok(SqlResult { query, params })
    }

    /// UPDATE statement. With `single_by` the update targets only the first
    /// matching row, located by that key column, and returns it.
    pub fn to_update_sql(&self, patch: &Map<String, Value>, single_by: Option<&str>) -> Result<SqlResult, FilterError> {
        if patch.is_empty() {
            return Err(FilterError::InvalidPatch("patch has no fields".to_string()));
        }

        let mut params = Vec::with_capacity(patch.len());
        let mut assignments = Vec::with_capacity(patch.len());
        for (column, value) in patch {
            validate_identifier(column).map_err(FilterError::InvalidColumn)?;
            params.push(value.clone());
            assignments.push(format!("\"{}\" = {}", column, self.placeholder(column, params.len())));
        }

        let where_clause = self.where_sql(&mut params)?;
        let query = match single_by {
            Some(key) => {
                validate_identifier(key).map_err(FilterError::InvalidColumn)?;
                format!(
                    "UPDATE \"{t}\" SET {set} WHERE \"{k}\" = (SELECT \"{k}\" FROM \"{t}\" WHERE {w} LIMIT 1) RETURNING *",
                    t = self.table_name,
                    set = assignments.join(", "),
                    k = key,
                    w = where_clause
                )
            }
            None => format!("UPDATE \"{}\" SET {} WHERE {}", self.table_name, assignments.join(", "), where_clause),
        };
        Ok(SqlResult { query, params })
    }

    pub fn to_delete_sql(&self, single_by: Option<&str>) -> Result<SqlResult, FilterError> {
        let mut params = Vec::new();
        let where_clause = self.where_sql(&mut params)?;
        let query = match single_by {
            Some(key) => {
                validate_identifier(key).map_err(FilterError::InvalidColumn)?;
                format!(
                    "DELETE FROM \"{t}\" WHERE \"{k}\" = (SELECT \"{k}\" FROM \"{t}\" WHERE {w} LIMIT 1) RETURNING *",
                    t = self.table_name,
                    k = key,
                    w = where_clause
                )
            }
            None => format!("DELETE FROM \"{}\" WHERE {}", self.table_name, where_clause),
        };
        Ok(SqlResult { query, params })
    }

    fn where_sql(&self, params: &mut Vec<Value>) -> Result<String, FilterError> {
        let sql = match self.where_data {
            Some(ref where_data) => FilterWhere::generate(where_data, params, &self.casts, self.max_depth)?,
            None => "1=1".to_string(),
        };
        if crate::config::CONFIG.filter.debug_logging {
            tracing::debug!(table = %self.table_name, params = params.len(), "where: {}", sql);
        }
        Ok(sql)
    }

    fn placeholder(&self, column: &str, index: usize) -> String {
        match self.casts.get(column) {
            Some(sql_type) => format!("${}::{}", index, sql_type),
            None => format!("${}", index),
        }
    }

    fn build_select_clause(&self) -> String {
        if self.select_columns.is_empty() || self.select_columns.iter().any(|c| c == "*") {
            "*".to_string()
        } else {
            self.select_columns.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ")
        }
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}

/// Table and column names must be plain identifiers; they are interpolated
/// into SQL inside double quotes.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        None => Err("identifier cannot be empty".to_string()),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => {
            Err(format!("invalid identifier format: {}", name))
        }
        Some(_) if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') => {
            Err(format!("invalid identifier format: {}", name))
        }
        Some(_) => Ok(()),
    }
}
