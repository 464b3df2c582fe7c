use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Invalid WHERE clause: {0}")]
    InvalidWhereClause(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid operator data: {0}")]
    InvalidOperatorData(String),

    #[error("WHERE clause nested deeper than {0} levels")]
    TooDeep(u32),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}
