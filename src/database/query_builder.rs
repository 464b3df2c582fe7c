use std::time::Instant;

use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow, PgTypeInfo};
use sqlx::{Column, PgPool, Row, TypeInfo};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::record::{format_timestamp, Record};
use crate::database::sql::SqlSession;
use crate::filter::SqlResult;

/// Runs compiled statements either on the pool or inside an attached session.
pub struct QueryBuilder<'a> {
    pool: &'a PgPool,
    session: Option<&'a SqlSession>,
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, PgArguments>;

impl<'a> QueryBuilder<'a> {
    pub fn new(pool: &'a PgPool, session: Option<&'a SqlSession>) -> Self {
        Self { pool, session }
    }

    pub async fn select_all(&self, sql: &SqlResult) -> Result<Vec<Record>, DatabaseError> {
        let rows = self.fetch_all(sql).await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn select_optional(&self, sql: &SqlResult) -> Result<Option<Record>, DatabaseError> {
        let rows = self.fetch_all(sql).await?;
        rows.first().map(row_to_record).transpose()
    }

    pub async fn count(&self, sql: &SqlResult) -> Result<u64, DatabaseError> {
        let rows = self.fetch_all(sql).await?;
        let row = rows.first().ok_or(DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    pub async fn values(&self, sql: &SqlResult) -> Result<Vec<Value>, DatabaseError> {
        let rows = self.fetch_all(sql).await?;
        rows.iter()
            .map(|row| {
                let column = row.columns().first().ok_or(DatabaseError::Sqlx(sqlx::Error::ColumnNotFound("value".into())))?;
                Ok(extract_column_value(row, 0, column.type_info()))
            })
            .collect()
    }

    pub async fn execute(&self, sql: &SqlResult) -> Result<u64, DatabaseError> {
        let started = Instant::now();
        let query = bind_params(sqlx::query(&sql.query), &sql.params);
        let result = match self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                let tx = guard.as_mut().ok_or_else(SqlSession::finished)?;
                query.execute(&mut **tx).await?
            }
            None => query.execute(self.pool).await?,
        };
        log_query(sql, started);
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &SqlResult) -> Result<Vec<PgRow>, DatabaseError> {
        let started = Instant::now();
        let query = bind_params(sqlx::query(&sql.query), &sql.params);
        let rows = match self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                let tx = guard.as_mut().ok_or_else(SqlSession::finished)?;
                query.fetch_all(&mut **tx).await?
            }
            None => query.fetch_all(self.pool).await?,
        };
        log_query(sql, started);
        Ok(rows)
    }
}

fn log_query(sql: &SqlResult, started: Instant) {
    let settings = &crate::config::CONFIG.database;
    let elapsed = started.elapsed();
    if settings.enable_query_logging {
        tracing::debug!(query = %sql.query, params = sql.params.len(), elapsed_ms = elapsed.as_millis() as u64, "sql");
    }
    if settings.enable_slow_query_warning && elapsed.as_millis() as u64 > settings.slow_query_threshold_ms {
        tracing::warn!("Slow query ({}ms): {}", elapsed.as_millis(), sql.query);
    }
}

fn bind_params<'q>(mut q: PgQuery<'q>, params: &'q [Value]) -> PgQuery<'q> {
    for p in params {
        q = bind_param(q, p);
    }
    q
}

fn bind_param<'q>(q: PgQuery<'q>, v: &'q Value) -> PgQuery<'q> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                // Postgres doesn't have u64; cast down if safe
                q.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        // Arrays and objects are stored as JSONB
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}

fn row_to_record(row: &PgRow) -> Result<Record, DatabaseError> {
    let mut fields = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        fields.insert(column.name().to_string(), extract_column_value(row, i, column.type_info()));
    }
    Ok(Record::from_map(fields))
}

/// Extract a typed column value as JSON
fn extract_column_value(row: &PgRow, index: usize, type_info: &PgTypeInfo) -> Value {
    let type_name = type_info.name();

    match type_name {
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |u| Value::String(u.to_string())),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::String),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::from),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::from),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |n| Value::from(n as f64)),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::from),
        "NUMERIC" => row
            .try_get::<Option<sqlx::types::BigDecimal>, _>(index)
            .ok()
            .flatten()
            .and_then(|d| d.to_string().parse::<f64>().ok())
            .map_or(Value::Null, Value::from),
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::Bool),
        "JSONB" | "JSON" => row
            .try_get::<Option<Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |t| Value::String(format_timestamp(t))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |t| Value::String(format_timestamp(t.and_utc()))),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |d| Value::String(d.to_string())),
        _ => {
            tracing::warn!("Unhandled PostgreSQL type: {}, returning null", type_name);
            Value::Null
        }
    }
}
