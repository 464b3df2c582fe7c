use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::config::{config, SchemaConfig};
use crate::database::backend::{FindOptions, StorageBackend};
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::query_builder::QueryBuilder;
use crate::database::record::Record;
use crate::filter::filter_where::ColumnCasts;
use crate::filter::Filter;
use crate::mapping::FieldMapping;

/// A Postgres transaction shared by every repository it is attached to.
///
/// Statements run one at a time on the underlying connection. Once committed
/// or rolled back the session refuses further work.
pub struct SqlSession {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl SqlSession {
    pub async fn begin(pool: &PgPool) -> Result<Self, DatabaseError> {
        let tx = pool.begin().await?;
        debug!("sql session started");
        Ok(Self { tx: Mutex::new(Some(tx)) })
    }

    pub async fn commit(&self) -> Result<(), DatabaseError> {
        let tx = self.tx.lock().await.take().ok_or_else(Self::finished)?;
        tx.commit().await?;
        debug!("sql session committed");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), DatabaseError> {
        let tx = self.tx.lock().await.take().ok_or_else(Self::finished)?;
        tx.rollback().await?;
        debug!("sql session rolled back");
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<Transaction<'static, Postgres>>> {
        self.tx.lock().await
    }

    pub(crate) fn finished() -> DatabaseError {
        DatabaseError::Session("session already finished".to_string())
    }
}

/// Storage backend over one Postgres table.
///
/// The table is expected to carry a text identity column and timestamptz
/// system columns; see [`SchemaConfig`] for their logical names.
#[derive(Clone)]
pub struct SqlBackend {
    pool: PgPool,
    table: String,
    mapping: FieldMapping,
    schema: SchemaConfig,
    extra_casts: ColumnCasts,
    max_depth: u32,
}

impl SqlBackend {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self, DatabaseError> {
        let table = table.into();
        // Fail early on a bad table name rather than on first query
        Filter::new(table.as_str())?;
        Ok(Self {
            pool,
            table,
            mapping: FieldMapping::new(),
            schema: config().schema.clone(),
            extra_casts: ColumnCasts::new(),
            max_depth: config().filter.max_nested_depth,
        })
    }

    /// Backend on the default pool from `DATABASE_URL`
    pub async fn connect(table: impl Into<String>) -> Result<Self, DatabaseError> {
        let pool = DatabaseManager::default_pool().await?;
        Self::new(pool, table)
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_schema(mut self, schema: SchemaConfig) -> Self {
        self.schema = schema;
        self
    }

    /// Bind values of a logical field with an explicit SQL cast
    pub fn with_cast(mut self, field: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.extra_casts.insert(field.into(), sql_type.into());
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn begin_session(&self) -> Result<SqlSession, DatabaseError> {
        SqlSession::begin(&self.pool).await
    }

    fn id_column(&self) -> &str {
        self.mapping.to_physical(&self.schema.id_column)
    }

    fn casts(&self) -> ColumnCasts {
        let mut casts: ColumnCasts = [
            &self.schema.created_column,
            &self.schema.updated_column,
            &self.schema.deleted_column,
        ]
        .into_iter()
        .map(|column| (self.mapping.to_physical(column).to_string(), "timestamptz".to_string()))
        .collect();
        for (field, sql_type) in &self.extra_casts {
            casts.insert(self.mapping.to_physical(field).to_string(), sql_type.clone());
        }
        casts
    }

    /// Fresh statement builder for one call
    fn filter(&self, where_data: &Value) -> Result<Filter, DatabaseError> {
        let mut filter = Filter::new(self.table.as_str())?;
        filter
            .casts(self.casts())
            .max_depth(self.max_depth)
            .where_clause(self.mapping.map_filter(where_data))?;
        Ok(filter)
    }

    fn query<'a>(&'a self, session: Option<&'a SqlSession>) -> QueryBuilder<'a> {
        QueryBuilder::new(&self.pool, session)
    }

    fn to_logical(&self, record: Record) -> Record {
        Record::from_map(self.mapping.record_to_logical(record.into_map()))
    }
}

#[async_trait]
impl StorageBackend for SqlBackend {
    type Session = SqlSession;

    fn name(&self) -> &str {
        &self.table
    }

    async fn count(&self, session: Option<&SqlSession>, filter: &Value) -> Result<u64, DatabaseError> {
        let sql = self.filter(filter)?.to_count_sql()?;
        self.query(session).count(&sql).await
    }

    async fn find(
        &self,
        session: Option<&SqlSession>,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Vec<Record>, DatabaseError> {
        let mut statement = self.filter(filter)?;
        statement
            .order(self.mapping.map_sort(&options.sort))?
            .limit(options.limit, options.offset);
        if let Some(fields) = &options.projection {
            statement.select(self.mapping.map_fields(fields))?;
        }
        let sql = statement.to_sql()?;
        let rows = self.query(session).select_all(&sql).await?;
        Ok(rows.into_iter().map(|r| self.to_logical(r)).collect())
    }

    async fn find_one(
        &self,
        session: Option<&SqlSession>,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Option<Record>, DatabaseError> {
        let options = FindOptions { limit: Some(1), ..options.clone() };
        Ok(self.find(session, filter, &options).await?.into_iter().next())
    }

    async fn insert(&self, session: Option<&SqlSession>, attributes: Record) -> Result<Record, DatabaseError> {
        let values = self.mapping.record_to_physical(attributes.into_map());
        let sql = self.filter(&Value::Null)?.to_insert_sql(&values)?;
        let row = self
            .query(session)
            .select_optional(&sql)
            .await?
            .ok_or_else(|| DatabaseError::QueryError("insert returned no row".to_string()))?;
        Ok(self.to_logical(row))
    }

    async fn update_one(
        &self,
        session: Option<&SqlSession>,
        filter: &Value,
        patch: &Map<String, Value>,
    ) -> Result<Option<Record>, DatabaseError> {
        let patch = self.mapping.record_to_physical(patch.clone());
        let sql = self.filter(filter)?.to_update_sql(&patch, Some(self.id_column()))?;
        let row = self.query(session).select_optional(&sql).await?;
        Ok(row.map(|r| self.to_logical(r)))
    }

    async fn update_many(
        &self,
        session: Option<&SqlSession>,
        filter: &Value,
        patch: &Map<String, Value>,
    ) -> Result<u64, DatabaseError> {
        let patch = self.mapping.record_to_physical(patch.clone());
        let sql = self.filter(filter)?.to_update_sql(&patch, None)?;
        self.query(session).execute(&sql).await
    }

    async fn delete_one(&self, session: Option<&SqlSession>, filter: &Value) -> Result<Option<Record>, DatabaseError> {
        let sql = self.filter(filter)?.to_delete_sql(Some(self.id_column()))?;
        let row = self.query(session).select_optional(&sql).await?;
        Ok(row.map(|r| self.to_logical(r)))
    }

    async fn delete_many(&self, session: Option<&SqlSession>, filter: &Value) -> Result<u64, DatabaseError> {
        let sql = self.filter(filter)?.to_delete_sql(None)?;
        self.query(session).execute(&sql).await
    }

    async fn distinct(
        &self,
        session: Option<&SqlSession>,
        field: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, DatabaseError> {
        let sql = self.filter(filter)?.to_distinct_sql(self.mapping.to_physical(field))?;
        self.query(session).values(&sql).await
    }

    async fn count_distinct(
        &self,
        session: Option<&SqlSession>,
        field: &str,
        filter: &Value,
    ) -> Result<u64, DatabaseError> {
        let sql = self.filter(filter)?.to_count_distinct_sql(self.mapping.to_physical(field))?;
        self.query(session).count(&sql).await
    }
}
