use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::config::{config, AppConfig};
use crate::database::backend::{FindOptions, StorageBackend};
use crate::database::manager::DatabaseError;
use crate::database::record::{now_timestamp, Record};
use crate::error::{RepositoryError, Result};
use crate::query::pagination::resolve_sort;
use crate::query::{paginate, Archived, ArchivedMode, PaginatedResult, PaginationRequest};
use crate::types::Operation;

/// Options for single-record reads
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub archived: Archived,
    pub projection: Option<Vec<String>>,
}

impl ReadOptions {
    pub fn archived(archived: impl Into<Archived>) -> Self {
        Self { archived: archived.into(), ..Default::default() }
    }

    pub fn projection(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }
}

/// Options for listing reads
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub archived: Archived,
    pub sort: Option<Value>,
    pub projection: Option<Vec<String>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ListOptions {
    pub fn archived(mut self, archived: impl Into<Archived>) -> Self {
        self.archived = archived.into();
        self
    }

    pub fn sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Uniform CRUD contract over any [`StorageBackend`].
///
/// Records cross the backend as [`Record`]s and are converted to `T` with
/// serde on the way out. `T` may itself be [`Record`] for untyped access.
pub struct Repository<T, B: StorageBackend> {
    backend: B,
    session: Option<Arc<B::Session>>,
    config: AppConfig,
    _phantom: PhantomData<fn() -> T>,
}

impl<T, B> Repository<T, B>
where
    T: DeserializeOwned + Send,
    B: StorageBackend,
{
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, config().clone())
    }

    pub fn with_config(backend: B, config: AppConfig) -> Self {
        Self {
            backend,
            session: None,
            config,
            _phantom: PhantomData,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ========================================
    // Sessions
    // ========================================

    /// Run every following operation on this repository inside `session`
    pub fn connect_db_session(&mut self, session: Arc<B::Session>) {
        debug!(table = self.backend.name(), "session attached");
        self.session = Some(session);
    }

    /// Detach the current session. It is neither committed nor rolled back.
    pub fn disconnect_db_session(&mut self) -> Option<Arc<B::Session>> {
        debug!(table = self.backend.name(), "session detached");
        self.session.take()
    }

    pub fn session(&self) -> Option<&B::Session> {
        self.session.as_deref()
    }

    // ========================================
    // Create
    // ========================================

    pub async fn create<A: Serialize + ?Sized>(&self, attributes: &A) -> Result<T> {
        let schema = &self.config.schema;
        let now = now_timestamp();
        let mut record = Record::from_serializable(attributes).map_err(DatabaseError::from)?;
        record
            .set_if_empty(schema.id_column.as_str(), Uuid::new_v4().to_string())
            .set(schema.created_column.as_str(), now.clone())
            .set(schema.updated_column.as_str(), now)
            .set(schema.deleted_column.as_str(), Value::Null);

        debug!(
            table = self.backend.name(),
            operation = %Operation::Create,
            id = ?record.id(schema),
            "{}",
            record
        );
        let created = self.backend.insert(self.session(), record).await?;
        typed(created)
    }

    // ========================================
    // Reads
    // ========================================

    pub async fn by_id(&self, id: impl Into<Value>, options: ReadOptions) -> Result<T> {
        let query = json!({ self.config.schema.id_column.as_str(): id.into() });
        self.by_query(&query, options).await
    }

    /// First record matching `query`, or NotFound
    pub async fn by_query(&self, query: &Value, options: ReadOptions) -> Result<T> {
        let filter = self.shape(query, options.archived.lookup_mode());
        debug!(table = self.backend.name(), operation = %Operation::Select, filter = %filter, "by_query");

        let find = FindOptions::default().projection(options.projection);
        match self.backend.find_one(self.session(), &filter, &find).await {
            Ok(Some(record)) => typed(record),
            Ok(None) => Err(self.not_found(Operation::Select)),
            Err(err) => Err(self.lift(Operation::Select, err)),
        }
    }

    pub async fn count(&self, query: &Value, archived: impl Into<Archived>) -> Result<u64> {
        let filter = self.shape(query, archived.into().listing_mode());
        Ok(self.backend.count(self.session(), &filter).await?)
    }

    pub async fn exists(&self, query: &Value, archived: impl Into<Archived>) -> Result<bool> {
        Ok(self.count(query, archived).await? > 0)
    }

    pub async fn distinct(&self, field: &str, query: &Value, archived: impl Into<Archived>) -> Result<Vec<Value>> {
        let filter = self.shape(query, archived.into().listing_mode());
        Ok(self.backend.distinct(self.session(), field, &filter).await?)
    }

    pub async fn count_distinct(&self, field: &str, query: &Value, archived: impl Into<Archived>) -> Result<u64> {
        let filter = self.shape(query, archived.into().listing_mode());
        Ok(self.backend.count_distinct(self.session(), field, &filter).await?)
    }

    /// Every matching record, in the requested or the default order
    pub async fn all(&self, query: &Value, options: ListOptions) -> Result<Vec<T>> {
        let filter = self.shape(query, options.archived.listing_mode());
        let sort = resolve_sort(options.sort.as_ref(), &self.config.schema.default_sort).map_err(DatabaseError::from)?;
        let find = FindOptions {
            limit: options.limit,
            offset: options.offset,
            sort,
            projection: options.projection,
        };
        let records = self.backend.find(self.session(), &filter, &find).await?;
        records.into_iter().map(typed).collect()
    }

    pub async fn paginate(&self, request: &PaginationRequest) -> Result<PaginatedResult<T>> {
        let page = paginate(&self.backend, self.session(), request, &self.config).await?;
        page.try_map(typed)
    }

    // ========================================
    // Updates
    // ========================================

    /// Patch the first record matching `query`. Identity and creation fields
    /// in the patch are ignored; the update timestamp is always refreshed.
    pub async fn update<A: Serialize + ?Sized>(
        &self,
        query: &Value,
        patch: &A,
        archived: impl Into<Archived>,
    ) -> Result<T> {
        let filter = self.shape(query, archived.into().lookup_mode());
        let patch = self.prepare_patch(patch)?;
        debug!(table = self.backend.name(), operation = %Operation::Update, filter = %filter, "update");

        match self.backend.update_one(self.session(), &filter, &patch).await {
            Ok(Some(record)) => typed(record),
            Ok(None) => Err(self.not_found(Operation::Update)),
            Err(err) => Err(self.lift(Operation::Update, err)),
        }
    }

    pub async fn update_many<A: Serialize + ?Sized>(
        &self,
        query: &Value,
        patch: &A,
        archived: impl Into<Archived>,
    ) -> Result<u64> {
        let filter = self.shape(query, archived.into().listing_mode());
        let patch = self.prepare_patch(patch)?;
        debug!(table = self.backend.name(), operation = %Operation::Update, filter = %filter, "update_many");
        Ok(self.backend.update_many(self.session(), &filter, &patch).await?)
    }

    // ========================================
    // Deletes
    // ========================================

    /// Stamp the deletion timestamp of the first live record matching
    /// `query`. A match that is already soft-deleted comes back unchanged.
    pub async fn soft_delete(&self, query: &Value) -> Result<T> {
        let column = self.config.schema.deleted_column.as_str();
        let filter = self.shape(query, ArchivedMode::ExcludeDeleted);
        let mut patch = Map::new();
        patch.insert(column.to_string(), Value::String(now_timestamp()));
        debug!(table = self.backend.name(), operation = %Operation::SoftDelete, filter = %filter, "soft_delete");

        match self.backend.update_one(self.session(), &filter, &patch).await {
            Ok(Some(record)) => return typed(record),
            Ok(None) => {}
            Err(err) => return Err(self.lift(Operation::SoftDelete, err)),
        }

        let filter = self.shape(query, ArchivedMode::OnlyDeleted);
        match self.backend.find_one(self.session(), &filter, &FindOptions::default()).await {
            Ok(Some(record)) => typed(record),
            Ok(None) => Err(self.not_found(Operation::SoftDelete)),
            Err(err) => Err(self.lift(Operation::SoftDelete, err)),
        }
    }

    /// Soft-delete every live record matching `query`
    pub async fn soft_delete_many(&self, query: &Value) -> Result<u64> {
        let filter = self.shape(query, ArchivedMode::ExcludeDeleted);
        let mut patch = Map::new();
        patch.insert(self.config.schema.deleted_column.clone(), Value::String(now_timestamp()));
        debug!(table = self.backend.name(), operation = %Operation::SoftDelete, filter = %filter, "soft_delete_many");
        Ok(self.backend.update_many(self.session(), &filter, &patch).await?)
    }

    /// Remove the first record matching `query`, deleted or not
    pub async fn delete(&self, query: &Value) -> Result<T> {
        let filter = self.shape(query, ArchivedMode::IncludeAll);
        debug!(table = self.backend.name(), operation = %Operation::Delete, filter = %filter, "delete");

        match self.backend.delete_one(self.session(), &filter).await {
            Ok(Some(record)) => typed(record),
            Ok(None) => Err(self.not_found(Operation::Delete)),
            Err(err) => Err(self.lift(Operation::Delete, err)),
        }
    }

    pub async fn delete_many(&self, query: &Value) -> Result<u64> {
        let filter = self.shape(query, ArchivedMode::IncludeAll);
        debug!(table = self.backend.name(), operation = %Operation::Delete, filter = %filter, "delete_many");
        Ok(self.backend.delete_many(self.session(), &filter).await?)
    }

    // ========================================
    // Helpers
    // ========================================

    fn shape(&self, query: &Value, mode: ArchivedMode) -> Value {
        mode.apply(query, &self.config.schema.deleted_column)
    }

    fn prepare_patch<A: Serialize + ?Sized>(&self, patch: &A) -> Result<Map<String, Value>> {
        let schema = &self.config.schema;
        let mut record = Record::from_serializable(patch).map_err(DatabaseError::from)?;
        record.remove(&schema.id_column);
        record.remove(&schema.created_column);
        record.set(schema.updated_column.as_str(), now_timestamp());
        Ok(record.into_map())
    }

    fn not_found(&self, operation: Operation) -> RepositoryError {
        RepositoryError::not_found(self.backend.name(), operation)
    }

    /// A backend reporting a missing row becomes NotFound with the backend
    /// error as its cause; anything else passes through.
    fn lift(&self, operation: Operation, err: DatabaseError) -> RepositoryError {
        match err {
            DatabaseError::Sqlx(sqlx::Error::RowNotFound) => {
                RepositoryError::not_found_caused_by(self.backend.name(), operation, err)
            }
            other => RepositoryError::Database(other),
        }
    }
}

fn typed<T: DeserializeOwned>(record: Record) -> Result<T> {
    Ok(record.into_typed().map_err(DatabaseError::from)?)
}
