use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::database::manager::DatabaseError;
use crate::database::record::Record;
use crate::filter::SortKey;

/// Options for `find`-style reads
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub sort: Vec<SortKey>,
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    pub fn sorted(sort: Vec<SortKey>) -> Self {
        Self { sort, ..Default::default() }
    }

    pub fn page(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn projection(mut self, projection: Option<Vec<String>>) -> Self {
        self.projection = projection;
        self
    }
}

/// Capability interface every persistence backend provides.
///
/// Filters are where-clauses in the JSON filter language (see
/// [`crate::filter`]) using logical field names; each backend translates them
/// through its own field mapping. Every method accepts the session the caller
/// has attached, if any, and runs inside it. Isolation is entirely the
/// backend's business.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    type Session: Send + Sync;

    /// Name of the table or collection, used in logs and error messages
    fn name(&self) -> &str;

    async fn count(&self, session: Option<&Self::Session>, filter: &Value) -> Result<u64, DatabaseError>;

    async fn find(
        &self,
        session: Option<&Self::Session>,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Vec<Record>, DatabaseError>;

    async fn find_one(
        &self,
        session: Option<&Self::Session>,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Option<Record>, DatabaseError>;

    async fn insert(&self, session: Option<&Self::Session>, attributes: Record) -> Result<Record, DatabaseError>;

    /// Patch the first matching record and return it as stored afterwards
    async fn update_one(
        &self,
        session: Option<&Self::Session>,
        filter: &Value,
        patch: &Map<String, Value>,
    ) -> Result<Option<Record>, DatabaseError>;

    /// Patch every matching record, returning how many were affected
    async fn update_many(
        &self,
        session: Option<&Self::Session>,
        filter: &Value,
        patch: &Map<String, Value>,
    ) -> Result<u64, DatabaseError>;

    /// Remove the first matching record and return it
    async fn delete_one(&self, session: Option<&Self::Session>, filter: &Value) -> Result<Option<Record>, DatabaseError>;

    async fn delete_many(&self, session: Option<&Self::Session>, filter: &Value) -> Result<u64, DatabaseError>;

    async fn distinct(
        &self,
        session: Option<&Self::Session>,
        field: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, DatabaseError>;

    /// Number of distinct non-null values of `field`
    async fn count_distinct(
        &self,
        session: Option<&Self::Session>,
        field: &str,
        filter: &Value,
    ) -> Result<u64, DatabaseError> {
        let values = self.distinct(session, field, filter).await?;
        Ok(values.iter().filter(|v| !v.is_null()).count() as u64)
    }
}
