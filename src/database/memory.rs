use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::config;
use crate::database::backend::{FindOptions, StorageBackend};
use crate::database::manager::DatabaseError;
use crate::database::record::Record;
use crate::filter::filter_match::{compare_records, values_equal};
use crate::filter::FilterMatch;
use crate::mapping::FieldMapping;

/// A working copy of a [`MemoryBackend`] store.
///
/// Operations run through the session see and modify only the copy until
/// `commit` publishes it back, replacing whatever the store held. `rollback`
/// drops it.
pub struct MemorySession {
    store: Arc<RwLock<Vec<Record>>>,
    working: Mutex<Option<Vec<Record>>>,
}

impl MemorySession {
    pub async fn commit(&self) -> Result<(), DatabaseError> {
        let docs = self.working.lock().await.take().ok_or_else(Self::finished)?;
        *self.store.write().await = docs;
        debug!("memory session committed");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), DatabaseError> {
        self.working.lock().await.take().ok_or_else(Self::finished)?;
        debug!("memory session rolled back");
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        self.working.lock().await.is_some()
    }

    fn finished() -> DatabaseError {
        DatabaseError::Session("session already finished".to_string())
    }
}

/// In-process document collection evaluating the same filter language as
/// the SQL backend.
///
/// Documents are held under their physical field names. Clones share the
/// same underlying store.
#[derive(Clone)]
pub struct MemoryBackend {
    name: String,
    store: Arc<RwLock<Vec<Record>>>,
    mapping: FieldMapping,
    id_field: String,
    matcher: Arc<FilterMatch>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: Arc::new(RwLock::new(Vec::new())),
            mapping: FieldMapping::new(),
            id_field: config().schema.id_column.clone(),
            matcher: Arc::new(FilterMatch::new(config().filter.max_nested_depth)),
        }
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Logical name of the identity field, kept unique on insert
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub async fn begin_session(&self) -> MemorySession {
        let snapshot = self.store.read().await.clone();
        debug!(collection = %self.name, documents = snapshot.len(), "memory session started");
        MemorySession {
            store: Arc::clone(&self.store),
            working: Mutex::new(Some(snapshot)),
        }
    }

    /// Raw stored documents, physical names included
    pub async fn documents(&self) -> Vec<Record> {
        self.store.read().await.clone()
    }

    async fn read<R>(
        &self,
        session: Option<&MemorySession>,
        f: impl FnOnce(&[Record]) -> Result<R, DatabaseError>,
    ) -> Result<R, DatabaseError> {
        match session {
            Some(session) => {
                let guard = session.working.lock().await;
                f(guard.as_deref().ok_or_else(MemorySession::finished)?)
            }
            None => {
                let docs = self.store.read().await;
                f(docs.as_slice())
            }
        }
    }

    async fn write<R>(
        &self,
        session: Option<&MemorySession>,
        f: impl FnOnce(&mut Vec<Record>) -> Result<R, DatabaseError>,
    ) -> Result<R, DatabaseError> {
        match session {
            Some(session) => {
                let mut guard = session.working.lock().await;
                f(guard.as_mut().ok_or_else(MemorySession::finished)?)
            }
            None => {
                let mut docs = self.store.write().await;
                f(&mut *docs)
            }
        }
    }

    /// Indices of the documents matching a logical filter, in store order
    fn matching(&self, docs: &[Record], filter: &Value) -> Result<Vec<usize>, DatabaseError> {
        let filter = self.mapping.map_filter(filter);
        let mut indices = Vec::new();
        for (i, doc) in docs.iter().enumerate() {
            if self.matcher.matches(&filter, doc.fields())? {
                indices.push(i);
            }
        }
        Ok(indices)
    }

    fn to_logical(&self, record: Record) -> Record {
        Record::from_map(self.mapping.record_to_logical(record.into_map()))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Session = MemorySession;

    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self, session: Option<&MemorySession>, filter: &Value) -> Result<u64, DatabaseError> {
        self.read(session, |docs| Ok(self.matching(docs, filter)?.len() as u64)).await
    }

    async fn find(
        &self,
        session: Option<&MemorySession>,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Vec<Record>, DatabaseError> {
        let sort = self.mapping.map_sort(&options.sort);
        let projection = options.projection.as_ref().map(|fields| self.mapping.map_fields(fields));
        self.read(session, |docs| {
            let mut matched: Vec<&Record> = self.matching(docs, filter)?.into_iter().map(|i| &docs[i]).collect();
            if !sort.is_empty() {
                matched.sort_by(|a, b| compare_records(a.fields(), b.fields(), &sort));
            }
            let offset = options.offset.unwrap_or(0) as usize;
            let limit = options.limit.map_or(usize::MAX, |l| l as usize);
            Ok(matched
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|doc| {
                    let doc = match &projection {
                        Some(fields) => doc.clone().project(fields),
                        None => doc.clone(),
                    };
                    self.to_logical(doc)
                })
                .collect())
        })
        .await
    }

    async fn find_one(
        &self,
        session: Option<&MemorySession>,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Option<Record>, DatabaseError> {
        let options = FindOptions { limit: Some(1), ..options.clone() };
        Ok(self.find(session, filter, &options).await?.into_iter().next())
    }

    async fn insert(&self, session: Option<&MemorySession>, attributes: Record) -> Result<Record, DatabaseError> {
        let doc = Record::from_map(self.mapping.record_to_physical(attributes.into_map()));
        let id_field = self.mapping.to_physical(&self.id_field);
        self.write(session, |docs| {
            if let Some(id) = doc.get(id_field).filter(|v| !v.is_null()) {
                if docs.iter().any(|d| d.get(id_field).map_or(false, |v| values_equal(v, id))) {
                    return Err(DatabaseError::QueryError(format!(
                        "duplicate key value for {} in {}",
                        id_field, self.name
                    )));
                }
            }
            docs.push(doc.clone());
            Ok(())
        })
        .await?;
        Ok(self.to_logical(doc))
    }

    async fn update_one(
        &self,
        session: Option<&MemorySession>,
        filter: &Value,
        patch: &Map<String, Value>,
    ) -> Result<Option<Record>, DatabaseError> {
        let patch = self.mapping.record_to_physical(patch.clone());
        let updated = self
            .write(session, |docs| {
                let first = self.matching(docs, filter)?.into_iter().next();
                Ok(first.map(|i| {
                    docs[i].apply_patch(&patch);
                    docs[i].clone()
                }))
            })
            .await?;
        Ok(updated.map(|doc| self.to_logical(doc)))
    }

    async fn update_many(
        &self,
        session: Option<&MemorySession>,
        filter: &Value,
        patch: &Map<String, Value>,
    ) -> Result<u64, DatabaseError> {
        let patch = self.mapping.record_to_physical(patch.clone());
        self.write(session, |docs| {
            let matched = self.matching(docs, filter)?;
            for &i in &matched {
                docs[i].apply_patch(&patch);
            }
            Ok(matched.len() as u64)
        })
        .await
    }

    async fn delete_one(&self, session: Option<&MemorySession>, filter: &Value) -> Result<Option<Record>, DatabaseError> {
        let removed = self
            .write(session, |docs| {
                let first = self.matching(docs, filter)?.into_iter().next();
                Ok(first.map(|i| docs.remove(i)))
            })
            .await?;
        Ok(removed.map(|doc| self.to_logical(doc)))
    }

    async fn delete_many(&self, session: Option<&MemorySession>, filter: &Value) -> Result<u64, DatabaseError> {
        self.write(session, |docs| {
            let matched = self.matching(docs, filter)?;
            let mut index = 0;
            docs.retain(|_| {
                let keep = !matched.contains(&index);
                index += 1;
                keep
            });
            Ok(matched.len() as u64)
        })
        .await
    }

    async fn distinct(
        &self,
        session: Option<&MemorySession>,
        field: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, DatabaseError> {
        let field = self.mapping.to_physical(field);
        self.read(session, |docs| {
            let mut values: Vec<Value> = Vec::new();
            for i in self.matching(docs, filter)? {
                let value = docs[i].get(field).cloned().unwrap_or(Value::Null);
                if !values.iter().any(|v| values_equal(v, &value)) {
                    values.push(value);
                }
            }
            Ok(values)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SortKey;
    use serde_json::json;

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new("widgets");
        for (id, name, rank) in [("a", "bolt", 3), ("b", "nut", 1), ("c", "gear", 2), ("d", "nut", 5)] {
            let record = Record::from_json(json!({ "id": id, "name": name, "rank": rank })).unwrap();
            backend.insert(None, record).await.unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn finds_sorted_pages() {
        let backend = seeded().await;
        let options = FindOptions::sorted(vec![SortKey::desc("rank")]).page(2, 1);
        let rows = backend.find(None, &json!({}), &options).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get_str("id").unwrap()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn rejects_duplicate_ids() {
        let backend = seeded().await;
        let duplicate = Record::from_json(json!({ "id": "a" })).unwrap();
        assert!(matches!(backend.insert(None, duplicate).await, Err(DatabaseError::QueryError(_))));
    }

    #[tokio::test]
    async fn updates_and_deletes_first_match_only() {
        let backend = seeded().await;
        let patch = json!({ "rank": 9 });
        let updated = backend
            .update_one(None, &json!({ "name": "nut" }), patch.as_object().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.get_str("id"), Some("b"));
        assert_eq!(backend.count(None, &json!({ "rank": 9 })).await.unwrap(), 1);

        let removed = backend.delete_one(None, &json!({ "name": "nut" })).await.unwrap().unwrap();
        assert_eq!(removed.get_str("id"), Some("b"));
        assert_eq!(backend.delete_many(None, &json!({ "rank": { "$gte": 3 } })).await.unwrap(), 2);
        assert_eq!(backend.count(None, &Value::Null).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn distinct_values_in_first_seen_order() {
        let backend = seeded().await;
        let names = backend.distinct(None, "name", &json!({})).await.unwrap();
        assert_eq!(names, vec![json!("bolt"), json!("nut"), json!("gear")]);
        assert_eq!(backend.count_distinct(None, "missing", &json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stores_physical_names() {
        let backend = MemoryBackend::new("widgets").with_mapping(FieldMapping::snake_case(&["ownerName"]));
        let record = Record::from_json(json!({ "id": "a", "ownerName": "ann" })).unwrap();
        let stored = backend.insert(None, record).await.unwrap();
        assert_eq!(stored.get_str("ownerName"), Some("ann"));
        assert_eq!(backend.documents().await[0].get_str("owner_name"), Some("ann"));
        assert_eq!(backend.count(None, &json!({ "ownerName": "ann" })).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn session_isolates_until_commit() {
        let backend = seeded().await;
        let session = backend.begin_session().await;
        backend.delete_many(Some(&session), &json!({})).await.unwrap();
        assert_eq!(backend.count(Some(&session), &json!({})).await.unwrap(), 0);
        assert_eq!(backend.count(None, &json!({})).await.unwrap(), 4);

        session.commit().await.unwrap();
        assert_eq!(backend.count(None, &json!({})).await.unwrap(), 0);
        assert!(matches!(session.rollback().await, Err(DatabaseError::Session(_))));
        assert!(backend.count(Some(&session), &json!({})).await.is_err());
    }
}
