mod common;

use anyhow::Result;
use paged_repository::config::{AppConfig, SchemaConfig};
use paged_repository::{FieldMapping, ListOptions, MemoryBackend, PaginationRequest, ReadOptions, Record, Repository};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Task {
    id: String,
    title: String,
    owner: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

fn tasks() -> (Repository<Task, MemoryBackend>, MemoryBackend) {
    common::init_tracing();
    let mut config = AppConfig::development();
    config.schema = SchemaConfig {
        id_column: "id".to_string(),
        created_column: "createdAt".to_string(),
        updated_column: "updatedAt".to_string(),
        deleted_column: "deletedAt".to_string(),
        default_sort: "createdAt desc".to_string(),
    };
    let mapping = FieldMapping::snake_case(&["createdAt", "updatedAt", "deletedAt"])
        .with_reference("owner")
        .with("id", "_id");
    let backend = MemoryBackend::new("tasks").with_mapping(mapping);
    (Repository::with_config(backend.clone(), config), backend)
}

#[tokio::test]
async fn stores_physical_names_and_returns_logical_ones() -> Result<()> {
    let (repo, backend) = tasks();
    let task = repo.create(&json!({ "title": "write", "owner": "u-1" })).await?;
    assert_eq!(task.owner.as_deref(), Some("u-1"));

    let stored: Vec<Record> = backend.documents().await;
    let doc = &stored[0];
    assert_eq!(doc.get_str("_id"), Some(task.id.as_str()));
    assert_eq!(doc.get_str("owner_id"), Some("u-1"));
    assert!(doc.contains("created_at"));
    assert!(!doc.contains("createdAt"));
    Ok(())
}

#[tokio::test]
async fn queries_use_logical_names() -> Result<()> {
    let (repo, _) = tasks();
    for (title, owner) in [("a", "u-1"), ("b", "u-2"), ("c", "u-1")] {
        repo.create(&json!({ "title": title, "owner": owner })).await?;
    }

    assert_eq!(repo.count(&json!({ "owner": "u-1" }), false).await?, 2);
    let sorted = repo
        .all(&json!({ "$not": { "owner": "u-2" } }), ListOptions::default().sort(json!({ "title": "desc" })))
        .await?;
    let titles: Vec<_> = sorted.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["c", "a"]);

    let deleted = repo.soft_delete(&json!({ "title": "a" })).await?;
    assert!(deleted.deleted_at.is_some());
    assert!(repo.by_query(&json!({ "title": "a" }), ReadOptions::default()).await.unwrap_err().is_not_found());

    let page = repo.paginate(&PaginationRequest::new(json!({ "owner": "u-1" }))).await?;
    assert_eq!(page.total, 1);
    Ok(())
}
