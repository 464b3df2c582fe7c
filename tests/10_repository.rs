mod common;

use anyhow::Result;
use paged_repository::{ListOptions, ReadOptions, Record};
use serde_json::json;

use common::{seed, widgets};

#[tokio::test]
async fn create_then_read_back() -> Result<()> {
    let repo = widgets();
    let created = repo.create(&json!({ "name": "a" })).await?;

    assert!(!created.id.is_empty());
    assert_eq!(created.created_at, created.updated_at);
    assert_eq!(created.deleted_at, None);

    let found = repo.by_id(created.id.as_str(), ReadOptions::default()).await?;
    assert_eq!(found, created);

    let found = repo.by_query(&json!({ "name": "a" }), ReadOptions::default()).await?;
    assert_eq!(found.id, created.id);
    Ok(())
}

#[tokio::test]
async fn missing_id_is_not_found() -> Result<()> {
    let repo = widgets();
    seed(&repo, 3).await?;

    let err = repo.by_id("missing-id", ReadOptions::default()).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {}", err);
    assert_eq!(err.to_string(), "Record not found in widgets (select)");
    Ok(())
}

#[tokio::test]
async fn update_advances_updated_at() -> Result<()> {
    let repo = widgets();
    let created = repo.create(&json!({ "name": "a" })).await?;
    let updated = repo.update(&json!({ "id": created.id }), &json!({ "name": "b" }), false).await?;

    assert_eq!(updated.name, "b");
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at > updated.created_at, "{} <= {}", updated.updated_at, updated.created_at);
    Ok(())
}

#[tokio::test]
async fn update_many_reports_affected_rows() -> Result<()> {
    let repo = widgets();
    seed(&repo, 10).await?;

    let affected = repo
        .update_many(&json!({ "rank": { "$lt": 4 } }), &json!({ "name": "low" }), false)
        .await?;
    assert_eq!(affected, 4);
    assert_eq!(repo.count(&json!({ "name": "low" }), false).await?, 4);
    Ok(())
}

#[tokio::test]
async fn all_honours_sort_limit_and_offset() -> Result<()> {
    let repo = widgets();
    seed(&repo, 10).await?;

    let options = ListOptions::default().sort(json!("rank desc")).limit(3).offset(2);
    let ranks: Vec<i64> = repo.all(&json!({}), options).await?.into_iter().map(|w| w.rank).collect();
    assert_eq!(ranks, vec![7, 6, 5]);

    let filtered = repo
        .all(&json!({ "$or": [{ "rank": 1 }, { "name": { "$like": "w-00%" } }] }), ListOptions::default())
        .await?;
    assert_eq!(filtered.len(), 10);
    Ok(())
}

#[tokio::test]
async fn projection_limits_fields() -> Result<()> {
    let repo = widgets();
    seed(&repo, 2).await?;

    let untyped = paged_repository::Repository::<Record, _>::with_config(repo.backend().clone(), repo.config().clone());
    let rows = untyped
        .all(&json!({}), ListOptions::default().projection(vec!["name".to_string()]))
        .await?;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.contains("name") && !r.contains("id")));
    Ok(())
}

#[tokio::test]
async fn counting_helpers() -> Result<()> {
    let repo = widgets();
    seed(&repo, 6).await?;
    repo.update_many(&json!({ "rank": { "$in": [0, 1, 2] } }), &json!({ "name": "dup" }), false)
        .await?;

    assert_eq!(repo.count(&json!({}), false).await?, 6);
    assert!(repo.exists(&json!({ "name": "dup" }), false).await?);
    assert!(!repo.exists(&json!({ "name": "nope" }), false).await?);

    let names = repo.distinct("name", &json!({}), false).await?;
    assert_eq!(names.len(), 4);
    assert_eq!(repo.count_distinct("name", &json!({}), false).await?, 4);
    assert_eq!(repo.count_distinct("name", &json!({ "rank": { "$gte": 3 } }), false).await?, 3);
    Ok(())
}

#[tokio::test]
async fn delete_is_permanent() -> Result<()> {
    let repo = widgets();
    let created = seed(&repo, 3).await?;

    let removed = repo.delete(&json!({ "id": created[0].id })).await?;
    assert_eq!(removed.id, created[0].id);
    assert!(repo.by_id(created[0].id.as_str(), ReadOptions::archived(true)).await.unwrap_err().is_not_found());

    assert_eq!(repo.delete_many(&json!({})).await?, 2);
    assert_eq!(repo.count(&json!({}), true).await?, 0);
    Ok(())
}

#[tokio::test]
async fn malformed_filters_pass_through() -> Result<()> {
    let repo = widgets();
    seed(&repo, 1).await?;

    let err = repo.by_query(&json!({ "rank": { "$bogus": 1 } }), ReadOptions::default()).await.unwrap_err();
    assert!(!err.is_not_found());
    Ok(())
}
