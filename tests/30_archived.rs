mod common;

use anyhow::Result;
use paged_repository::{ArchivedMode, ListOptions, PaginationRequest, ReadOptions};
use serde_json::json;

use common::{seed, widgets};

#[tokio::test]
async fn soft_deleted_records_need_archived_lookup() -> Result<()> {
    let repo = widgets();
    repo.create(&json!({ "id": "x", "name": "a" })).await?;

    let deleted = repo.soft_delete(&json!({ "id": "x" })).await?;
    assert!(deleted.deleted_at.is_some());

    let err = repo.by_id("x", ReadOptions::default()).await.unwrap_err();
    assert!(err.is_not_found());

    let found = repo.by_id("x", ReadOptions::archived(true)).await?;
    assert_eq!(found.deleted_at, deleted.deleted_at);

    // "false" as text is not archived
    assert!(repo.by_id("x", ReadOptions::archived("false")).await.unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
async fn soft_delete_twice_then_hard_delete() -> Result<()> {
    let repo = widgets();
    repo.create(&json!({ "id": "x", "name": "a" })).await?;

    let first = repo.soft_delete(&json!({ "id": "x" })).await?;
    let second = repo.soft_delete(&json!({ "id": "x" })).await?;
    assert_eq!(first, second);

    repo.delete(&json!({ "id": "x" })).await?;
    let err = repo.soft_delete(&json!({ "id": "x" })).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn soft_delete_only_touches_deletion_timestamp() -> Result<()> {
    let repo = widgets();
    let created = repo.create(&json!({ "id": "x", "name": "a" })).await?;

    let deleted = repo.soft_delete(&json!({ "id": "x" })).await?;
    assert_eq!(deleted.updated_at, created.updated_at);
    assert_eq!(deleted.name, created.name);
    Ok(())
}

#[tokio::test]
async fn listings_widen_when_archived() -> Result<()> {
    let repo = widgets();
    seed(&repo, 10).await?;
    let affected = repo.soft_delete_many(&json!({ "rank": { "$lt": 3 } })).await?;
    assert_eq!(affected, 3);

    // Already deleted records are not stamped again
    assert_eq!(repo.soft_delete_many(&json!({ "rank": { "$lt": 5 } })).await?, 2);

    assert_eq!(repo.count(&json!({}), false).await?, 5);
    assert_eq!(repo.count(&json!({}), true).await?, 10);
    assert_eq!(repo.count(&json!({}), ArchivedMode::OnlyDeleted).await?, 5);

    let live = repo.all(&json!({}), ListOptions::default()).await?;
    assert!(live.iter().all(|w| w.deleted_at.is_none()));
    let everything = repo.all(&json!({}), ListOptions::default().archived(true)).await?;
    assert_eq!(everything.len(), 10);

    let page = repo.paginate(&PaginationRequest::new(json!({})).archived("true")).await?;
    assert_eq!(page.total, 10);
    let page = repo.paginate(&PaginationRequest::new(json!({}))).await?;
    assert_eq!(page.total, 5);
    Ok(())
}

#[tokio::test]
async fn explicit_modes_override_context() -> Result<()> {
    let repo = widgets();
    seed(&repo, 4).await?;
    repo.soft_delete(&json!({ "rank": 0 })).await?;

    // IncludeAll lookups also see live records
    let live = repo
        .by_query(&json!({ "rank": 1 }), ReadOptions::archived(ArchivedMode::IncludeAll))
        .await?;
    assert_eq!(live.rank, 1);

    let deleted_only = repo.all(&json!({}), ListOptions::default().archived(ArchivedMode::OnlyDeleted)).await?;
    assert_eq!(deleted_only.len(), 1);
    assert_eq!(deleted_only[0].rank, 0);
    Ok(())
}

#[tokio::test]
async fn updates_skip_deleted_records() -> Result<()> {
    let repo = widgets();
    seed(&repo, 3).await?;
    repo.soft_delete(&json!({ "rank": 2 })).await?;

    let err = repo.update(&json!({ "rank": 2 }), &json!({ "name": "z" }), false).await.unwrap_err();
    assert!(err.is_not_found());
    let restored = repo
        .update(&json!({ "rank": 2 }), &json!({ "deleted_at": null }), true)
        .await?;
    assert!(restored.deleted_at.is_none());
    assert_eq!(repo.count(&json!({}), false).await?, 3);

    assert_eq!(repo.update_many(&json!({}), &json!({ "name": "n" }), false).await?, 3);
    Ok(())
}
