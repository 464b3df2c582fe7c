//! Runs against Postgres when `DATABASE_URL` is set; skipped otherwise.
//!
//! Each test creates and drops its own table.

mod common;

use std::sync::Arc;

use anyhow::Result;
use paged_repository::config::AppConfig;
use paged_repository::database::DatabaseManager;
use paged_repository::{PageInfo, PaginationRequest, ReadOptions, Repository, SqlBackend};
use serde_json::json;
use sqlx::PgPool;

async fn pool() -> Result<Option<PgPool>> {
    let _ = dotenvy::dotenv();
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set; skipping");
        return Ok(None);
    }
    DatabaseManager::health_check().await?;
    Ok(Some(DatabaseManager::default_pool().await?))
}

async fn create_table(pool: &PgPool, table: &str) -> Result<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table)).execute(pool).await?;
    sqlx::query(&format!(
        "CREATE TABLE \"{}\" (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            rank BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            deleted_at TIMESTAMPTZ
        )",
        table
    ))
    .execute(pool)
    .await?;
    Ok(())
}

async fn drop_table(pool: &PgPool, table: &str) -> Result<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table)).execute(pool).await?;
    Ok(())
}

fn repository(pool: &PgPool, table: &str) -> Result<Repository<common::Widget, SqlBackend>> {
    common::init_tracing();
    let backend = SqlBackend::new(pool.clone(), table)?;
    Ok(Repository::with_config(backend, AppConfig::development()))
}

#[tokio::test]
async fn crud_and_pagination_on_postgres() -> Result<()> {
    let Some(pool) = pool().await? else { return Ok(()) };
    let table = "paged_repository_widgets_crud";
    create_table(&pool, table).await?;
    let repo = repository(&pool, table)?;

    for i in 0..45 {
        repo.create(&json!({ "name": format!("w-{:03}", i), "rank": i })).await?;
    }

    let first = repo.paginate(&PaginationRequest::new(json!({})).page(1).limit(20)).await?;
    assert_eq!((first.total, first.pages, first.data.len()), (45, 3, 20));
    assert_eq!(first.page, PageInfo { current: 1, prev: None, next: Some(2) });

    let last = repo.paginate(&PaginationRequest::new(json!({})).page(3).limit(20)).await?;
    assert_eq!(last.data.len(), 5);
    assert_eq!(last.page.next, None);

    let target = &first.data[0];
    let updated = repo
        .update(&json!({ "id": target.id }), &json!({ "name": "renamed" }), false)
        .await?;
    assert_eq!(updated.name, "renamed");
    assert!(updated.updated_at > updated.created_at);

    repo.soft_delete(&json!({ "id": target.id })).await?;
    assert!(repo.by_id(target.id.as_str(), ReadOptions::default()).await.unwrap_err().is_not_found());
    assert!(repo.by_id(target.id.as_str(), ReadOptions::archived(true)).await?.deleted_at.is_some());
    assert_eq!(repo.count(&json!({}), false).await?, 44);
    assert_eq!(repo.count_distinct("name", &json!({ "rank": { "$lt": 10 } }), true).await?, 10);

    assert_eq!(repo.delete_many(&json!({ "rank": { "$gte": 40 } })).await?, 5);
    assert!(repo.by_id("missing-id", ReadOptions::default()).await.unwrap_err().is_not_found());

    drop_table(&pool, table).await
}

#[tokio::test]
async fn session_rollback_on_postgres() -> Result<()> {
    let Some(pool) = pool().await? else { return Ok(()) };
    let table = "paged_repository_widgets_session";
    create_table(&pool, table).await?;
    let mut repo = repository(&pool, table)?;

    let session = Arc::new(repo.backend().begin_session().await?);
    repo.connect_db_session(Arc::clone(&session));
    repo.create(&json!({ "name": "inside" })).await?;
    assert_eq!(repo.count(&json!({}), false).await?, 1);

    session.rollback().await?;
    repo.disconnect_db_session();
    assert_eq!(repo.count(&json!({}), false).await?, 0);

    drop_table(&pool, table).await
}
