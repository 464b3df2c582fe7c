#![allow(dead_code)]

use std::sync::Once;

use anyhow::Result;
use paged_repository::config::AppConfig;
use paged_repository::{MemoryBackend, Repository};
use serde::{Deserialize, Serialize};
use serde_json::json;

static TRACING: Once = Once::new();

/// Route library tracing to the test output; `RUST_LOG` narrows it
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rank: i64,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

pub type Widgets = Repository<Widget, MemoryBackend>;

/// Fresh repository over an empty in-memory collection
pub fn widgets() -> Widgets {
    init_tracing();
    Repository::with_config(MemoryBackend::new("widgets"), AppConfig::development())
}

/// Insert `count` widgets named `w-000`, `w-001`, ... with ranks 0, 1, ...
pub async fn seed(repo: &Widgets, count: usize) -> Result<Vec<Widget>> {
    let mut created = Vec::with_capacity(count);
    for i in 0..count {
        let widget = repo
            .create(&json!({ "name": format!("w-{:03}", i), "rank": i }))
            .await?;
        created.push(widget);
    }
    Ok(created)
}
