pub mod backend;
pub mod manager;
pub mod memory;
pub mod query_builder;
pub mod record;
pub mod repository;
pub mod sql;

pub use backend::{FindOptions, StorageBackend};
pub use manager::{DatabaseError, DatabaseManager};
pub use memory::{MemoryBackend, MemorySession};
pub use record::{Record, RecordError};
pub use repository::{ListOptions, ReadOptions, Repository};
pub use sql::{SqlBackend, SqlSession};
