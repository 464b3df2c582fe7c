pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod mapping;
pub mod query;
pub mod types;

pub use database::{
    DatabaseError, FindOptions, ListOptions, MemoryBackend, MemorySession, ReadOptions, Record, Repository,
    SqlBackend, SqlSession, StorageBackend,
};
pub use error::{RepositoryError, Result};
pub use mapping::FieldMapping;
pub use query::{Archived, ArchivedMode, PageInfo, PaginatedResult, PaginationRequest};
pub use types::Operation;
