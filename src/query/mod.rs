//! Query shaping shared by every backend: soft-delete filtering and
//! pagination arithmetic.

pub mod archived;
pub mod pagination;

pub use archived::{Archived, ArchivedMode};
pub use pagination::{paginate, PageInfo, PaginatedResult, Pagination, PaginationRequest};
