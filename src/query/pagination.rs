use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::{AppConfig, PaginationConfig};
use crate::database::backend::{FindOptions, StorageBackend};
use crate::database::manager::DatabaseError;
use crate::database::record::Record;
use crate::filter::{FilterError, FilterOrder, SortKey};
use crate::query::archived::Archived;

/// A page request as it arrives from callers.
///
/// `page` is 1-based. `page`, `limit` and `skip` accept numbers or numeric
/// strings; anything else counts as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationRequest {
    #[serde(default)]
    pub query: Value,
    #[serde(default, deserialize_with = "lenient_number")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub skip: Option<i64>,
    #[serde(default)]
    pub sort: Option<Value>,
    #[serde(default)]
    pub archived: Archived,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
}

impl PaginationRequest {
    pub fn new(query: Value) -> Self {
        Self { query, ..Default::default() }
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn archived(mut self, archived: impl Into<Archived>) -> Self {
        self.archived = archived.into();
        self
    }

    pub fn projection(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(to_number))
}

/// Numbers and numeric strings become integers (fractions truncated).
pub fn to_number(value: &Value) -> Option<i64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then(|| n.trunc() as i64)
}

/// Normalized page window: 0-based page index, page size and row offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub index: u64,
    pub limit: u64,
    pub offset: u64,
}

impl Pagination {
    pub fn from_request(request: &PaginationRequest, config: &PaginationConfig) -> Self {
        let default_limit = config.default_limit.max(1);
        let mut limit = match request.limit {
            Some(n) if n > 0 => n as u64,
            _ => default_limit,
        };
        if let Some(max) = config.max_limit {
            if limit > max {
                tracing::warn!("Limit {} exceeds max {}, capping to max", limit, max);
                limit = max.max(1);
            }
        }

        match request.skip {
            Some(skip) => {
                let offset = skip.max(0) as u64;
                Self { index: offset / limit, limit, offset }
            }
            None => {
                let index = request.page.map_or(0, |p| p.saturating_sub(1).max(0) as u64);
                // Offsets are bound as BIGINT
                let offset = index.saturating_mul(limit).min(i64::MAX as u64);
                Self { index, limit, offset }
            }
        }
    }

    /// Page links for a page that returned `returned` rows out of `total`.
    pub fn page_info(&self, returned: usize, total: u64) -> PageInfo {
        let current = self.index + 1;
        PageInfo {
            current,
            prev: (self.index > 0).then_some(self.index),
            next: (self.offset.saturating_add(returned as u64) < total).then_some(current + 1),
        }
    }
}

pub fn page_count(total: u64, limit: u64) -> u64 {
    if limit == 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub current: u64,
    pub next: Option<u64>,
    pub prev: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub pages: u64,
    pub page: PageInfo,
    pub sort: Vec<SortKey>,
}

impl<T> PaginatedResult<T> {
    pub fn new(data: Vec<T>, total: u64, pagination: &Pagination, sort: Vec<SortKey>) -> Self {
        let page = pagination.page_info(data.len(), total);
        Self {
            data,
            total,
            limit: pagination.limit,
            offset: pagination.offset,
            pages: page_count(total, pagination.limit),
            page,
            sort,
        }
    }

    pub fn try_map<U, E, F>(self, f: F) -> Result<PaginatedResult<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        Ok(PaginatedResult {
            data: self.data.into_iter().map(f).collect::<Result<Vec<_>, E>>()?,
            total: self.total,
            limit: self.limit,
            offset: self.offset,
            pages: self.pages,
            page: self.page,
            sort: self.sort,
        })
    }
}

/// Requested sort, or the configured default when none (or an empty one) is given.
pub fn resolve_sort(sort: Option<&Value>, default_sort: &str) -> Result<Vec<SortKey>, FilterError> {
    let keys = match sort {
        Some(requested) => FilterOrder::validate_and_parse(requested)?,
        None => vec![],
    };
    if keys.is_empty() {
        FilterOrder::validate_and_parse(&Value::String(default_sort.to_string()))
    } else {
        Ok(keys)
    }
}

/// Run one page of a listing against a backend.
///
/// The count and the page of rows are independent reads issued concurrently;
/// without a session they may observe different states under concurrent
/// writes.
pub async fn paginate<B>(
    backend: &B,
    session: Option<&B::Session>,
    request: &PaginationRequest,
    config: &AppConfig,
) -> Result<PaginatedResult<Record>, DatabaseError>
where
    B: StorageBackend + ?Sized,
{
    let pagination = Pagination::from_request(request, &config.pagination);
    let sort = resolve_sort(request.sort.as_ref(), &config.schema.default_sort)?;
    let filter = request
        .archived
        .listing_mode()
        .apply(&request.query, &config.schema.deleted_column);
    let options = FindOptions::sorted(sort.clone())
        .page(pagination.limit, pagination.offset)
        .projection(request.projection.clone());

    tracing::debug!(
        table = backend.name(),
        page = pagination.index + 1,
        limit = pagination.limit,
        offset = pagination.offset,
        "paginate"
    );

    let (total, rows) = futures::try_join!(
        backend.count(session, &filter),
        backend.find(session, &filter, &options)
    )?;

    Ok(PaginatedResult::new(rows, total, &pagination, sort))
}
