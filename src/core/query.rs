//! Query construction and pagination utilities

use crate::core::error::ManagerResult;
use crate::core::filter::Condition;
use crate::core::manager::{Manager, SortKey};
use crate::core::registry::FilterRegistry;
use serde::Serialize;
use serde_json::Value;

/// Default number of items per page
pub const DEFAULT_PER_PAGE: usize = 20;

/// Upper bound applied to `per_page`
pub const MAX_PER_PAGE: usize = 100;

/// Number of items before the first one of `page`, saturating on huge pages
pub fn page_offset(page: usize, per_page: usize) -> usize {
    page.max(1).saturating_sub(1).saturating_mul(per_page)
}

/// A page window over a result sequence
///
/// `items` never holds more than `per_page` entries and `total` is the size
/// of the full (filtered) sequence, whichever page was requested.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pagination<T> {
    pub items: Vec<T>,
    /// Page number (starts at 1)
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Pagination<T> {
    /// Wrap a page fetched natively by a backend
    pub fn new(items: Vec<T>, page: usize, per_page: usize, total: usize) -> Self {
        Self {
            items,
            page: page.max(1),
            per_page: per_page.max(1),
            total,
        }
    }

    /// Slice a fully materialized list
    pub fn from_list(items: Vec<T>, page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let total = items.len();
        let start = page_offset(page, per_page);

        let items = items.into_iter().skip(start).take(per_page).collect();
        Self {
            items,
            page,
            per_page,
            total,
        }
    }

    /// Total number of pages
    pub fn pages(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page)
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn meta(&self) -> PaginationMeta {
        PaginationMeta::new(self.page, self.per_page, self.total)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Pagination<U> {
        Pagination {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

/// Pagination metadata
#[derive(Debug, Serialize, PartialEq)]
pub struct PaginationMeta {
    /// Current page number (starts at 1)
    pub page: usize,

    /// Number of items per page
    pub per_page: usize,

    /// Total number of items (after filters)
    pub total: usize,

    /// Total number of pages
    pub total_pages: usize,

    /// Whether there is a next page
    pub has_next: bool,

    /// Whether there is a previous page
    pub has_prev: bool,
}

impl PaginationMeta {
    /// Create pagination metadata from calculation
    pub fn new(page: usize, per_page: usize, total: usize) -> Self {
        // Ensure per_page is at least 1 to avoid division by zero
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total_pages = if total == 0 { 0 } else { total.div_ceil(per_page) };
        let start = page_offset(page, per_page);

        Self {
            page,
            per_page,
            total,
            total_pages,
            has_next: start.saturating_add(per_page) < total,
            has_prev: page > 1,
        }
    }
}

/// Filter conditions, sort keys and page window for one listing
///
/// # Example
/// ```rust,ignore
/// let page = Query::new()
///     .where_json(manager.filters(), &json!({"age": {"$gte": 21}}))?
///     .sort(SortKey::desc("age"))
///     .page(2)
///     .per_page(10)
///     .run(&manager)
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub sort: Vec<SortKey>,
    page: usize,
    per_page: usize,
    max_per_page: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
            sort: Vec::new(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            max_per_page: MAX_PER_PAGE,
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Resolve a decoded `where` object against a filter registry
    pub fn where_json(mut self, filters: &FilterRegistry, where_: &Value) -> ManagerResult<Self> {
        self.conditions.extend(filters.conditions(where_)?);
        Ok(self)
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn max_per_page(mut self, max_per_page: usize) -> Self {
        self.max_per_page = max_per_page.max(1);
        self
    }

    /// Get page number, ensuring minimum of 1
    pub fn current_page(&self) -> usize {
        self.page.max(1)
    }

    /// Get per_page, clamped to `1..=max_per_page`
    pub fn limit(&self) -> usize {
        self.per_page.clamp(1, self.max_per_page)
    }

    pub async fn run<M: Manager + ?Sized>(
        &self,
        manager: &M,
    ) -> ManagerResult<Pagination<crate::core::manager::Item>> {
        manager
            .paginated_instances(self.current_page(), self.limit(), &self.conditions, &self.sort)
            .await
    }
}
