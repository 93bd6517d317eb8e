//! Request-level options and paged results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Per-call toggles. Nothing here mutates shared state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Language code activating translation fallback
    pub language: Option<String>,

    /// Read data as it was at this instant
    pub as_of: Option<DateTime<Utc>>,

    pub use_paging: bool,

    /// 1-based page number
    pub page_number: i64,

    pub page_size: i64,

    /// Property to order by; ignored unless it names a base property
    pub order_by: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn paged(mut self, page_number: i64, page_size: i64) -> Self {
        self.use_paging = true;
        self.page_number = page_number;
        self.page_size = page_size;
        self
    }

    pub fn order_by(mut self, property: impl Into<String>) -> Self {
        self.order_by = Some(property.into());
        self
    }

    /// Page size, falling back to the default for non-positive values.
    pub fn limit(&self) -> i64 {
        if self.page_size > 0 {
            self.page_size
        } else {
            DEFAULT_PAGE_SIZE
        }
    }

    pub fn offset(&self) -> i64 {
        self.limit() * (self.page_number.max(1) - 1)
    }

    /// Language only counts when it is non-empty.
    pub fn active_language(&self) -> Option<&str> {
        self.language.as_deref().filter(|l| !l.is_empty())
    }
}

/// Paging metadata reported with every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageInfo {
    pub total_items: i64,
    pub page_size: i64,
    pub page_number: i64,
    pub page_count: i64,
}

impl PageInfo {
    pub fn single_page(items: usize) -> Self {
        let total = items as i64;
        Self {
            total_items: total,
            page_size: total,
            page_number: 1,
            page_count: 1,
        }
    }

    pub fn paged(total_items: i64, page_size: i64, page_number: i64) -> Self {
        let page_count = if page_size > 0 {
            (total_items + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            total_items,
            page_size,
            page_number,
            page_count,
        }
    }
}

/// Items plus paging metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult<T> {
    pub items: Vec<T>,
    pub page: PageInfo,
}

impl<T> QueryResult<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            page: PageInfo::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> IntoIterator for QueryResult<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
