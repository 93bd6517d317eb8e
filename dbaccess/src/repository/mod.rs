//! Repositories over registered entities
//!
//! - [`BasicRepository`]: one table, with translations and history
//! - [`ExtendedRepository`]: a base entity plus declared joins
//! - [`CrossRepository`]: two entities linked through a junction table

mod basic;
mod cross;
mod extended;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub use basic::{BasicRepository, HistoricalRecord};
pub use cross::CrossRepository;
pub use extended::ExtendedRepository;

use crate::error::{DbAccessError, Result};
use crate::orm::{GenericFilter, PageInfo, QueryResult, RequestOptions};

/// Read access shared by the basic and extended repositories.
#[async_trait]
pub trait EntityReader: Send + Sync {
    type Item: Send;

    async fn get(
        &self,
        filters: &[GenericFilter],
        options: &RequestOptions,
    ) -> Result<QueryResult<Self::Item>>;

    async fn get_by_id(&self, id: Uuid, options: &RequestOptions) -> Result<Option<Self::Item>>;
}

/// Paging metadata for a result set.
///
/// Paged queries carry the total in `_totalitems` on every row. A page past
/// the end has no rows and reports a total of zero.
pub(crate) fn page_info(
    entity: &'static str,
    rows: &[PgRow],
    items: usize,
    options: &RequestOptions,
) -> Result<PageInfo> {
    let total = rows.first().map(|row| row.try_get::<i64, _>("_totalitems"));
    paging(entity, total, items, options)
}

fn paging(
    entity: &'static str,
    total: Option<std::result::Result<i64, sqlx::Error>>,
    items: usize,
    options: &RequestOptions,
) -> Result<PageInfo> {
    if !options.use_paging {
        return Ok(PageInfo::single_page(items));
    }
    let total = match total {
        Some(total) => total.map_err(|source| DbAccessError::Materialize { entity, source })?,
        None => 0,
    };
    Ok(PageInfo::paged(total, options.limit(), options.page_number.max(1)))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_unpaged_reads_are_a_single_page() {
        let page = paging("Role", None, 3, &RequestOptions::new()).unwrap();
        assert_eq!(page, PageInfo::single_page(3));
    }

    #[test]
    fn test_page_past_the_end_reports_zero_total() {
        let options = RequestOptions::new().paged(4, 10);
        let page = paging("Role", None, 0, &options).unwrap();
        assert_eq!(page.total_items, 0);
        assert_eq!(page.page_number, 4);
    }

    #[test]
    fn test_undecodable_total_is_an_error() {
        let options = RequestOptions::new().paged(1, 10);
        let total = Some(Err(sqlx::Error::ColumnNotFound("_totalitems".to_string())));
        let err = paging("Role", total, 10, &options).unwrap_err();
        assert_matches!(err, DbAccessError::Materialize { entity: "Role", .. });
    }
}
