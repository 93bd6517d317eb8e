//! Metadata-driven SQL generation
//!
//! This module turns entity declarations into parameterized PostgreSQL
//! statements:
//!
//! - `#[derive(DbEntity)]` supplies column metadata and row mapping
//! - [`DefinitionRegistry`] resolves entity types to table descriptors
//! - [`QueryBuilder`] renders SELECTs with translation fallback, joins,
//!   filters, paging and as-of reads
//! - [`commands`] renders inserts, updates, upserts and deletes
//!
//! # Example
//!
//! ```rust,ignore
//! use dbaccess::orm::{FilterBuilder, QueryBuilder, RequestOptions};
//!
//! let role = registry.get::<Role>()?;
//! let filters = FilterBuilder::new().contains("name", "leder").build();
//! let options = RequestOptions::new().language("eng").paged(1, 20);
//! let query = QueryBuilder::new(&role)
//!     .filters(&filters)
//!     .options(&options)
//!     .build()?;
//! ```

mod builder;
pub mod commands;
mod filter;
mod join;
mod options;
mod params;
mod registry;
mod traits;
mod value;

pub use builder::*;
pub use filter::*;
pub use join::*;
pub use options::*;
pub use params::*;
pub use registry::*;
pub use traits::*;
pub use value::*;
