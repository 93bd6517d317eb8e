//! Metadata-driven PostgreSQL repositories
//!
//! Entities declare their table shape with `#[derive(DbEntity)]`; the
//! engine turns that metadata into parameterized SQL with translation
//! fallback, joins, paging, as-of reads, audited writes and bulk COPY
//! ingestion.
//!
//! ```rust,ignore
//! let registry = dbaccess::models::registry(&config.schemas)?;
//! let db = Database::from_config(&config, registry).await?;
//!
//! let roles = db.basic::<Role>()?;
//! let found = roles
//!     .get_by("code", "dagl", &RequestOptions::new().language("eng"))
//!     .await?;
//! ```

extern crate self as dbaccess;

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod orm;
pub mod repository;
pub mod telemetry;

pub use dbaccess_macros::{DbEntity, DbExtended};
pub use error::{DbAccessError, Result};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
    pub use sqlx;
    pub use uuid;
}
