//! Persistence for the CareMatch booking engine
//!
//! An SQLx `Any` pool (SQLite by default, Postgres or MySQL behind features) plus one
//! repository per aggregate. Writes that must commit together take a
//! [`DbTransaction`]; everything else goes straight to the pool.
//!
//! ```rust,no_run
//! use carematch_db::DbClient;
//!
//! async fn setup_db() -> Result<DbClient, carematch_db::error::DbError> {
//!     let db = DbClient::from_url("sqlite://data/carematch.db").await?;
//!     db.init_schema().await?;
//!     Ok(db)
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod repositories;
pub mod schema;

pub use client::{DbClient, DbTransaction};
pub use error::DbError;
pub use repositories::{
    AllocationSource, SqlBookingSessionRepository, SqlCalendarCredentialRepository,
    SqlDirectoryRepository, SqlSessionPaymentRepository, SqlSubsidyLedgerRepository,
    SubsidyAllocation,
};
