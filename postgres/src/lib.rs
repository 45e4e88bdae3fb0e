//! `PostgreSQL` audit trail for the purchase queue.
//!
//! This crate provides [`PostgresAuditStore`], the durable implementation of
//! the `AuditStore` trait from `purchase-queue-core`. It records the
//! coarse-grained status of each buyer for reporting:
//!
//! - One row per queue entry in `queue_entries`
//! - At most one open (`waiting` or `active`) row per event and buyer,
//!   enforced by a partial unique index
//! - Connection pooling via `sqlx::PgPool`
//!
//! The fast store stays authoritative for admission; nothing on the
//! admission path reads from here.
//!
//! # Example
//!
//! ```ignore
//! use purchase_queue_postgres::PostgresAuditStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let audit = PostgresAuditStore::new("postgres://localhost/queue").await?;
//!     audit.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod audit_store;

pub use audit_store::{PoolSettings, PostgresAuditStore};
