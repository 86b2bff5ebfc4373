//! Persistence for access keys and the login audit log.
//!
//! The data access layer uses SQLx with PostgreSQL and follows the repository pattern: each
//! table has a repository in [`handlers`] that borrows a connection (or a transaction), and
//! the records it returns live in [`models`].
//!
//! ```ignore
//! use authgate::db::handlers::{AccessKeys, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let key = AccessKeys::new(&mut tx).create(&request).await?;
//! tx.commit().await?;
//! ```
//!
//! # Migrations
//!
//! Migrations live in the crate's `migrations/` directory and are applied at start-up through
//! [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
