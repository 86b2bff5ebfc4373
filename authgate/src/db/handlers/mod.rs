//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed SQLx connection or transaction and implements
//! [`Repository`] for its table.
//!
//! - [`AccessKeys`]: long-lived API access keys, the rows the revocation cache checks
//! - [`LoginAuditRecords`]: the append-only login audit log (create and list only)

pub mod access_keys;
pub mod login_audit;
pub mod repository;

pub use access_keys::AccessKeys;
pub use login_audit::LoginAuditRecords;
pub use repository::Repository;
