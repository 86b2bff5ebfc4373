//! Database record models matching the table schemas.

pub mod access_keys;
pub mod login_audit;
