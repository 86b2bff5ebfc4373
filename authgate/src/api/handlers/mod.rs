//! HTTP request handlers.
//!
//! - [`auth`]: login, logout and user info
//! - [`oauth`]: authorization code grant
//! - [`access_keys`]: access key management
//! - [`audit`]: login audit log
//! - [`scopes`]: the scopes the gateway understands

pub mod access_keys;
pub mod audit;
pub mod auth;
pub mod oauth;
pub mod scopes;
