//! API request and response data models.
//!
//! - [`auth`]: login, logout and user info
//! - [`oauth`]: authorization code grant parameters and token responses
//! - [`access_keys`]: access key management
//! - [`audit`]: login audit records

pub mod access_keys;
pub mod audit;
pub mod auth;
pub mod oauth;
