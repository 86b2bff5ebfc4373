//! Credential handling.
//!
//! Every request passes through [`middleware::authentication_middleware`], which asks the
//! [`dispatcher::AuthenticationDispatcher`] to resolve it against the configured
//! [`dispatcher::CredentialHandler`]s:
//!
//! - [`api_token`]: bearer access tokens, decoded by [`token::TokenCodec`] and checked for
//!   revocation through [`revocation::RevocationCache`]
//! - [`basic`]: HTTP Basic against the [`directory::UserDirectory`]
//! - [`session`]: the signed session cookie set at login
//! - [`code`]: authorization codes from the OAuth 2.0 code grant
//!
//! Handlers see the result as a sealed [`current_user::SecurityContext`] extractor. Login
//! attempts are written to the [`audit`] log, and [`scopes`] names the scopes that unlock
//! the administrative routes.

pub mod api_token;
pub mod audit;
pub mod basic;
pub mod code;
pub mod current_user;
pub mod directory;
pub mod dispatcher;
pub mod middleware;
pub mod password;
pub mod revocation;
pub mod scopes;
pub mod session;
pub mod token;
pub mod utils;
